pub mod error;

use std::time::{Duration, Instant};

use error::{RenderError, RenderErrorKind};
use smallvec::SmallVec;

use crate::ast::node::{Node, NodeData};
use crate::context::{Context, Settings, Template};
use crate::range::Range;
use crate::value::Value;
use crate::variable::{Variable, VariableKind, VariableStore};
use crate::variant::Variant;

/// Renderer-internal flow signal used by loop and flow-control tags to
/// short-circuit traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    #[default]
    None,
    Break,
    Continue,
    Return,
}

enum Step {
    Key(String),
    Index(usize),
}

/// Per-render state: depth counter, flow control, pending error, and the
/// resource budgets. A renderer is bound to one context and may be reused
/// across renders; all transient state resets at each render entry.
///
/// Registered callbacks receive `&mut Renderer` and read their operands
/// through [`operand`](Renderer::operand), [`argument`](Renderer::argument)
/// and [`child`](Renderer::child). These helpers trigger sub-rendering and
/// mutate the renderer's depth and error state, so they must be called
/// synchronously from within the callback.
pub struct Renderer<'c> {
    context: &'c Context,
    depth: u32,
    max_depth: u32,
    max_memory: Option<usize>,
    max_time: Option<Duration>,
    started: Option<Instant>,
    allocated: usize,
    control: Control,
    interrupt: Option<(RenderErrorKind, Range)>,
}

impl<'c> Renderer<'c> {
    pub fn new(context: &'c Context) -> Self {
        Self {
            context,
            depth: 0,
            max_depth: 100,
            max_memory: None,
            max_time: None,
            started: None,
            allocated: 0,
            control: Control::None,
            interrupt: None,
        }
    }

    pub fn set_max_depth(&mut self, depth: u32) {
        self.max_depth = depth;
    }

    pub fn set_max_memory(&mut self, bytes: Option<usize>) {
        self.max_memory = bytes;
    }

    pub fn set_max_time(&mut self, limit: Option<Duration>) {
        self.max_time = limit;
    }

    pub fn settings(&self) -> Settings {
        self.context.settings()
    }

    pub fn context(&self) -> &'c Context {
        self.context
    }

    /// Renders a template to a single string.
    pub fn render(
        &mut self,
        template: &Template,
        store: &mut dyn VariableStore,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        let result = {
            let mut sink = |chunk: &str| out.push_str(chunk);
            self.render_inner(template, store, &mut sink)
        };
        match result {
            Ok(()) => Ok(out),
            Err((kind, range)) => Err(RenderError {
                kind,
                range,
                partial: out,
            }),
        }
    }

    /// Renders a template, pushing one chunk per top-level body child
    /// through `sink`. Chunk boundaries carry no semantic guarantee.
    pub fn render_chunked(
        &mut self,
        template: &Template,
        store: &mut dyn VariableStore,
        sink: &mut dyn FnMut(&str),
    ) -> Result<(), RenderError> {
        self.render_inner(template, store, sink)
            .map_err(|(kind, range)| RenderError {
                kind,
                range,
                partial: String::new(),
            })
    }

    fn render_inner(
        &mut self,
        template: &Template,
        store: &mut dyn VariableStore,
        sink: &mut dyn FnMut(&str),
    ) -> Result<(), (RenderErrorKind, Range)> {
        tracing::debug!("rendering template");
        self.depth = 0;
        self.allocated = 0;
        self.control = Control::None;
        self.interrupt = None;
        self.started = Some(Instant::now());

        let root = template.root();
        match &root.data {
            NodeData::Concatenation(children) => {
                for child in children {
                    let value = self.render_node(child, store);
                    if let Some(interrupt) = self.interrupt {
                        return Err(interrupt);
                    }
                    let mut chunk = String::new();
                    value.render_to(&mut chunk);
                    self.allocated += chunk.len();
                    sink(&chunk);
                    self.check_budgets(child.range);
                    if let Some(interrupt) = self.interrupt {
                        return Err(interrupt);
                    }
                    if self.control != Control::None {
                        break;
                    }
                }
            }
            _ => {
                let value = self.render_node(root, store);
                if let Some(interrupt) = self.interrupt {
                    return Err(interrupt);
                }
                let mut chunk = String::new();
                value.render_to(&mut chunk);
                sink(&chunk);
            }
        }
        Ok(())
    }

    /// Renders one node to its value. Dispatch is by node kind; registered
    /// kinds invoke their render callback.
    pub fn render_node(&mut self, node: &Node, store: &mut dyn VariableStore) -> Value {
        if self.interrupt.is_some() {
            return Value::Nil;
        }
        let context = self.context;
        match &node.data {
            NodeData::Literal(variant) => variant.clone().into(),
            NodeData::Variable(links) => self.resolve_chain(links, store),
            NodeData::Output(arguments) => match &arguments.data {
                NodeData::Arguments(items) => items
                    .first()
                    .map(|expr| self.render_node(expr, store))
                    .unwrap_or(Value::Nil),
                _ => Value::Nil,
            },
            NodeData::Concatenation(children) => {
                self.depth += 1;
                if self.depth > self.max_depth {
                    self.depth -= 1;
                    self.fail(RenderErrorKind::ExceededDepth, node.range);
                    return Value::Nil;
                }
                let mut out = String::new();
                for child in children {
                    let value = self.render_node(child, store);
                    if self.interrupt.is_some() {
                        self.depth -= 1;
                        return Value::Nil;
                    }
                    let before = out.len();
                    value.render_to(&mut out);
                    self.allocated += out.len() - before;
                    self.check_budgets(child.range);
                    if self.interrupt.is_some() {
                        self.depth -= 1;
                        return Value::Nil;
                    }
                    if self.control != Control::None {
                        break;
                    }
                }
                self.depth -= 1;
                Value::String(out)
            }
            NodeData::Operator(id, _) => (context.operator_by_id(*id).render)(self, node, store),
            NodeData::Filter(id, _) => (context.filter_by_id(*id).render)(self, node, store),
            NodeData::DotFilter(id, _) => {
                (context.dot_filter_by_id(*id).render)(self, node, store)
            }
            NodeData::Tag(id, _) => match &context.tag_by_id(*id).render {
                Some(render) => render(self, node, store),
                None => Value::Nil,
            },
            NodeData::Arguments(_) | NodeData::Group(_) => {
                debug_assert!(false, "arguments and groups never render");
                Value::Nil
            }
        }
    }

    /// Walks a variable chain against the store. Missing keys, bad indices
    /// and type mismatches all resolve to nil.
    pub fn resolve_chain(&mut self, links: &[Node], store: &mut dyn VariableStore) -> Value {
        let mut steps: SmallVec<[Step; 4]> = SmallVec::new();
        for link in links {
            match self.render_node(link, store) {
                Value::Int(index) if index >= 0 => steps.push(Step::Index(index as usize)),
                Value::String(key) => steps.push(Step::Key(key)),
                _ => return Value::Nil,
            }
        }
        lookup(store.as_variable(), &steps).unwrap_or(Value::Nil)
    }

    /// The rendered value of a filter's piped-in operand.
    pub fn operand(&mut self, node: &Node, store: &mut dyn VariableStore) -> Value {
        match &node.data {
            NodeData::Filter(_, children) | NodeData::DotFilter(_, children) => children
                .first()
                .map(|operand| self.render_node(operand, store))
                .unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    /// The rendered value of the `idx`-th declared argument of a tag or
    /// filter node. Out-of-range arguments render as nil.
    pub fn argument(
        &mut self,
        node: &Node,
        store: &mut dyn VariableStore,
        idx: usize,
    ) -> Value {
        match node.argument_items().get(idx) {
            Some(expr) => self.render_node(expr, store),
            None => Value::Nil,
        }
    }

    pub fn argument_count(&self, node: &Node) -> usize {
        node.argument_items().len()
    }

    /// Renders the `idx`-th direct child: operator operands, or the bodies
    /// of an enclosed tag (child 1 is the primary body).
    pub fn child(&mut self, node: &Node, store: &mut dyn VariableStore, idx: usize) -> Value {
        match node.children().get(idx) {
            Some(child) => self.render_node(child, store),
            None => Value::Nil,
        }
    }

    pub fn child_count(&self, node: &Node) -> usize {
        node.children().len()
    }

    pub fn control(&self) -> Control {
        self.control
    }

    pub fn set_control(&mut self, control: Control) {
        self.control = control;
    }

    /// Takes a pending `Break`/`Continue`, leaving `Return` in place for
    /// outer frames.
    pub fn take_loop_control(&mut self) -> Control {
        match self.control {
            Control::Break | Control::Continue => {
                std::mem::replace(&mut self.control, Control::None)
            }
            other => other,
        }
    }

    /// Records a render error; the first one wins and halts traversal.
    pub fn fail(&mut self, kind: RenderErrorKind, range: Range) {
        if self.interrupt.is_none() {
            self.interrupt = Some((kind, range));
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_some()
    }

    pub(crate) fn enter_depth(&mut self) -> bool {
        self.depth += 1;
        self.depth <= self.max_depth
    }

    pub(crate) fn leave_depth(&mut self) {
        self.depth -= 1;
    }

    fn check_budgets(&mut self, range: Range) {
        if let Some(max_memory) = self.max_memory {
            if self.allocated > max_memory {
                self.fail(RenderErrorKind::ExceededMemory, range);
                return;
            }
        }
        if let (Some(max_time), Some(started)) = (self.max_time, self.started) {
            if started.elapsed() > max_time {
                self.fail(RenderErrorKind::ExceededTime, range);
            }
        }
    }
}

fn lookup(root: &dyn Variable, steps: &[Step]) -> Option<Value> {
    let mut current = root;
    for step in steps {
        current = match step {
            Step::Key(key) => current.child_by_key(key)?,
            Step::Index(index) => current.child_by_index(*index)?,
        };
    }
    Some(coerce(current))
}

/// A variable chain that consists solely of literal links, resolved without
/// touching renderer state. `None` means some link is missing from the
/// store or not statically resolvable.
pub(crate) fn lookup_static(links: &[Node], store: &dyn Variable) -> Option<Value> {
    let mut steps: SmallVec<[Step; 4]> = SmallVec::new();
    for link in links {
        match &link.data {
            NodeData::Literal(Variant::String(key)) => steps.push(Step::Key(key.clone())),
            NodeData::Literal(Variant::Int(index)) if *index >= 0 => {
                steps.push(Step::Index(*index as usize))
            }
            _ => return None,
        }
    }
    lookup(store, &steps)
}

/// Coerces a resolved variable to an engine value: scalars read through the
/// accessors, containers deep-copy via `to_value`.
fn coerce(variable: &dyn Variable) -> Value {
    match variable.kind() {
        VariableKind::Nil => Value::Nil,
        VariableKind::Bool => variable.as_bool().map(Value::Bool).unwrap_or(Value::Nil),
        VariableKind::Int => variable.as_int().map(Value::Int).unwrap_or(Value::Nil),
        VariableKind::Float => variable.as_float().map(Value::Float).unwrap_or(Value::Nil),
        VariableKind::String => variable
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Nil),
        VariableKind::Array | VariableKind::Dictionary | VariableKind::Other => {
            variable.to_value()
        }
    }
}
