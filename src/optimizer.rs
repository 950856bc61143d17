use crate::ast::node::{Node, NodeData};
use crate::render::{lookup_static, Renderer};
use crate::value::Value;
use crate::variable::VariableStore;
use crate::variant::Variant;

/// Pre-render constant folding against a (possibly partial) store.
///
/// Each foldable node is replaced by a literal leaf holding its rendered
/// value. Variables fold only when their whole chain resolves statically to
/// a scalar; operators and filters fold when every child folded (they are
/// pure); tags never fold, since they may carry side effects or flow
/// control. The optimizer borrows the renderer so the two share one depth
/// counter and the same bounds.
pub struct Optimizer<'r, 'c> {
    renderer: &'r mut Renderer<'c>,
}

impl<'r, 'c> Optimizer<'r, 'c> {
    pub fn new(renderer: &'r mut Renderer<'c>) -> Self {
        Self { renderer }
    }

    /// Folds a template's AST in place.
    pub fn optimize(&mut self, template: &mut crate::Template, store: &mut dyn VariableStore) {
        let mut root = std::mem::replace(
            &mut template.root,
            Node::leaf(Variant::Nil, Default::default()),
        );
        self.fold(&mut root, store);
        template.root = root;
    }

    /// Attempts to fold one node, returning `true` if the node is now a
    /// literal leaf.
    pub fn fold(&mut self, node: &mut Node, store: &mut dyn VariableStore) -> bool {
        match &mut node.data {
            NodeData::Literal(_) => true,
            NodeData::Variable(links) => {
                for link in links.iter_mut() {
                    self.fold(link, store);
                }
                match lookup_static(links, store.as_variable()) {
                    Some(value) => match value.to_variant() {
                        Some(variant) => {
                            *node = Node::leaf(variant, node.range);
                            true
                        }
                        // container values stay live lookups
                        None => false,
                    },
                    None => false,
                }
            }
            NodeData::Output(arguments) => {
                let folded = match &mut arguments.data {
                    NodeData::Arguments(items) => {
                        let mut all = true;
                        for item in items.iter_mut() {
                            all &= self.fold(item, store);
                        }
                        all
                    }
                    _ => false,
                };
                if folded {
                    let value = self.render_pure(node, store);
                    match value.and_then(|v| v.to_variant()) {
                        Some(variant) => {
                            *node = Node::leaf(variant, node.range);
                            true
                        }
                        None => false,
                    }
                } else {
                    false
                }
            }
            NodeData::Arguments(items) => {
                let mut all = true;
                for item in items.iter_mut() {
                    all &= self.fold(item, store);
                }
                all
            }
            NodeData::Concatenation(_) => self.fold_concatenation(node, store),
            NodeData::Operator(_, children) => {
                let mut all = true;
                for child in children.iter_mut() {
                    all &= self.fold(child, store);
                }
                all && self.fold_to_leaf(node, store)
            }
            NodeData::Filter(_, children) | NodeData::DotFilter(_, children) => {
                let mut all = true;
                for child in children.iter_mut() {
                    all &= match &mut child.data {
                        NodeData::Arguments(items) => {
                            let mut inner = true;
                            for item in items.iter_mut() {
                                inner &= self.fold(item, store);
                            }
                            inner
                        }
                        _ => self.fold(child, store),
                    };
                }
                all && self.fold_to_leaf(node, store)
            }
            NodeData::Tag(_, _) => false,
            NodeData::Group(_) => false,
        }
    }

    /// Renders a pure node and replaces it with a leaf when the result has
    /// a scalar form.
    fn fold_to_leaf(&mut self, node: &mut Node, store: &mut dyn VariableStore) -> bool {
        match self.render_pure(node, store).and_then(|v| v.to_variant()) {
            Some(variant) => {
                *node = Node::leaf(variant, node.range);
                true
            }
            None => false,
        }
    }

    fn render_pure(&mut self, node: &Node, store: &mut dyn VariableStore) -> Option<Value> {
        let value = self.renderer.render_node(node, store);
        if self.renderer.interrupted() {
            return None;
        }
        Some(value)
    }

    /// Folds a concatenation's children, merging runs of adjacent literal
    /// leaves into single string leaves. If everything folds the node
    /// itself becomes one leaf. No trailing empty leaf is pushed when the
    /// pending accumulator is empty.
    fn fold_concatenation(&mut self, node: &mut Node, store: &mut dyn VariableStore) -> bool {
        if !self.renderer.enter_depth() {
            self.renderer.leave_depth();
            return false;
        }

        let range = node.range;
        let NodeData::Concatenation(children) = &mut node.data else {
            self.renderer.leave_depth();
            return false;
        };

        let mut merged: Vec<Node> = Vec::with_capacity(children.len());
        let mut accumulator = String::new();
        for mut child in children.drain(..) {
            self.fold(&mut child, store);
            match child.data {
                NodeData::Literal(variant) => variant.render_to(&mut accumulator),
                _ => {
                    if !accumulator.is_empty() {
                        merged.push(Node::leaf(
                            Variant::String(std::mem::take(&mut accumulator)),
                            range,
                        ));
                    }
                    merged.push(child);
                }
            }
        }

        self.renderer.leave_depth();

        if merged.is_empty() {
            *node = Node::leaf(Variant::String(accumulator), range);
            true
        } else {
            if !accumulator.is_empty() {
                merged.push(Node::leaf(Variant::String(accumulator), range));
            }
            *node = Node {
                range,
                data: NodeData::Concatenation(merged),
            };
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;
    use crate::Context;
    use rstest::{fixture, rstest};

    #[fixture]
    fn context() -> Context {
        Context::with_standard_dialect()
    }

    fn optimized_output(context: &Context, source: &str, store: &mut Value) -> (String, String) {
        let template = context.parse(source).unwrap();
        let mut renderer = Renderer::new(context);
        let plain = renderer.render(&template, &mut store.clone()).unwrap();

        let mut template = context.parse(source).unwrap();
        let mut renderer = Renderer::new(context);
        Optimizer::new(&mut renderer).optimize(&mut template, store);
        let folded = renderer.render(&template, store).unwrap();
        (plain, folded)
    }

    #[rstest]
    #[case::pure_text("plain text only")]
    #[case::resolvable_variable("Hello, {{ name }}!")]
    #[case::chain("{{ a.b[1].c }}")]
    #[case::filter("{{ name | upcase }}")]
    #[case::missing_stays_live("{{ missing }}-{{ name }}")]
    fn test_optimization_preserves_semantics(context: Context, #[case] source: &str) {
        let mut store = value!({
            "name": "World",
            "a": { "b": [{ "c": "x" }, { "c": "y" }] }
        });
        let (plain, folded) = optimized_output(&context, source, &mut store);
        assert_eq!(plain, folded);
    }

    #[rstest]
    fn test_fully_static_template_folds_to_single_leaf(context: Context) {
        let mut template = context.parse("Hello, {{ name }}!").unwrap();
        let mut renderer = Renderer::new(&context);
        let mut store = value!({ "name": "World" });
        Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
        assert!(matches!(
            &template.root().data,
            NodeData::Literal(Variant::String(s)) if s == "Hello, World!"
        ));
    }

    #[rstest]
    fn test_unresolved_variable_left_untouched(context: Context) {
        let mut template = context.parse("{{ missing }}").unwrap();
        let mut renderer = Renderer::new(&context);
        let mut store = value!({});
        Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
        let NodeData::Concatenation(children) = &template.root().data else {
            panic!("partially foldable template keeps its concatenation");
        };
        assert!(matches!(&children[0].data, NodeData::Output(_)));
    }

    #[rstest]
    fn test_adjacent_leaves_merge(context: Context) {
        let mut template = context.parse("a{{ 1 }}b{{ missing }}c{{ 2 }}d").unwrap();
        let mut renderer = Renderer::new(&context);
        let mut store = value!({});
        Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
        let NodeData::Concatenation(children) = &template.root().data else {
            panic!();
        };
        // "a1b", live output, "c2d"
        assert_eq!(children.len(), 3);
        assert!(matches!(&children[0].data, NodeData::Literal(Variant::String(s)) if s == "a1b"));
        assert!(matches!(&children[1].data, NodeData::Output(_)));
        assert!(matches!(&children[2].data, NodeData::Literal(Variant::String(s)) if s == "c2d"));
    }

    #[rstest]
    fn test_idempotent(context: Context) {
        let mut template = context.parse("a{{ missing }}{{ 1 }}b").unwrap();
        let mut renderer = Renderer::new(&context);
        let mut store = value!({});
        Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
        let first = template.root().clone();
        Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
        assert_eq!(&first, template.root());
    }
}
