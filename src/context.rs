use std::fmt;

use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::arena::{Arena, ArenaId};
use crate::ast::error::ParseError;
use crate::ast::node::Node;
use crate::ast::parser::Parser;
use crate::error::Error;
use crate::lexer::Lexer;
use crate::render::Renderer;
use crate::value::Value;
use crate::variable::VariableStore;

pub type TagId = ArenaId<TagType>;
pub type OperatorId = ArenaId<OperatorType>;
pub type FilterId = ArenaId<FilterType>;
pub type DotFilterId = ArenaId<DotFilterType>;

/// A registered render callback.
///
/// Closure capture takes the place of the usual `user_data` pointer: a
/// dialect that needs registry ids or configuration simply captures them.
pub type RenderFunction = Box<dyn Fn(&mut Renderer<'_>, &Node, &mut dyn VariableStore) -> Value>;

/// Syntax switches fixed at context construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    /// Allows indexed assignment targets, e.g. `{% assign a[1] = x %}`.
    pub extended_assignment: bool,
    /// Allows operators and parentheses in every expression position, not
    /// just tag and filter arguments.
    pub extended_expression: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// A block tag with a matching `end…` terminator.
    Enclosed,
    /// A single-shot tag with arguments but no body.
    Free,
    /// A clause keyword valid only inside its parent enclosed tag.
    Intermediate,
}

pub struct TagType {
    pub symbol: CompactString,
    pub kind: TagKind,
    pub min_args: Option<usize>,
    pub max_args: Option<usize>,
    pub(crate) render: Option<RenderFunction>,
    pub(crate) intermediates: FxHashMap<CompactString, TagId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Nonary,
    Unary,
    Binary,
    Nary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixness {
    Prefix,
    Infix,
    Affix,
}

pub struct OperatorType {
    pub symbol: CompactString,
    pub arity: Arity,
    pub fixness: Fixness,
    pub priority: i32,
    pub(crate) render: RenderFunction,
}

pub struct FilterType {
    pub symbol: CompactString,
    pub min_args: Option<usize>,
    pub max_args: Option<usize>,
    pub(crate) render: RenderFunction,
}

pub struct DotFilterType {
    pub symbol: CompactString,
    pub(crate) render: RenderFunction,
}

/// The registry shared by every parse and render: tag types, operator
/// types (with priority, arity and fixness), filter types and syntax
/// settings.
///
/// A context is populated by registrations and then used through `&self`,
/// so it is effectively frozen once the first template is parsed.
/// Registration is last-write-wins per symbol.
pub struct Context {
    settings: Settings,
    tags: Arena<TagType>,
    tag_symbols: FxHashMap<CompactString, TagId>,
    operators: Arena<OperatorType>,
    operator_symbols: FxHashMap<CompactString, OperatorId>,
    filters: Arena<FilterType>,
    filter_symbols: FxHashMap<CompactString, FilterId>,
    dot_filters: Arena<DotFilterType>,
    dot_filter_symbols: FxHashMap<CompactString, DotFilterId>,
    max_parse_depth: u32,
    treat_unknown_filters_as_errors: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            tags: Arena::new(),
            tag_symbols: FxHashMap::default(),
            operators: Arena::new(),
            operator_symbols: FxHashMap::default(),
            filters: Arena::new(),
            filter_symbols: FxHashMap::default(),
            dot_filters: Arena::new(),
            dot_filter_symbols: FxHashMap::default(),
            max_parse_depth: 100,
            treat_unknown_filters_as_errors: false,
        }
    }

    /// A context with the standard dialect registered.
    pub fn with_standard_dialect() -> Self {
        let mut context = Self::default();
        crate::dialect::register_standard(&mut context);
        context
    }

    /// A context with the given settings and the standard dialect.
    pub fn with_settings(settings: Settings) -> Self {
        let mut context = Self::new(settings);
        crate::dialect::register_standard(&mut context);
        context
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn max_parse_depth(&self) -> u32 {
        self.max_parse_depth
    }

    pub fn set_max_parse_depth(&mut self, depth: u32) {
        self.max_parse_depth = depth;
    }

    pub fn treat_unknown_filters_as_errors(&self) -> bool {
        self.treat_unknown_filters_as_errors
    }

    pub fn set_treat_unknown_filters_as_errors(&mut self, enabled: bool) {
        self.treat_unknown_filters_as_errors = enabled;
    }

    pub fn register_tag(
        &mut self,
        symbol: &str,
        kind: TagKind,
        min_args: Option<usize>,
        max_args: Option<usize>,
        render: impl Fn(&mut Renderer<'_>, &Node, &mut dyn VariableStore) -> Value + 'static,
    ) -> TagId {
        debug_assert!(
            kind != TagKind::Intermediate,
            "intermediates are registered through register_intermediate"
        );
        let id = self.tags.alloc(TagType {
            symbol: CompactString::new(symbol),
            kind,
            min_args,
            max_args,
            render: Some(Box::new(render)),
            intermediates: FxHashMap::default(),
        });
        self.tag_symbols.insert(CompactString::new(symbol), id);
        id
    }

    /// Registers an intermediate clause keyword (e.g. `else`) of an
    /// enclosed tag. Intermediates are not looked up as standalone tags;
    /// they are only valid inside their parent's block.
    pub fn register_intermediate(
        &mut self,
        parent: TagId,
        symbol: &str,
        min_args: Option<usize>,
        max_args: Option<usize>,
    ) -> TagId {
        let id = self.tags.alloc(TagType {
            symbol: CompactString::new(symbol),
            kind: TagKind::Intermediate,
            min_args,
            max_args,
            render: None,
            intermediates: FxHashMap::default(),
        });
        self.tags[parent]
            .intermediates
            .insert(CompactString::new(symbol), id);
        id
    }

    pub fn register_operator(
        &mut self,
        symbol: &str,
        arity: Arity,
        fixness: Fixness,
        priority: i32,
        render: impl Fn(&mut Renderer<'_>, &Node, &mut dyn VariableStore) -> Value + 'static,
    ) -> OperatorId {
        let id = self.operators.alloc(OperatorType {
            symbol: CompactString::new(symbol),
            arity,
            fixness,
            priority,
            render: Box::new(render),
        });
        self.operator_symbols.insert(CompactString::new(symbol), id);
        id
    }

    pub fn register_filter(
        &mut self,
        symbol: &str,
        min_args: Option<usize>,
        max_args: Option<usize>,
        render: impl Fn(&mut Renderer<'_>, &Node, &mut dyn VariableStore) -> Value + 'static,
    ) -> FilterId {
        let id = self.filters.alloc(FilterType {
            symbol: CompactString::new(symbol),
            min_args,
            max_args,
            render: Box::new(render),
        });
        self.filter_symbols.insert(CompactString::new(symbol), id);
        id
    }

    pub fn register_dot_filter(
        &mut self,
        symbol: &str,
        render: impl Fn(&mut Renderer<'_>, &Node, &mut dyn VariableStore) -> Value + 'static,
    ) -> DotFilterId {
        let id = self.dot_filters.alloc(DotFilterType {
            symbol: CompactString::new(symbol),
            render: Box::new(render),
        });
        self.dot_filter_symbols.insert(CompactString::new(symbol), id);
        id
    }

    pub fn tag(&self, symbol: &str) -> Option<(TagId, &TagType)> {
        let id = *self.tag_symbols.get(symbol)?;
        Some((id, &self.tags[id]))
    }

    pub fn tag_by_id(&self, id: TagId) -> &TagType {
        &self.tags[id]
    }

    pub fn operator(&self, symbol: &str) -> Option<(OperatorId, &OperatorType)> {
        let id = *self.operator_symbols.get(symbol)?;
        Some((id, &self.operators[id]))
    }

    pub fn operator_by_id(&self, id: OperatorId) -> &OperatorType {
        &self.operators[id]
    }

    pub fn filter(&self, symbol: &str) -> Option<(FilterId, &FilterType)> {
        let id = *self.filter_symbols.get(symbol)?;
        Some((id, &self.filters[id]))
    }

    pub fn filter_by_id(&self, id: FilterId) -> &FilterType {
        &self.filters[id]
    }

    pub fn dot_filter(&self, symbol: &str) -> Option<(DotFilterId, &DotFilterType)> {
        let id = *self.dot_filter_symbols.get(symbol)?;
        Some((id, &self.dot_filters[id]))
    }

    pub fn dot_filter_by_id(&self, id: DotFilterId) -> &DotFilterType {
        &self.dot_filters[id]
    }

    /// The registered operator symbols that do not lex as identifiers,
    /// handed to the lexer for longest-match tokenization.
    pub(crate) fn symbolic_operator_symbols(&self) -> Vec<CompactString> {
        self.operator_symbols
            .keys()
            .filter(|symbol| {
                symbol
                    .chars()
                    .next()
                    .map(|c| !c.is_alphabetic() && c != '_')
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Compiles a template against this context.
    pub fn parse(&self, source: &str) -> Result<Template, Error> {
        tracing::debug!(bytes = source.len(), "parsing template");
        let tokens = Lexer::new(self.symbolic_operator_symbols())
            .tokenize(source)
            .map_err(|error| Error::from_lexer(source, error))?;
        Parser::new(self, tokens)
            .parse()
            .map_err(|errors| Error::from_parse(source, errors))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .field("tags", &self.tags.len())
            .field("operators", &self.operators.len())
            .field("filters", &self.filters.len())
            .field("dot_filters", &self.dot_filters.len())
            .finish()
    }
}

/// A compiled template: an immutable AST plus any warnings the parser
/// demoted (currently only unknown filters).
#[derive(Debug)]
pub struct Template {
    pub(crate) root: Node,
    warnings: Vec<ParseError>,
}

impl Template {
    pub(crate) fn new(root: Node, warnings: Vec<ParseError>) -> Self {
        Self { root, warnings }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn warnings(&self) -> &[ParseError] {
        &self.warnings
    }
}
