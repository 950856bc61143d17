use crate::context::{DotFilterId, FilterId, OperatorId, TagId};
use crate::range::Range;
use crate::variant::Variant;

/// A node of the template AST.
///
/// Leaves carry a [`Variant`]; internal nodes carry a kind discriminator
/// plus registry ids where the kind is user-registered. A node exclusively
/// owns its children; trees are strictly hierarchical.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub range: Range,
    pub data: NodeData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    /// A literal leaf.
    Literal(Variant),
    /// A variable lookup chain; each link is a string-key leaf or an index
    /// expression resolved at render time.
    Variable(Vec<Node>),
    /// `{{ … }}`; the child is an `Arguments` node holding exactly one
    /// expression.
    Output(Box<Node>),
    /// An ordered expression list, one child per comma-separated argument.
    Arguments(Vec<Node>),
    /// Parenthesized grouping. Exists only while parsing; the parser
    /// collapses every group to its single contained expression.
    Group(Vec<Node>),
    /// Body aggregator: children are literal leaves and renderable
    /// sub-trees whose string renders concatenate in order.
    Concatenation(Vec<Node>),
    /// Registered operator application; children are the operands in
    /// left-to-right order.
    Operator(OperatorId, Vec<Node>),
    /// Filter application: child 0 is the piped-in operand, child 1 an
    /// `Arguments` node.
    Filter(FilterId, Vec<Node>),
    /// Property-style filter (`expr.name`): child 0 is the operand,
    /// child 1 an empty `Arguments` node.
    DotFilter(DotFilterId, Vec<Node>),
    /// Tag node: child 0 is `Arguments`; for enclosed tags child 1 is the
    /// primary body and each intermediate clause contributes one further
    /// `Tag` child of the intermediate's type.
    Tag(TagId, Vec<Node>),
}

impl Node {
    pub fn leaf(variant: Variant, range: Range) -> Self {
        Node {
            range,
            data: NodeData::Literal(variant),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.data, NodeData::Literal(_))
    }

    pub fn children(&self) -> &[Node] {
        match &self.data {
            NodeData::Literal(_) => &[],
            NodeData::Output(child) => std::slice::from_ref(child),
            NodeData::Variable(children)
            | NodeData::Arguments(children)
            | NodeData::Group(children)
            | NodeData::Concatenation(children)
            | NodeData::Operator(_, children)
            | NodeData::Filter(_, children)
            | NodeData::DotFilter(_, children)
            | NodeData::Tag(_, children) => children,
        }
    }

    /// The `Arguments` child of a tag, filter, or output node.
    pub fn arguments(&self) -> Option<&Node> {
        let child = match &self.data {
            NodeData::Output(child) => Some(&**child),
            NodeData::Tag(_, children) => children.first(),
            NodeData::Filter(_, children) | NodeData::DotFilter(_, children) => children.get(1),
            _ => None,
        };
        child.filter(|node| matches!(node.data, NodeData::Arguments(_)))
    }

    /// The expressions inside this node's `Arguments` child.
    pub fn argument_items(&self) -> &[Node] {
        match self.arguments().map(|node| &node.data) {
            Some(NodeData::Arguments(items)) => items,
            _ => &[],
        }
    }
}
