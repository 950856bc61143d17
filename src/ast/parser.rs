use std::iter::Peekable;
use std::vec;

use compact_str::CompactString;

use crate::context::{Arity, Context, Fixness, TagId, TagKind, Template};
use crate::lexer::token::{Token, TokenKind};
use crate::range::Range;
use crate::variant::Variant;

use super::error::ParseError;
use super::node::{Node, NodeData};

/// How a `{% … %}` opener affected the current block body.
enum TagOutcome {
    Node(Node),
    /// An erroneous tag was reported and skipped; the body continues.
    Skip,
    Terminate(Terminator),
}

/// Why a block body stopped.
enum Terminator {
    Eof,
    /// The matching `end…` tag.
    End,
    /// An intermediate clause opened a sibling body; carries the clause's
    /// parsed arguments.
    Intermediate(TagId, Node, Range),
}

/// Token-stream parser producing the template AST.
///
/// Expressions are parsed by precedence climbing over the context's
/// operator table (runtime priority, arity and fixness; equal priority is
/// left-associative). Recoverable errors accumulate and parsing resyncs at
/// the next close marker, so one parse can report several problems;
/// `UnexpectedEnd` and `UnbalancedGroup` abort.
pub(crate) struct Parser<'c> {
    context: &'c Context,
    tokens: Peekable<vec::IntoIter<Token>>,
    errors: Vec<ParseError>,
    warnings: Vec<ParseError>,
    depth: u32,
    last_range: Range,
}

impl<'c> Parser<'c> {
    pub(crate) fn new(context: &'c Context, tokens: Vec<Token>) -> Self {
        Self {
            context,
            tokens: tokens.into_iter().peekable(),
            errors: Vec::new(),
            warnings: Vec::new(),
            depth: 0,
            last_range: Range::default(),
        }
    }

    pub(crate) fn parse(mut self) -> Result<Template, Vec<ParseError>> {
        match self.parse_body(None) {
            Ok((root, _)) => {
                self.validate(&root);
                if self.errors.is_empty() {
                    Ok(Template::new(root, self.warnings))
                } else {
                    Err(self.errors)
                }
            }
            Err(fatal) => {
                self.errors.push(fatal);
                Err(self.errors)
            }
        }
    }

    fn next_token(&mut self) -> Token {
        match self.tokens.next() {
            Some(token) => {
                self.last_range = token.range;
                token
            }
            None => Token {
                range: self.last_range,
                kind: TokenKind::Eof,
            },
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek()
    }

    fn peek_range(&mut self) -> Range {
        let last = self.last_range;
        self.peek().map(|t| t.range).unwrap_or(last)
    }

    fn enter(&mut self, range: Range) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.context.max_parse_depth() {
            return Err(ParseError::ExceededDepth(range));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Consumes tokens up to (not including) the next close marker.
    fn resync_to_close(&mut self) {
        loop {
            match self.peek().map(|t| &t.kind) {
                None
                | Some(TokenKind::Eof)
                | Some(TokenKind::OutputClose { .. })
                | Some(TokenKind::TagClose { .. }) => break,
                _ => {
                    self.next_token();
                }
            }
        }
    }

    /// Consumes tokens through the next tag close marker.
    fn resync_past_tag_close(&mut self) {
        loop {
            match self.peek().map(|t| &t.kind) {
                None | Some(TokenKind::Eof) => break,
                Some(TokenKind::TagClose { .. }) => {
                    self.next_token();
                    break;
                }
                _ => {
                    self.next_token();
                }
            }
        }
    }

    /// Parses a block body into a `Concatenation` node, stopping at EOF or,
    /// inside an enclosed tag, at an `end…` or intermediate clause.
    fn parse_body(&mut self, enclosing: Option<TagId>) -> Result<(Node, Terminator), ParseError> {
        let start = self.peek_range();
        let mut children: Vec<Node> = Vec::new();
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::Eof => {
                    if let Some(tag_id) = enclosing {
                        let symbol = self.context.tag_by_id(tag_id).symbol.clone();
                        return Err(ParseError::UnexpectedEnd(Some(symbol), token.range));
                    }
                    let range = start.to(self.last_range);
                    return Ok((
                        Node {
                            range,
                            data: NodeData::Concatenation(children),
                        },
                        Terminator::Eof,
                    ));
                }
                TokenKind::Raw(text) => {
                    children.push(Node::leaf(Variant::String(text), token.range));
                }
                TokenKind::OutputOpen { .. } => {
                    children.push(self.parse_output(token.range)?);
                }
                TokenKind::TagOpen { .. } => match self.parse_tag_open(enclosing, token.range)? {
                    TagOutcome::Node(node) => children.push(node),
                    TagOutcome::Skip => {}
                    TagOutcome::Terminate(terminator) => {
                        let range = start.to(self.last_range);
                        return Ok((
                            Node {
                                range,
                                data: NodeData::Concatenation(children),
                            },
                            terminator,
                        ));
                    }
                },
                other => {
                    self.errors.push(ParseError::InvalidSymbol(
                        CompactString::new(other.to_string()),
                        token.range,
                    ));
                }
            }
        }
    }

    fn parse_output(&mut self, open_range: Range) -> Result<Node, ParseError> {
        self.enter(open_range)?;
        let expr =
            self.parse_expression(self.context.settings().extended_expression, true)?;
        self.leave();

        let close = self.next_token();
        match close.kind {
            TokenKind::OutputClose { .. } => {}
            TokenKind::Eof => return Err(ParseError::UnexpectedEnd(None, close.range)),
            other => {
                self.errors.push(ParseError::InvalidSymbol(
                    CompactString::new(other.to_string()),
                    close.range,
                ));
                self.resync_to_close();
                self.next_token();
            }
        }

        let expr_range = expr.range;
        let range = open_range.to(self.last_range);
        let arguments = Node {
            range: expr_range,
            data: NodeData::Arguments(vec![expr]),
        };
        Ok(Node {
            range,
            data: NodeData::Output(Box::new(arguments)),
        })
    }

    fn parse_tag_open(
        &mut self,
        enclosing: Option<TagId>,
        open_range: Range,
    ) -> Result<TagOutcome, ParseError> {
        let context = self.context;
        let token = self.next_token();
        let (name, name_range) = match token.kind {
            TokenKind::Ident(name) => (name, token.range),
            TokenKind::Eof => return Err(ParseError::UnexpectedEnd(None, token.range)),
            other => {
                self.errors.push(ParseError::InvalidSymbol(
                    CompactString::new(other.to_string()),
                    token.range,
                ));
                self.resync_past_tag_close();
                return Ok(TagOutcome::Skip);
            }
        };

        if let Some(base) = name.strip_prefix("end") {
            let matches_block = enclosing
                .map(|tag_id| context.tag_by_id(tag_id).symbol.as_str() == base)
                .unwrap_or(false);
            if !matches_block {
                return Err(ParseError::UnexpectedEnd(Some(name.clone()), name_range));
            }
            self.expect_tag_close()?;
            return Ok(TagOutcome::Terminate(Terminator::End));
        }

        if let Some(tag_id) = enclosing {
            if let Some(&intermediate_id) =
                context.tag_by_id(tag_id).intermediates.get(name.as_str())
            {
                let args = self.parse_tag_arguments()?;
                return Ok(TagOutcome::Terminate(Terminator::Intermediate(
                    intermediate_id,
                    args,
                    name_range,
                )));
            }
        }

        let Some((tag_id, tag)) = context.tag(name.as_str()) else {
            self.errors.push(ParseError::UnknownTag(name, name_range));
            self.resync_past_tag_close();
            return Ok(TagOutcome::Skip);
        };

        match tag.kind {
            // Intermediates never reach the symbol table.
            TagKind::Intermediate => Ok(TagOutcome::Skip),
            TagKind::Free => {
                let args = self.parse_tag_arguments()?;
                let range = open_range.to(self.last_range);
                Ok(TagOutcome::Node(Node {
                    range,
                    data: NodeData::Tag(tag_id, vec![args]),
                }))
            }
            TagKind::Enclosed => {
                let args = self.parse_tag_arguments()?;
                self.enter(name_range)?;
                let node = self.parse_enclosed(tag_id, args, open_range)?;
                self.leave();
                Ok(TagOutcome::Node(node))
            }
        }
    }

    fn parse_enclosed(
        &mut self,
        tag_id: TagId,
        args: Node,
        open_range: Range,
    ) -> Result<Node, ParseError> {
        let mut children = vec![args];
        let (body, mut terminator) = self.parse_body(Some(tag_id))?;
        children.push(body);
        loop {
            match terminator {
                Terminator::End | Terminator::Eof => break,
                Terminator::Intermediate(intermediate_id, clause_args, clause_range) => {
                    let (clause_body, next) = self.parse_body(Some(tag_id))?;
                    let range = clause_range.to(self.last_range);
                    children.push(Node {
                        range,
                        data: NodeData::Tag(intermediate_id, vec![clause_args, clause_body]),
                    });
                    terminator = next;
                }
            }
        }
        let range = open_range.to(self.last_range);
        Ok(Node {
            range,
            data: NodeData::Tag(tag_id, children),
        })
    }

    fn expect_tag_close(&mut self) -> Result<(), ParseError> {
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::TagClose { .. } => return Ok(()),
                TokenKind::Eof => return Err(ParseError::UnexpectedEnd(None, token.range)),
                other => {
                    self.errors.push(ParseError::InvalidSymbol(
                        CompactString::new(other.to_string()),
                        token.range,
                    ));
                }
            }
        }
    }

    /// Parses the comma-separated argument list of a tag, through the
    /// closing `%}`.
    fn parse_tag_arguments(&mut self) -> Result<Node, ParseError> {
        let start = self.peek_range();
        let mut items = Vec::new();
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::TagClose { .. }) => {
                    self.next_token();
                    break;
                }
                Some(TokenKind::Eof) | None => {
                    let token = self.next_token();
                    return Err(ParseError::UnexpectedEnd(None, token.range));
                }
                Some(TokenKind::Comma) => {
                    self.next_token();
                }
                _ => {
                    let expr = self.parse_expression(true, true)?;
                    items.push(expr);
                }
            }
        }
        let range = start.to(self.last_range);
        Ok(Node {
            range,
            data: NodeData::Arguments(items),
        })
    }

    fn parse_expression(
        &mut self,
        allow_ops: bool,
        allow_filters: bool,
    ) -> Result<Node, ParseError> {
        let range = self.peek_range();
        self.enter(range)?;
        let mut node = self.parse_expr_bp(allow_ops, i32::MIN)?;
        if allow_filters {
            node = self.parse_filters(node, allow_ops)?;
        }
        self.leave();
        Ok(node)
    }

    fn parse_expr_bp(&mut self, allow_ops: bool, min_priority: i32) -> Result<Node, ParseError> {
        let context = self.context;
        let mut lhs = self.parse_primary(allow_ops)?;
        loop {
            let (symbol, range) = match self.peek().map(|t| (&t.kind, t.range)) {
                Some((TokenKind::Operator(symbol), range)) => (symbol.clone(), range),
                Some((TokenKind::Ident(name), range))
                    if context.operator(name.as_str()).is_some() =>
                {
                    (name.clone(), range)
                }
                _ => break,
            };

            let Some((op_id, op)) = context.operator(symbol.as_str()) else {
                self.next_token();
                self.errors.push(ParseError::UnknownOperator(symbol, range));
                self.resync_to_close();
                break;
            };

            if matches!(op.fixness, Fixness::Prefix) || !allow_ops {
                self.next_token();
                self.errors
                    .push(ParseError::UnknownOperatorOrQualifier(symbol, range));
                self.resync_to_close();
                break;
            }

            if op.priority <= min_priority {
                break;
            }

            let arity = op.arity;
            let priority = op.priority;
            self.next_token();
            let rhs = self.parse_expr_bp(allow_ops, priority)?;

            let lhs_range = lhs.range;
            let range = lhs_range.to(rhs.range);
            lhs = match (arity, lhs.data) {
                (Arity::Nary, NodeData::Operator(existing, mut operands)) if existing == op_id => {
                    operands.push(rhs);
                    Node {
                        range,
                        data: NodeData::Operator(op_id, operands),
                    }
                }
                (_, data) => Node {
                    range,
                    data: NodeData::Operator(
                        op_id,
                        vec![
                            Node {
                                range: lhs_range,
                                data,
                            },
                            rhs,
                        ],
                    ),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self, allow_ops: bool) -> Result<Node, ParseError> {
        let context = self.context;
        let token = self.next_token();
        match token.kind {
            TokenKind::Int(i) => Ok(Node::leaf(Variant::Int(i), token.range)),
            TokenKind::Float(f) => Ok(Node::leaf(Variant::Float(f), token.range)),
            TokenKind::String(s) => Ok(Node::leaf(Variant::String(s), token.range)),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Node::leaf(Variant::Bool(true), token.range)),
                "false" => Ok(Node::leaf(Variant::Bool(false), token.range)),
                "nil" | "null" => Ok(Node::leaf(Variant::Nil, token.range)),
                _ => {
                    if let Some((op_id, op)) = context.operator(name.as_str()) {
                        if matches!(op.fixness, Fixness::Prefix) && allow_ops {
                            return self.parse_prefix(op_id, op.priority, token.range, allow_ops);
                        }
                        if matches!(op.arity, Arity::Nonary) {
                            return Ok(Node {
                                range: token.range,
                                data: NodeData::Operator(op_id, vec![]),
                            });
                        }
                    }
                    self.parse_variable_chain(name, token.range)
                }
            },
            TokenKind::Operator(symbol) => match context.operator(symbol.as_str()) {
                Some((op_id, op)) if matches!(op.fixness, Fixness::Prefix) && allow_ops => {
                    self.parse_prefix(op_id, op.priority, token.range, allow_ops)
                }
                Some((op_id, op)) if matches!(op.arity, Arity::Nonary) => Ok(Node {
                    range: token.range,
                    data: NodeData::Operator(op_id, vec![]),
                }),
                Some(_) => Err(ParseError::UnbalancedGroup(token.range)),
                None => {
                    self.errors
                        .push(ParseError::UnknownOperator(symbol, token.range));
                    self.resync_to_close();
                    Ok(Node::leaf(Variant::Nil, token.range))
                }
            },
            TokenKind::LParen => {
                if !allow_ops {
                    self.errors.push(ParseError::InvalidSymbol(
                        CompactString::new("("),
                        token.range,
                    ));
                    self.resync_to_close();
                    return Ok(Node::leaf(Variant::Nil, token.range));
                }
                self.parse_group(token.range)
            }
            TokenKind::Eof => Err(ParseError::UnexpectedEnd(None, token.range)),
            TokenKind::OutputClose { .. } | TokenKind::TagClose { .. } => {
                // Missing operand, e.g. `{{ a + }}`.
                Err(ParseError::UnbalancedGroup(token.range))
            }
            other => {
                self.errors.push(ParseError::InvalidSymbol(
                    CompactString::new(other.to_string()),
                    token.range,
                ));
                Ok(Node::leaf(Variant::Nil, token.range))
            }
        }
    }

    fn parse_prefix(
        &mut self,
        op_id: crate::context::OperatorId,
        priority: i32,
        range: Range,
        allow_ops: bool,
    ) -> Result<Node, ParseError> {
        let operand = self.parse_expr_bp(allow_ops, priority)?;
        let full = range.to(operand.range);
        Ok(Node {
            range: full,
            data: NodeData::Operator(op_id, vec![operand]),
        })
    }

    /// Parses `( … )`. The group materializes as a `Group` node and must
    /// collapse to exactly one contained expression.
    fn parse_group(&mut self, open_range: Range) -> Result<Node, ParseError> {
        self.enter(open_range)?;
        let mut children = vec![self.parse_expression(true, true)?];
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::RParen => break,
                TokenKind::Comma => children.push(self.parse_expression(true, true)?),
                _ => {
                    self.leave();
                    return Err(ParseError::UnbalancedGroup(token.range));
                }
            }
        }
        self.leave();
        let range = open_range.to(self.last_range);
        Self::collapse_group(Node {
            range,
            data: NodeData::Group(children),
        })
    }

    fn collapse_group(node: Node) -> Result<Node, ParseError> {
        match node.data {
            NodeData::Group(mut children) if children.len() == 1 => Ok(children.pop().unwrap()),
            _ => Err(ParseError::UnbalancedGroup(node.range)),
        }
    }

    fn parse_variable_chain(
        &mut self,
        first: CompactString,
        first_range: Range,
    ) -> Result<Node, ParseError> {
        let context = self.context;
        let mut links = vec![Node::leaf(Variant::String(String::from(first)), first_range)];
        let mut dot_filters: Vec<(crate::context::DotFilterId, Range)> = Vec::new();
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Dot) => {
                    self.next_token();
                    let token = self.next_token();
                    let (name, name_range) = match token.kind {
                        TokenKind::Ident(name) => (name, token.range),
                        TokenKind::Eof => {
                            return Err(ParseError::UnexpectedEnd(None, token.range))
                        }
                        other => {
                            self.errors.push(ParseError::InvalidSymbol(
                                CompactString::new(other.to_string()),
                                token.range,
                            ));
                            self.resync_to_close();
                            break;
                        }
                    };
                    if let Some((dot_filter_id, _)) = context.dot_filter(name.as_str()) {
                        dot_filters.push((dot_filter_id, name_range));
                    } else if dot_filters.is_empty() {
                        links.push(Node::leaf(Variant::String(String::from(name)), name_range));
                    } else {
                        // only registered dot filters may follow a dot filter
                        self.errors
                            .push(ParseError::InvalidSymbol(name, name_range));
                        self.resync_to_close();
                        break;
                    }
                }
                Some(TokenKind::LBracket) if dot_filters.is_empty() => {
                    self.next_token();
                    let index = self.parse_expression(true, true)?;
                    let token = self.next_token();
                    if !matches!(token.kind, TokenKind::RBracket) {
                        return Err(ParseError::UnbalancedGroup(token.range));
                    }
                    links.push(index);
                }
                _ => break,
            }
        }

        let mut node = Node {
            range: first_range.to(self.last_range),
            data: NodeData::Variable(links),
        };
        for (dot_filter_id, dot_filter_range) in dot_filters {
            let range = node.range.to(dot_filter_range);
            let arguments = Node {
                range: dot_filter_range,
                data: NodeData::Arguments(vec![]),
            };
            node = Node {
                range,
                data: NodeData::DotFilter(dot_filter_id, vec![node, arguments]),
            };
        }
        Ok(node)
    }

    fn parse_filters(&mut self, mut node: Node, allow_ops: bool) -> Result<Node, ParseError> {
        let context = self.context;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Pipe)) {
            self.next_token();
            let token = self.next_token();
            let (name, name_range) = match token.kind {
                TokenKind::Ident(name) => (name, token.range),
                TokenKind::Eof => return Err(ParseError::UnexpectedEnd(None, token.range)),
                other => {
                    self.errors.push(ParseError::UnknownFilter(
                        CompactString::new(other.to_string()),
                        token.range,
                    ));
                    self.resync_to_close();
                    break;
                }
            };

            let mut items = Vec::new();
            if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Colon)) {
                self.next_token();
                loop {
                    // filter arguments are full expressions, but `|` always
                    // starts the next filter of the chain
                    items.push(self.parse_expression(true, false)?);
                    if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
                        self.next_token();
                    } else {
                        break;
                    }
                }
            }

            match context.filter(name.as_str()) {
                Some((filter_id, _)) => {
                    let arguments = Node {
                        range: name_range.to(self.last_range),
                        data: NodeData::Arguments(items),
                    };
                    let range = node.range.to(self.last_range);
                    node = Node {
                        range,
                        data: NodeData::Filter(filter_id, vec![node, arguments]),
                    };
                }
                None => {
                    let error = ParseError::UnknownFilter(name, name_range);
                    if context.treat_unknown_filters_as_errors() {
                        self.errors.push(error);
                    } else {
                        // demoted: the operand passes through unfiltered
                        self.warnings.push(error);
                    }
                }
            }
        }
        Ok(node)
    }

    /// Re-checks structural invariants and declared argument arities over
    /// the finished tree.
    fn validate(&mut self, node: &Node) {
        let context = self.context;
        match &node.data {
            NodeData::Literal(_) => {}
            NodeData::Group(_) => {
                self.errors.push(ParseError::UnbalancedGroup(node.range));
            }
            NodeData::Output(child) => match &child.data {
                NodeData::Arguments(items) if items.len() == 1 => self.validate(&items[0]),
                _ => self.errors.push(ParseError::InvalidSymbol(
                    CompactString::new("{{"),
                    node.range,
                )),
            },
            NodeData::Tag(tag_id, children) => {
                let tag = context.tag_by_id(*tag_id);
                self.check_argument_count(
                    tag.symbol.clone(),
                    tag.min_args,
                    tag.max_args,
                    node.argument_items().len(),
                    node.range,
                );
                for child in children.iter().skip(1) {
                    self.validate(child);
                }
                for argument in node.argument_items() {
                    self.validate(argument);
                }
            }
            NodeData::Filter(filter_id, children) => {
                let filter = context.filter_by_id(*filter_id);
                self.check_argument_count(
                    filter.symbol.clone(),
                    filter.min_args,
                    filter.max_args,
                    node.argument_items().len(),
                    node.range,
                );
                if let Some(operand) = children.first() {
                    self.validate(operand);
                }
                for argument in node.argument_items() {
                    self.validate(argument);
                }
            }
            NodeData::Operator(op_id, children) => {
                let operator = context.operator_by_id(*op_id);
                let arity_ok = match operator.arity {
                    Arity::Nonary => children.is_empty(),
                    Arity::Unary => children.len() == 1,
                    Arity::Binary => children.len() == 2,
                    Arity::Nary => !children.is_empty(),
                };
                if !arity_ok {
                    self.errors.push(ParseError::InvalidSymbol(
                        operator.symbol.clone(),
                        node.range,
                    ));
                }
                for child in children {
                    self.validate(child);
                }
            }
            NodeData::Variable(links)
            | NodeData::Arguments(links)
            | NodeData::Concatenation(links) => {
                for child in links {
                    self.validate(child);
                }
            }
            NodeData::DotFilter(_, children) => {
                if let Some(operand) = children.first() {
                    self.validate(operand);
                }
            }
        }
    }

    fn check_argument_count(
        &mut self,
        symbol: CompactString,
        min_args: Option<usize>,
        max_args: Option<usize>,
        count: usize,
        range: Range,
    ) {
        if let Some(min) = min_args {
            if count < min {
                self.errors
                    .push(ParseError::TooFewArguments(symbol.clone(), range));
                return;
            }
        }
        if let Some(max) = max_args {
            if count > max {
                self.errors.push(ParseError::TooManyArguments(symbol, range));
            }
        }
    }
}
