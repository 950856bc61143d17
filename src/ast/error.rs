use compact_str::CompactString;
use thiserror::Error;

use crate::range::Range;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseError {
    #[error("Unexpected end to block{}", fmt_symbol(.0))]
    UnexpectedEnd(Option<CompactString>, Range),
    #[error("Unknown tag `{0}`")]
    UnknownTag(CompactString, Range),
    #[error("Unknown operator `{0}`")]
    UnknownOperator(CompactString, Range),
    #[error("Unknown operator or qualifier `{0}`")]
    UnknownOperatorOrQualifier(CompactString, Range),
    #[error("Unknown filter `{0}`")]
    UnknownFilter(CompactString, Range),
    #[error("Invalid symbol `{0}`")]
    InvalidSymbol(CompactString, Range),
    #[error("Unbalanced end to group")]
    UnbalancedGroup(Range),
    #[error("Maximum parse depth exceeded")]
    ExceededDepth(Range),
    #[error("Too few arguments to `{0}`")]
    TooFewArguments(CompactString, Range),
    #[error("Too many arguments to `{0}`")]
    TooManyArguments(CompactString, Range),
}

impl ParseError {
    pub fn range(&self) -> Range {
        match self {
            ParseError::UnexpectedEnd(_, range)
            | ParseError::UnknownTag(_, range)
            | ParseError::UnknownOperator(_, range)
            | ParseError::UnknownOperatorOrQualifier(_, range)
            | ParseError::UnknownFilter(_, range)
            | ParseError::InvalidSymbol(_, range)
            | ParseError::UnbalancedGroup(range)
            | ParseError::ExceededDepth(range)
            | ParseError::TooFewArguments(_, range)
            | ParseError::TooManyArguments(_, range) => *range,
        }
    }
}

fn fmt_symbol(symbol: &Option<CompactString>) -> String {
    match symbol {
        Some(symbol) => format!(" `{}`", symbol),
        None => String::new(),
    }
}
