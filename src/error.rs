use miette::SourceOffset;

use crate::ast::error::ParseError;
use crate::lexer::error::LexerError;
use crate::range::Range;

#[derive(Debug, thiserror::Error, PartialEq, Clone)]
pub enum InnerError {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A template compilation failure with source-code context.
///
/// Carries every error the parse accumulated; the first one anchors the
/// diagnostic label.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("template error")]
pub struct Error {
    pub cause: InnerError,
    pub span: Range,
    errors: Vec<ParseError>,
    #[source_code]
    source_code: String,
    #[label("{cause}")]
    location: SourceOffset,
}

impl Error {
    pub(crate) fn from_lexer(source: &str, error: LexerError) -> Self {
        let position = error.position();
        let location =
            SourceOffset::from_location(source, position.line as usize, position.column);
        Self {
            cause: InnerError::Lexer(error),
            span: Range::new(position, position),
            errors: Vec::new(),
            source_code: source.to_string(),
            location,
        }
    }

    pub(crate) fn from_parse(source: &str, errors: Vec<ParseError>) -> Self {
        let first = errors
            .first()
            .cloned()
            .expect("a failed parse reports at least one error");
        let span = first.range();
        let location =
            SourceOffset::from_location(source, span.start.line as usize, span.start.column);
        Self {
            cause: InnerError::Parse(first),
            span,
            errors,
            source_code: source.to_string(),
            location,
        }
    }

    /// Every error reported by the parse, in source order.
    pub fn all(&self) -> &[ParseError] {
        &self.errors
    }
}
