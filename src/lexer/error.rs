use thiserror::Error;

use crate::range::Position;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum LexerError {
    #[error("Unexpected end of template")]
    UnexpectedEof(Position),
}

impl LexerError {
    pub fn position(&self) -> Position {
        match self {
            LexerError::UnexpectedEof(position) => *position,
        }
    }
}
