use nom_locate::LocatedSpan;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A span over the template source.
///
/// Wraps nom's `LocatedSpan` so every token and node can report an exact
/// row/column without the lexer having to count lines by hand.
pub type Span<'a> = LocatedSpan<&'a str>;

/// A position in the template source, as a line and column (both 1-based).
/// Tabs count as a single column.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Hash)]
pub struct Position {
    pub line: u32,
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Position {
    pub fn new(line: u32, column: usize) -> Self {
        Position { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A range in the template source, spanning a start and an end position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Default, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Range { start, end }
    }

    /// The range spanning from the start of `self` to the end of `other`.
    pub fn to(&self, other: Range) -> Range {
        Range {
            start: self.start,
            end: other.end,
        }
    }
}

impl<'a> From<&Span<'a>> for Position {
    fn from(span: &Span<'a>) -> Self {
        Position {
            line: span.location_line(),
            column: span.get_utf8_column(),
        }
    }
}

impl<'a> From<Span<'a>> for Position {
    fn from(span: Span<'a>) -> Self {
        Position::from(&span)
    }
}
