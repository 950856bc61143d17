use thiserror::Error;

use crate::range::Range;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    #[error("Maximum memory exceeded")]
    ExceededMemory,
    #[error("Maximum render time exceeded")]
    ExceededTime,
    #[error("Maximum rendering depth exceeded")]
    ExceededDepth,
}

/// A render failure. Rendering halts at the offending node, but everything
/// produced up to that point is preserved in `partial`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} at {}", range.start)]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub range: Range,
    pub partial: String,
}
