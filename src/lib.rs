//! `brine` is a Liquid-style template engine: templates mixing literal
//! text, output blocks (`{{ … }}`) and control blocks (`{% … %}`) compile
//! into an AST which renders against a caller-supplied variable store.
//!
//! Tag types, operator types (with priority, arity and fixness), filter
//! types and dot filters are registered at runtime into a reusable
//! [`Context`] that is shared across parses and renders; the standard
//! dialect is itself registered through that same API.
//!
//! ## Examples
//!
//! ```rust
//! use brine::{value, Context, Renderer};
//!
//! let context = Context::with_standard_dialect();
//! let template = context.parse("Hello, {{ name }}!").unwrap();
//!
//! let mut store = value!({ "name": "World" });
//! let mut renderer = Renderer::new(&context);
//! assert_eq!(renderer.render(&template, &mut store).unwrap(), "Hello, World!");
//! ```
//!
//! Registering a custom tag:
//!
//! ```rust
//! use brine::{value, Context, Renderer, TagKind, Value};
//!
//! let mut context = Context::with_standard_dialect();
//! context.register_tag("shout", TagKind::Free, Some(1), Some(1), |renderer, node, store| {
//!     let text = renderer.argument(node, store, 0).to_string();
//!     Value::String(text.to_uppercase())
//! });
//!
//! let template = context.parse("{% shout 'hi' %}").unwrap();
//! let mut store = value!({});
//! let mut renderer = Renderer::new(&context);
//! assert_eq!(renderer.render(&template, &mut store).unwrap(), "HI");
//! ```

mod arena;
mod ast;
mod context;
pub mod dialect;
mod error;
mod lexer;
mod optimizer;
mod range;
mod render;
mod value;
mod variable;
mod variant;

pub use arena::{Arena, ArenaId};
pub use ast::error::ParseError;
pub use ast::node::{Node, NodeData};
pub use context::{
    Arity, Context, DotFilterId, DotFilterType, FilterId, FilterType, Fixness, OperatorId,
    OperatorType, RenderFunction, Settings, TagId, TagKind, TagType, Template,
};
pub use error::{Error, InnerError};
pub use lexer::error::LexerError;
pub use lexer::token::{Token, TokenKind};
pub use lexer::Lexer;
pub use optimizer::Optimizer;
pub use range::{Position, Range};
pub use render::error::{RenderError, RenderErrorKind};
pub use render::{Control, Renderer};
pub use value::Value;
pub use variable::{Variable, VariableKind, VariableStore};
pub use variant::Variant;

/// Tokenizes a template against a context's registered operator symbols
/// without parsing it. Mostly useful for tooling and tests.
pub fn tokenize(context: &Context, source: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(context.symbolic_operator_symbols()).tokenize(source)
}
