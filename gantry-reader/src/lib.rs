//! Reader for the Gantry static textual IR.
//!
//! The printer in `gantry_ir::write` and this parser agree on one grammar:
//! parsing a printed function and printing it again reproduces the text.
//! This is what the lowering tests lean on for their round-trip property,
//! and it doubles as a debugging tool for hand-written static programs.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

mod error;
mod lexer;
mod parser;

pub use crate::error::{Location, ParseError, ParseResult};
pub use crate::lexer::{tokenize_line, Token};
pub use crate::parser::parse_function;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
