//! A frontend for building Gantry IR and lowering it to the static form.
//!
//! The pieces, in pipeline order:
//!
//! - [`frontend::FunctionBuilder`] constructs the dynamic IR: blocks inside
//!   a structured component tree, instructions with lazily resolved
//!   variable reads.
//! - [`ssa::SsaBuilder`] is the def-resolution engine: it finds reaching
//!   defs across blocks and materializes phis at joins, including
//!   loop-carried cycles.
//! - [`determinator`] proves or guards possibly-uninitialized uses,
//!   producing injection records.
//! - [`lower::lower_function`] drives all of the above and emits the flat
//!   [`StaticFunction`](gantry_ir::StaticFunction).

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub mod determinator;
pub mod frontend;
pub mod lower;
pub mod ssa;

pub use crate::frontend::{BuilderValue, FuncInstBuilder, FunctionBuilder};
pub use crate::lower::lower_function;
pub use crate::ssa::SsaBuilder;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
