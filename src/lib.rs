//! # Push-based source chaining for Rust
//!
//! This crate provides a reactive source-chain engine: root sources push
//! dynamically-typed items through chains of operator stages, and every
//! stage owns a single-assignment completion handle recording how the
//! stream ended (done, failed, or cancelled).
//!
//! ## Core concepts
//!
//! - **Source**: a push endpoint emitting an ordered sequence of items
//!   and terminating once
//! - **Operator**: consumes a source, returns a derived source
//! - **Completion handle**: the observable terminal state of a source
//! - **Chain**: parents strongly own children, children weakly observe
//!   parents; completion cleans the per-stage callbacks back out
//!
//! ## Example
//!
//! ```rust
//! use pushweld::prelude::*;
//!
//! let items = Source::from(vec![1i64, 2, 3, 4, 5])
//!     .map(|v| Value::Int((v.as_f64() as i64) * (v.as_f64() as i64)))
//!     .prefix("value: ")
//!     .get()
//!     .unwrap();
//! assert_eq!(items[0], Value::from("value: 1"));
//! assert_eq!(items[4], Value::from("value: 25"));
//! ```

pub mod codec;
pub mod error;
pub mod factory;
pub mod handle;
pub mod ops;
pub mod source;
pub mod util;
pub mod value;

// Re-export commonly used items
pub mod prelude {
    pub use crate::codec::{register_decoder, register_encoder, Codec};
    pub use crate::error::{Error, Result};
    pub use crate::factory::FromInput;
    pub use crate::handle::{Failure, Handle};
    pub use crate::ops::{FieldMatcher, FilterSpec, SwitchCases};
    pub use crate::source::{set_handle_factory, Source};
    pub use crate::util::{needs_all, needs_any};
    pub use crate::value::Value;
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
