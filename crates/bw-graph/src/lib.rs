//! Block graph model
//!
//! This crate holds the in-memory representation of one automation program
//! (a tab): the blocks parsed from the editor's persisted JSON, their links
//! and the raw tagged inputs, plus the decoding of those inputs into the
//! [`InputVariant`] union consumed by the interpreter.
//!
//! # Key Types
//!
//! - [`Block`] - One node of the program graph
//! - [`BlockGraph`] - All blocks of one tab, addressable by id
//! - [`InputVariant`] - Decoded form of a raw input

pub mod graph;
pub mod input;
pub mod wire;

pub use graph::{Block, BlockGraph, Field, Mutation};
pub use input::{DecodedInput, InputTag, InputVariant, PrimitiveKind, PrimitiveValue};
pub use wire::is_empty_content;
