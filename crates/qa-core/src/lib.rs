//! qa-core - Core types and traits for the grounded QA pipeline
//!
//! This crate provides the domain types, collaborator traits, error
//! handling, configuration and answer stream protocol shared by the other
//! qa crates.

pub mod config;
pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{QaError, Result};
pub use protocol::{AnswerReader, Frame, FrameDecoder, LineBuffer};
pub use traits::*;
pub use types::*;
