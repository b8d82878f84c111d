//! Fast-path decoder generation.
//!
//! Per-type contributors build a [`Node`] tree through a [`ForthGenerator`];
//! the frozen tree is linearized into a [`ForthProgram`] for an external
//! stack machine and its output schema is derived as a [`Form`].

pub mod cache;
pub mod form;
pub mod generator;
pub mod node;
pub mod program;

pub use cache::{CacheConfig, CacheStats, ModelCache};
pub use form::{Content, Form, IndexFormat, Parameters};
pub use generator::{ForthGenerator, NodeId};
pub use node::{Node, NodeKind};
pub use program::{CompiledModel, ForthProgram};
