//! # ns-rootio
//!
//! ROOT TTree basket decoding and fast-path decoder generation for object
//! branches.
//!
//! Baskets are split into entry data and entry offsets (decompressing ZLIB,
//! LZMA, LZ4 or ZSTD blocks as needed). For branches of streamed objects, one
//! pass over an entry builds a tree of code fragments from which a
//! stack-machine program and an Awkward-style [`Form`] are derived; the
//! result is cached per type so later baskets skip the interpreted path.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ns_rootio::{
//!     BasketArray, ClassLayout, ClassRegistry, ObjectInterpretation, Primitive, ReadOptions,
//!     RootDecompressor, Source, TypeDesc,
//! };
//!
//! let registry = ClassRegistry::new().with(
//!     ClassLayout::new("Point", 1)
//!         .with_member("x", TypeDesc::Primitive(Primitive::Float64))
//!         .with_member("y", TypeDesc::Primitive(Primitive::Float64)),
//! );
//! let interp =
//!     ObjectInterpretation::new(TypeDesc::class("Point"), Arc::new(registry), ReadOptions::default());
//!
//! let source = Source::open("events.root").unwrap();
//! for array in interp.read_baskets(&source, &[1024, 9000], &RootDecompressor).unwrap() {
//!     if let BasketArray::Compiled(model) = array {
//!         println!("{}", model.form.to_json().unwrap());
//!         println!("{}", model.program.source());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod basket;
pub mod context;
pub mod cursor;
pub mod decompress;
pub mod error;
pub mod forth;
pub mod interpretation;
pub mod model;
pub mod source;

pub use basket::{Basket, BasketContext, BasketHeader, decode_baskets};
pub use context::{ReadContext, ReadOptions};
pub use cursor::{Cursor, VersionHeader};
pub use decompress::{Algorithm, BlockInfo, Decompressor, RootDecompressor, decompress};
pub use error::{Result, RootError};
pub use forth::{
    CacheConfig, CacheStats, CompiledModel, Content, Form, ForthGenerator, ForthProgram,
    IndexFormat, ModelCache, Node, NodeId, NodeKind,
};
pub use interpretation::{BasketArray, ObjectInterpretation};
pub use model::{ClassLayout, ClassRegistry, Member, Primitive, StringKind, Streamer, TypeDesc, Value};
pub use source::Source;
