//! A decompiler for [Java Classfiles](https://docs.oracle.com/javase/specs/jvms/se10/html/jvms-4.html).
//!
//! Class bytes are read with `binrw`, method bodies are decoded into instructions and
//! rebuilt into a tree of structured nodes, and a [`Renderer`] turns that tree into
//! Java-like text.
//!
//! ```rust,no_run
//! let bytes = std::fs::read("Example.class").unwrap();
//! let decl = classfile_decompiler::decompile(&bytes).unwrap();
//! let text = classfile_decompiler::Renderer::default()
//!     .render(&classfile_decompiler::Node::Type(decl));
//! println!("{text}");
//! ```

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod code_attribute;
pub mod constant_info;
pub mod decompile;
pub mod error;
pub mod field_info;
pub mod metadata;
pub mod method_info;
pub mod types;

pub use code_attribute::{decode, decode_lenient, DecodedCode, Instruction};
pub use decompile::{
    attach_nested, decompile, DecompileOptions, Decompiler, Node, NodeKind, Processor, ProcessorRegistry,
    RenderConfig, RenderContext, RenderMode, Renderer, TypeDeclaration,
};
pub use error::{DecompileError, Result};
pub use metadata::MetadataTable;
pub use types::*;
