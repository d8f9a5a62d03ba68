//! Bytecode to structured source: control flow graph, stack simulation, structuring,
//! the syntax tree and its renderer.

pub mod ast;
pub mod cfg;
pub mod cfg_types;
pub mod class_decompiler;
pub mod descriptor;
pub mod expr;
pub mod renderer;
pub mod signature;
pub mod stack_sim;
pub mod structuring;

pub use ast::*;
pub use class_decompiler::{attach_nested, decompile, DecompileOptions, Decompiler};
pub use renderer::{
    DefaultProcessor, Processor, ProcessorRegistry, RenderConfig, RenderContext, RenderMode, RenderState,
    Renderer,
};
