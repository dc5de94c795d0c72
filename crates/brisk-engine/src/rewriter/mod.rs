//! Binary call-site rewriting
//!
//! Transforms a compiled module image so calls to natively compiled
//! functions bypass managed dispatch and invoke the native entry-point
//! table directly. Invoked once per compiled module by the build pipeline.

pub mod image;
pub mod resolver;
pub mod rewrite;

pub use image::{scan_call_sites, DebugSymbols, FuncRef, FunctionDef, ImageError, ModuleImage, Opcode};
pub use resolver::{ModuleResolver, ResolveError, IMAGE_EXTENSION};
pub use rewrite::{
    BinaryImage, CallSiteRewriter, RewriteError, RewriteInput, RewriteOutcome, INTEROP_MODULE,
};
