//! Halloumi core types
//!
//! Pure types with no I/O shared by the compiler and its front ends:
//! logical identifiers and naming rules, the value model with its template
//! serialization, the environment context, and the error enum.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod env;
pub mod error;
pub mod id;
pub mod value;

// Re-exports
pub use digest::TemplateDigest;
pub use env::Environment;
pub use error::{CompileError, CompileResult, DeclarationKind};
pub use id::{camelize, is_declaration_name, singularize, LogicalId};
pub use value::Value;
