//! Halloumi Planner
//!
//! Resource graph compiler that expands stack definitions into uniquely
//! named resource instances, resolves the references between them, and
//! emits a CloudFormation template.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
mod compound;
pub mod compiler;
pub mod dag;
pub mod declaration;
pub mod eval;
pub mod filters;
pub mod graph;
pub mod registry;
pub mod resolver;
pub mod template;

pub use builder::{declaration_order, GraphBuilder, DEFAULT_MAX_DEPTH};
pub use compiler::{CompileOptions, Compiler};
pub use dag::DependencyGraph;
pub use declaration::{
    Amount, Export, OutputDeclaration, PropertyDeclaration, ResourceConfig, ResourceDeclaration,
    ResourceType, StackBuilder, StackDefinition,
};
pub use eval::{InstanceHandle, ReferenceForm, Scope};
pub use graph::{FrameId, InstanceId, ResourceGraph};
pub use registry::Registry;
pub use resolver::{ReferenceResolver, ResolvedGraph, ResolvedOutput, ResolvedResource};
pub use template::{Template, TemplateEmitter, FORMAT_VERSION};

pub use halloumi_core::{CompileError, CompileResult, Environment, LogicalId, Value};
