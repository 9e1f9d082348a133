//! Compiler from stack definitions to template documents.

use crate::builder::{GraphBuilder, DEFAULT_MAX_DEPTH};
use crate::graph::ResourceGraph;
use crate::registry::Registry;
use crate::resolver::{ReferenceResolver, ResolvedGraph};
use crate::template::{Template, TemplateEmitter};
use halloumi_core::{CompileResult, Environment};
use tracing::{info, info_span};

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Description override; the stack's own description otherwise
    description: Option<String>,
    /// Maximum compound nesting depth
    max_depth: usize,
    /// Indent the JSON output
    pretty: bool,
}

impl CompileOptions {
    /// Create default options
    #[must_use]
    pub fn new() -> Self {
        Self {
            description: None,
            max_depth: DEFAULT_MAX_DEPTH,
            pretty: true,
        }
    }

    /// Override the template description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Limit compound nesting depth
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Choose indented or compact JSON
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Description override, if any
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Maximum compound nesting depth
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether JSON output is indented
    #[must_use]
    pub fn pretty(&self) -> bool {
        self.pretty
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiler for turning registered stacks into templates
///
/// Holds no state between runs; every call builds, resolves, and emits a
/// fresh graph.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    registry: Registry,
    options: CompileOptions,
}

impl Compiler {
    /// Create a compiler over a registry with default options
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            options: CompileOptions::new(),
        }
    }

    /// Replace the compile options
    #[must_use]
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Registered stacks
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Active options
    #[must_use]
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Expand a stack into its flattened resource graph
    ///
    /// # Errors
    ///
    /// Returns error if the stack is unknown or expansion fails
    pub fn build_graph(&self, stack: &str, environment: &Environment) -> CompileResult<ResourceGraph> {
        self.registry.check_compound_cycles()?;
        GraphBuilder::new(&self.registry, environment.clone())
            .with_max_depth(self.options.max_depth)
            .build(stack)
    }

    /// Build and resolve a stack
    ///
    /// # Errors
    ///
    /// Returns error if building or resolution fails
    pub fn resolve(&self, stack: &str, environment: &Environment) -> CompileResult<ResolvedGraph> {
        let graph = self.build_graph(stack, environment)?;
        ReferenceResolver::new(&graph).resolve()
    }

    /// Compile a stack into a template document
    ///
    /// # Errors
    ///
    /// Returns the first error from any phase; no partial template is produced
    pub fn compile(&self, stack: &str, environment: &Environment) -> CompileResult<Template> {
        let _span = info_span!("compile", stack).entered();
        let definition = self.registry.get(stack)?;
        let resolved = self.resolve(stack, environment)?;

        let description = self
            .options
            .description()
            .or(definition.description())
            .unwrap_or_default();
        let template = TemplateEmitter::new()
            .with_description(description)
            .emit(&resolved);
        info!(
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            "compiled"
        );
        Ok(template)
    }

    /// Compile a stack into JSON text, indented unless disabled in the options
    ///
    /// # Errors
    ///
    /// Returns error if compilation or serialization fails
    pub fn compile_to_string(&self, stack: &str, environment: &Environment) -> CompileResult<String> {
        let template = self.compile(stack, environment)?;
        if self.options.pretty {
            template.to_json_pretty()
        } else {
            template.to_json()
        }
    }
}
