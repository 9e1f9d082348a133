//! Stack registry for looking up stack definitions by name.

use crate::dag::DependencyGraph;
use crate::declaration::{is_provider_tag, ResourceType, StackDefinition};
use halloumi_core::{CompileError, CompileResult, DeclarationKind};
use indexmap::IndexMap;
use std::sync::Arc;

/// Registry of stack definitions
///
/// Definitions are immutable once registered and shared through `Arc`, so
/// one registry can serve any number of compilations.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Registered stacks by name
    stacks: IndexMap<String, Arc<StackDefinition>>,
}

impl Registry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            stacks: IndexMap::new(),
        }
    }

    /// Register a stack definition
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDeclaration` if a stack of the same name is already
    /// registered
    pub fn register(&mut self, stack: StackDefinition) -> CompileResult<()> {
        let name = stack.name().to_string();
        if self.stacks.contains_key(&name) {
            return Err(CompileError::DuplicateDeclaration {
                stack: "registry".to_string(),
                kind: DeclarationKind::Stack,
                name,
            });
        }
        self.stacks.insert(name, Arc::new(stack));
        Ok(())
    }

    /// Builder-style registration
    ///
    /// # Errors
    ///
    /// Same as [`Registry::register`]
    pub fn with(mut self, stack: StackDefinition) -> CompileResult<Self> {
        self.register(stack)?;
        Ok(self)
    }

    /// Get a stack by name
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` if no stack of that name is registered
    pub fn get(&self, name: &str) -> CompileResult<Arc<StackDefinition>> {
        self.stacks
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| CompileError::UnknownStack {
                name: name.to_string(),
            })
    }

    /// Check if a stack is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stacks.contains_key(name)
    }

    /// List registered stack names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stacks.keys().map(String::as_str).collect()
    }

    /// Number of registered stacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Name of the stack a resource type expands into, if it is compound
    #[must_use]
    pub fn compound_target<'t>(&self, resource_type: &'t ResourceType) -> Option<&'t str> {
        match resource_type {
            ResourceType::Compound(name) => Some(name),
            ResourceType::Provider(tag) if !is_provider_tag(tag) && self.contains(tag) => Some(tag),
            ResourceType::Provider(_) => None,
        }
    }

    /// Reject stack types that contain themselves, directly or through
    /// other compound types
    ///
    /// # Errors
    ///
    /// Returns `CyclicCompoundReference` with the offending chain
    pub fn check_compound_cycles(&self) -> CompileResult<()> {
        let mut graph = DependencyGraph::new();
        for (name, stack) in &self.stacks {
            graph.add_node(name.clone());
            for resource in stack.resources() {
                if let Some(target) = self.compound_target(resource.resource_type()) {
                    if self.contains(target) {
                        graph.add_dependency(name.clone(), target.to_string());
                    }
                }
            }
        }

        match graph.find_cycle() {
            Some(chain) => Err(CompileError::CyclicCompoundReference {
                stack: chain.first().cloned().unwrap_or_default(),
                chain,
            }),
            None => Ok(()),
        }
    }
}
