//! Reference resolution.
//!
//! Forces every deferred property of every leaf instance, checks that each
//! reference names a leaf in the flattened graph, and orders instances by
//! their dependencies. Explicit `depends_on` entries of a compound instance
//! apply to every leaf nested below it.

use crate::dag::DependencyGraph;
use crate::declaration::Export;
use crate::graph::{Instance, InstanceKind, ResourceGraph};
use halloumi_core::{camelize, CompileError, CompileResult, DeclarationKind, LogicalId, Value};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// A leaf instance with every value resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    /// Assigned logical id
    pub logical_id: LogicalId,
    /// Provider type tag
    pub type_name: String,
    /// Properties keyed by their CamelCase template name, nulls dropped
    pub properties: IndexMap<String, Value>,
    /// Explicit dependencies, emitted as `DependsOn`
    pub depends_on: Vec<LogicalId>,
    /// Explicit and reference-inferred dependencies
    pub dependencies: BTreeSet<LogicalId>,
}

/// A template output
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    /// Output name
    pub name: String,
    /// Output value expression
    pub value: Value,
    /// Export name expression, if exported
    pub export: Option<Value>,
}

/// The resolved graph, ready for emission
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGraph {
    /// Leaf resources in build order
    pub resources: Vec<ResolvedResource>,
    /// Outputs in declaration order, root stack first
    pub outputs: Vec<ResolvedOutput>,
    /// Logical ids ordered so every resource follows its dependencies
    pub creation_order: Vec<LogicalId>,
}

impl ResolvedGraph {
    /// Look up a resolved resource by logical id
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResolvedResource> {
        self.resources.iter().find(|r| r.logical_id.as_str() == id)
    }

    /// Look up a resolved output by name
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&ResolvedOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Resolves a built graph
pub struct ReferenceResolver<'g> {
    graph: &'g ResourceGraph,
}

impl<'g> ReferenceResolver<'g> {
    /// Create a resolver over a built graph
    #[must_use]
    pub fn new(graph: &'g ResourceGraph) -> Self {
        Self { graph }
    }

    /// Resolve every leaf resource and output
    ///
    /// # Errors
    ///
    /// Returns `UnknownResourceReference` for references outside the
    /// flattened graph, `CyclicDependency` if instances depend on themselves,
    /// or any error raised by a deferred block
    pub fn resolve(&self) -> CompileResult<ResolvedGraph> {
        let mut resources = Vec::new();
        for instance in self.graph.instances() {
            if let InstanceKind::Provider(type_name) = &instance.kind {
                resources.push(self.resolve_instance(instance, type_name)?);
            }
        }

        let creation_order = creation_order(&resources)?;
        let outputs = self.resolve_outputs()?;
        debug!(
            resources = resources.len(),
            outputs = outputs.len(),
            "graph resolved"
        );

        Ok(ResolvedGraph {
            resources,
            outputs,
            creation_order,
        })
    }

    fn resolve_instance(&self, instance: &'g Instance, type_name: &str) -> CompileResult<ResolvedResource> {
        let from = instance.logical_id.to_string();
        let mut properties = IndexMap::new();
        let mut dependencies = BTreeSet::new();

        for (name, thunk) in &instance.properties {
            let value = thunk.force(self.graph)?;
            if value.is_null() {
                continue;
            }
            for id in value.references() {
                self.check_leaf(&from, id)?;
                dependencies.insert(id.clone());
            }
            properties.insert(camelize(name), value);
        }

        let mut depends_on = IndexSet::new();
        for holder in self.ancestry(instance) {
            for thunk in &holder.depends_on {
                let value = thunk.force(self.graph)?;
                collect_dependency_ids(&value, &mut depends_on)
                    .map_err(|message| CompileError::block(from.clone(), message))?;
            }
        }
        for id in &depends_on {
            self.check_leaf(&from, id)?;
            dependencies.insert(id.clone());
        }

        trace!(logical_id = %from, dependencies = dependencies.len(), "instance resolved");
        Ok(ResolvedResource {
            logical_id: instance.logical_id.clone(),
            type_name: type_name.to_string(),
            properties,
            depends_on: depends_on.into_iter().collect(),
            dependencies,
        })
    }

    /// The instance followed by the compound instances that own it
    fn ancestry(&self, instance: &'g Instance) -> Vec<&'g Instance> {
        let mut chain = vec![instance];
        let mut frame = self.graph.frame(instance.frame);
        while let Some(owner) = frame.owner {
            let owner = self.graph.instance(owner);
            chain.push(owner);
            frame = self.graph.frame(owner.frame);
        }
        chain
    }

    fn check_leaf(&self, from: &str, id: &LogicalId) -> CompileResult<()> {
        if self.graph.leaf(id).is_some() {
            Ok(())
        } else {
            Err(CompileError::UnknownResourceReference {
                from: from.to_string(),
                id: id.to_string(),
            })
        }
    }

    fn resolve_outputs(&self) -> CompileResult<Vec<ResolvedOutput>> {
        let mut outputs: Vec<ResolvedOutput> = Vec::new();
        for frame in self.graph.frames() {
            for (idx, declaration) in frame.stack.outputs().iter().enumerate() {
                for (handle, value) in self.graph.output_entries(frame.id, idx)? {
                    let mut name = format!("{}{}", handle.logical_id(), camelize(declaration.property()));
                    if let Some(prefix) = &frame.prefix {
                        if !name.starts_with(prefix.as_str()) {
                            name = format!("{}{}", prefix, name);
                        }
                    }

                    if value.is_null() {
                        return Err(CompileError::block(format!("output {}", name), "value is null"));
                    }
                    for id in value.references() {
                        self.check_leaf(&format!("output {}", name), id)?;
                    }
                    if outputs.iter().any(|o| o.name == name) {
                        return Err(CompileError::DuplicateDeclaration {
                            stack: frame.stack.name().to_string(),
                            kind: DeclarationKind::Output,
                            name,
                        });
                    }

                    let export = match declaration.export() {
                        Export::None => None,
                        Export::StackQualified => Some(Value::object([(
                            "Fn::Sub",
                            format!("${{AWS::StackName}}-{}", name),
                        )])),
                        Export::Named(export) => Some(Value::from(export.as_str())),
                    };
                    outputs.push(ResolvedOutput {
                        name,
                        value,
                        export,
                    });
                }
            }
        }
        Ok(outputs)
    }
}

/// Flatten a `depends_on` value into logical ids
fn collect_dependency_ids(value: &Value, ids: &mut IndexSet<LogicalId>) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(id) => {
            ids.insert(LogicalId::new(id.as_str()));
            Ok(())
        }
        Value::Ref(id) | Value::GetAtt { id, .. } => {
            ids.insert(id.clone());
            Ok(())
        }
        Value::List(items) => items
            .iter()
            .try_for_each(|item| collect_dependency_ids(item, ids)),
        other => Err(format!("depends_on expects logical ids, got {:?}", other)),
    }
}

/// Order resources so each one follows everything it depends on
fn creation_order(resources: &[ResolvedResource]) -> CompileResult<Vec<LogicalId>> {
    let mut graph = DependencyGraph::new();
    for resource in resources {
        graph.add_node(resource.logical_id.clone());
    }
    for resource in resources {
        for dependency in &resource.dependencies {
            graph.add_dependency(resource.logical_id.clone(), dependency.clone());
        }
    }
    graph
        .topological_order()
        .map_err(|chain| CompileError::CyclicDependency {
            chain: DependencyGraph::describe_chain(&chain),
        })
}
