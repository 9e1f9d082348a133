//! Resource graph builder.
//!
//! Expands the resource declarations of a stack into instances. Properties
//! are resolved first, then declarations are built in dependency order so a
//! dynamic count only runs once every declaration it reads is complete.

use crate::compound;
use crate::dag::DependencyGraph;
use crate::declaration::{is_provider_tag, Amount, ResourceConfig, ResourceType, StackDefinition};
use crate::eval::Scope;
use crate::graph::{FrameId, InstanceKind, Members, Phase, ResourceGraph};
use crate::registry::Registry;
use halloumi_core::{CompileError, CompileResult, Environment, LogicalId};
use tracing::{debug, debug_span, trace};

/// Default maximum compound nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Builds the flattened resource graph of a root stack
pub struct GraphBuilder<'r> {
    pub(crate) registry: &'r Registry,
    pub(crate) max_depth: usize,
    pub(crate) graph: ResourceGraph,
}

impl<'r> GraphBuilder<'r> {
    /// Create a builder over a registry
    #[must_use]
    pub fn new(registry: &'r Registry, environment: Environment) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
            graph: ResourceGraph::new(environment),
        }
    }

    /// Limit compound nesting depth
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand the named root stack
    ///
    /// # Errors
    ///
    /// Returns the first error raised by property resolution, count
    /// evaluation, type resolution, or compound expansion
    pub fn build(mut self, root: &str) -> CompileResult<ResourceGraph> {
        let stack = self.registry.get(root)?;
        let frame = self.graph.push_frame(stack, None, None, 0, &[]);
        self.build_frame(frame, &mut vec![root.to_string()])?;
        debug!(instances = self.graph.len(), frames = self.graph.frame_count(), "graph built");
        Ok(self.graph)
    }

    /// Build one frame: properties, then declarations in dependency order
    pub(crate) fn build_frame(&mut self, frame: FrameId, chain: &mut Vec<String>) -> CompileResult<()> {
        let stack = std::sync::Arc::clone(&self.graph.frame(frame).stack);
        let label = self.graph.frame(frame).label();
        let _span = debug_span!("build_stack", stack = stack.name(), label = %label).entered();

        for property in stack.properties() {
            let value = self.graph.property_value(frame, property.name())?;
            trace!(property = property.name(), ?value, "property resolved");
        }
        self.graph.frame_mut(frame).phase = Phase::Resources;

        for idx in declaration_order(&stack)? {
            if matches!(self.graph.frame(frame).members[idx], Members::Bound(_)) {
                trace!(resource = stack.resources()[idx].name(), "bound by parent");
                continue;
            }
            self.build_declaration(frame, &stack, idx, chain)?;
        }
        self.graph.frame_mut(frame).building = None;
        Ok(())
    }

    fn build_declaration(
        &mut self,
        frame: FrameId,
        stack: &StackDefinition,
        idx: usize,
        chain: &mut Vec<String>,
    ) -> CompileResult<()> {
        let declaration = &stack.resources()[idx];
        let kind = self.resolve_type(stack, idx)?;
        self.graph.frame_mut(frame).building = Some(idx);

        let count = match declaration.instance_amount() {
            Amount::Literal(count) => *count,
            Amount::Dynamic { block, .. } => block(&Scope::new(&self.graph, frame, None, 0))?,
        };
        debug!(resource = declaration.name(), count, "instance count resolved");

        let prefix = self.graph.frame(frame).prefix.clone();
        let base = declaration.logical_base();
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let mut config = ResourceConfig::default();
            if let Some(configure) = declaration.configure_fn() {
                configure(&mut config, index);
            }
            let local = LogicalId::for_instance(&base, index, count);
            let logical_id = match &prefix {
                Some(owner) => local.nested_under(owner),
                None => local,
            };
            if matches!(kind, InstanceKind::Provider(_)) {
                if let Some(name) = config.bindings.keys().next() {
                    return Err(CompileError::UnknownReference {
                        context: format!("resources of {}", logical_id),
                        name: name.clone(),
                    });
                }
            }
            trace!(%logical_id, index, "instance created");
            ids.push(self.graph.push_instance(frame, idx, index, logical_id, kind.clone(), config)?);
        }
        self.graph.frame_mut(frame).members[idx] = Members::Built(ids.clone());

        if let InstanceKind::Compound(nested) = kind {
            for id in ids {
                compound::expand(self, id, &nested, chain)?;
            }
        }
        Ok(())
    }

    fn resolve_type(&self, stack: &StackDefinition, idx: usize) -> CompileResult<InstanceKind> {
        let declaration = &stack.resources()[idx];
        let resource_type = declaration.resource_type();
        if let Some(target) = self.registry.compound_target(resource_type) {
            if self.registry.contains(target) {
                return Ok(InstanceKind::Compound(target.to_string()));
            }
        }
        match resource_type {
            ResourceType::Provider(tag) if is_provider_tag(tag) => {
                Ok(InstanceKind::Provider(tag.clone()))
            }
            _ => Err(CompileError::UnknownResourceType {
                stack: stack.name().to_string(),
                declaration: declaration.name().to_string(),
                type_name: resource_type.name().to_string(),
            }),
        }
    }
}

/// Order resource declarations so every declaration follows the ones it reads
///
/// # Errors
///
/// Returns `CyclicDependency` naming the declarations on the cycle
pub fn declaration_order(stack: &StackDefinition) -> CompileResult<Vec<usize>> {
    let resources = stack.resources();
    let mut graph = DependencyGraph::new();
    for declaration in resources {
        graph.add_node(declaration.name().to_string());
    }
    for declaration in resources {
        for read in declaration.dependencies() {
            if let Some(accessor) = stack.accessor(read) {
                graph.add_dependency(
                    declaration.name().to_string(),
                    resources[accessor.declaration].name().to_string(),
                );
            }
        }
    }

    let order = graph
        .topological_order()
        .map_err(|chain| CompileError::CyclicDependency { chain })?;
    Ok(order
        .iter()
        .filter_map(|name| resources.iter().position(|r| r.name() == name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{PropertyDeclaration, ResourceDeclaration};
    use halloumi_core::Value;

    fn subnet() -> ResourceType {
        ResourceType::provider("AWS::EC2::Subnet")
    }

    fn build(stack: StackDefinition) -> CompileResult<ResourceGraph> {
        let registry = Registry::new().with(stack)?;
        GraphBuilder::new(&registry, Environment::new()).build("Stack")
    }

    fn ids(graph: &ResourceGraph) -> Vec<String> {
        graph.logical_ids().map(ToString::to_string).collect()
    }

    #[test]
    fn test_declaration_order_follows_reads() {
        let stack = StackDefinition::builder("Stack")
            .resource(
                ResourceDeclaration::new("associations", subnet())
                    .amount_from(Amount::dynamic(["public_subnets"], |_| Ok(0))),
            )
            .resource(ResourceDeclaration::new("vpcs", subnet()))
            .resource(ResourceDeclaration::new("public_subnets", subnet()))
            .build()
            .unwrap();
        assert_eq!(declaration_order(&stack).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_literal_amount_ids() {
        let graph = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC")))
                .resource(ResourceDeclaration::new("subnets", subnet()).amount(3))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(ids(&graph), vec!["Vpc", "Subnet1", "Subnet2", "Subnet3"]);
    }

    #[test]
    fn test_zero_amount_creates_nothing() {
        let graph = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("subnets", subnet()).amount(0))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_dynamic_amount_reads_property() {
        let graph = build(
            StackDefinition::builder("Stack")
                .property(PropertyDeclaration::new("subnet_count").default_value(2))
                .resource(ResourceDeclaration::new("subnets", subnet()).amount_from(
                    Amount::dynamic(Vec::<String>::new(), |scope| {
                        let count = scope.property("subnet_count")?;
                        count
                            .as_i64()
                            .and_then(|n| usize::try_from(n).ok())
                            .ok_or_else(|| scope.fail("subnet_count is not a count"))
                    }),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(ids(&graph), vec!["Subnet1", "Subnet2"]);
    }

    #[test]
    fn test_undeclared_forward_read_is_cyclic() {
        let err = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("associations", subnet()).amount_from(
                    Amount::dynamic(Vec::<String>::new(), |scope| {
                        Ok(scope.resources("public_subnets")?.len())
                    }),
                ))
                .resource(ResourceDeclaration::new("public_subnets", subnet()).amount(3))
                .build()
                .unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicDependency {
                chain: vec!["Stack.associations".to_string(), "public_subnets".to_string()],
            }
        );
    }

    #[test]
    fn test_property_block_cannot_see_resources() {
        let err = build(
            StackDefinition::builder("Stack")
                .property(PropertyDeclaration::new("vpc_id").block(|scope| {
                    Ok(scope.resource("vpc")?.reference())
                }))
                .resource(ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC")))
                .build()
                .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnknownReference { ref name, .. } if name == "vpc"));
    }

    #[test]
    fn test_unknown_provider_type() {
        let err = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("things", ResourceType::provider("NotAType")))
                .build()
                .unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownResourceTypeError");
    }

    #[test]
    fn test_unknown_compound_type() {
        let err = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("bases", ResourceType::compound("Missing")))
                .build()
                .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownResourceType { ref type_name, .. } if type_name == "Missing"
        ));
    }

    #[test]
    fn test_binding_on_leaf_is_rejected() {
        let err = build(
            StackDefinition::builder("Stack")
                .resource(
                    ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC"))
                        .configure(|r, _| {
                            r.resources("subnets", |scope| Err(scope.fail("never evaluated")));
                        }),
                )
                .build()
                .unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownReference {
                context: "resources of Vpc".to_string(),
                name: "subnets".to_string(),
            }
        );
    }

    #[test]
    fn test_configure_runs_per_index() {
        let graph = build(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("subnets", subnet()).amount(2).configure(
                    |r, index| {
                        r.literal("cidr_block", format!("10.0.{}.0/24", index));
                    },
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        let second = graph.find(&LogicalId::new("Subnet2")).unwrap();
        assert_eq!(
            graph.read_property(second.id, "cidr_block").unwrap(),
            Value::from("10.0.1.0/24")
        );
    }
}
