//! Compound resource expansion.
//!
//! A compound instance owns a nested frame built from another stack
//! definition. Nested logical ids are prefixed with the owner's logical id,
//! so the same stack type can be reused at any number of call sites.

use crate::builder::GraphBuilder;
use crate::eval::{InstanceHandle, Scope};
use crate::graph::{InstanceId, Members};
use halloumi_core::{CompileError, CompileResult};
use tracing::debug_span;

/// Expand `owner` into a nested frame for stack `stack_name`
///
/// `chain` holds the stack names currently being expanded, root first.
pub(crate) fn expand(
    builder: &mut GraphBuilder<'_>,
    owner: InstanceId,
    stack_name: &str,
    chain: &mut Vec<String>,
) -> CompileResult<()> {
    if let Some(pos) = chain.iter().position(|s| s == stack_name) {
        let mut cycle = chain[pos..].to_vec();
        cycle.push(stack_name.to_string());
        return Err(CompileError::CyclicCompoundReference {
            stack: stack_name.to_string(),
            chain: cycle,
        });
    }

    let instance = builder.graph.instance(owner);
    let parent = instance.frame;
    let depth = builder.graph.frame(parent).depth + 1;
    if depth > builder.max_depth {
        let mut cycle = chain.clone();
        cycle.push(stack_name.to_string());
        return Err(CompileError::CyclicCompoundReference {
            stack: stack_name.to_string(),
            chain: cycle,
        });
    }

    let nested = builder.registry.get(stack_name)?;
    let logical_id = instance.logical_id.clone();
    let _span = debug_span!("expand_compound", owner = %logical_id, stack = stack_name, depth).entered();

    let context = |what: &str| format!("{} of {} ({})", what, logical_id, stack_name);

    let mut bound: Vec<(usize, Vec<InstanceHandle>)> = Vec::new();
    for (name, block) in &instance.bindings {
        let declaration = nested
            .resource(name)
            .and_then(|_| nested.accessor(name))
            .ok_or_else(|| CompileError::UnknownReference {
                context: context("resources"),
                name: name.clone(),
            })?;
        let scope = Scope::new(&builder.graph, parent, Some(owner), instance.index);
        bound.push((declaration.declaration, block(&scope)?));
    }

    let mut inherited = Vec::new();
    for name in instance.properties.keys() {
        if nested.property(name).is_none() {
            return Err(CompileError::UnknownReference {
                context: context("properties"),
                name: name.clone(),
            });
        }
        inherited.push(name.clone());
    }

    let frame = builder
        .graph
        .push_frame(nested, Some(owner), Some(logical_id), depth, &inherited);
    for (declaration, handles) in bound {
        builder.graph.frame_mut(frame).members[declaration] = Members::Bound(handles);
    }
    builder.graph.instance_mut(owner).nested = Some(frame);

    chain.push(stack_name.to_string());
    let result = builder.build_frame(frame, chain);
    chain.pop();
    result
}

#[cfg(test)]
mod tests {
    use crate::builder::GraphBuilder;
    use crate::declaration::{
        Amount, OutputDeclaration, PropertyDeclaration, ResourceDeclaration, ResourceType,
        StackDefinition,
    };
    use crate::registry::Registry;
    use halloumi_core::{CompileError, Environment, LogicalId, Value};

    fn bases() -> StackDefinition {
        StackDefinition::builder("BasesShizzle")
            .property(PropertyDeclaration::new("cidr").default_value("10.0.0.0/16"))
            .resource(
                ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC"))
                    .configure(|r, _| {
                        r.property("cidr_block", |scope| scope.property("cidr"));
                    }),
            )
            .resource(
                ResourceDeclaration::new("subnets", ResourceType::provider("AWS::EC2::Subnet"))
                    .amount(2)
                    .configure(|r, index| {
                        r.property("vpc_id", |scope| Ok(scope.resource("vpc")?.reference()));
                        r.literal("cidr_block", format!("10.0.{}.0/24", index));
                    }),
            )
            .output(OutputDeclaration::new("vpc", "id").block(|_, vpc| Ok(vpc.reference())))
            .build()
            .unwrap()
    }

    fn registry(root: StackDefinition) -> Registry {
        Registry::new().with(bases()).unwrap().with(root).unwrap()
    }

    #[test]
    fn test_nested_ids_are_prefixed() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle")))
                .build()
                .unwrap(),
        );
        let graph = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap();
        let ids: Vec<String> = graph.logical_ids().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["Base", "BaseVpc", "BaseSubnet1", "BaseSubnet2"]);
        assert_eq!(graph.frame_count(), 2);
    }

    #[test]
    fn test_reused_compound_ids_are_disjoint() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(
                    ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle")).amount(2),
                )
                .build()
                .unwrap(),
        );
        let graph = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap();
        let ids: Vec<String> = graph.logical_ids().map(ToString::to_string).collect();
        assert!(ids.contains(&"Base1Vpc".to_string()));
        assert!(ids.contains(&"Base2Vpc".to_string()));
        let unique: std::collections::BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_parent_supplies_nested_property() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(
                    ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle"))
                        .configure(|r, _| {
                            r.literal("cidr", "10.9.0.0/16");
                        }),
                )
                .build()
                .unwrap(),
        );
        let graph = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap();
        let vpc = graph.find(&LogicalId::new("BaseVpc")).unwrap();
        assert_eq!(
            graph.read_property(vpc.id, "cidr_block").unwrap(),
            Value::from("10.9.0.0/16")
        );
    }

    #[test]
    fn test_nested_output_exposed_to_parent() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle")))
                .build()
                .unwrap(),
        );
        let graph = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap();
        let base = graph.find(&LogicalId::new("Base")).unwrap();
        assert_eq!(graph.read_property(base.id, "vpc_id").unwrap(), Value::reference("BaseVpc"));
        assert_eq!(graph.read_property(base.id, "cidr").unwrap(), Value::from("10.0.0.0/16"));
    }

    fn group_registry(count: usize) -> Registry {
        let group = StackDefinition::builder("Group")
            .property(PropertyDeclaration::new("subnet_count").default_value(1))
            .resource(
                ResourceDeclaration::new("subnets", ResourceType::provider("AWS::EC2::Subnet"))
                    .amount_from(Amount::dynamic(Vec::<String>::new(), |scope| {
                        let count = scope.property("subnet_count")?;
                        count
                            .as_i64()
                            .and_then(|n| usize::try_from(n).ok())
                            .ok_or_else(|| scope.fail("subnet_count is not a count"))
                    })),
            )
            .resource(ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC")))
            .output(OutputDeclaration::new("subnets", "id").block(|_, subnet| Ok(subnet.reference())))
            .output(OutputDeclaration::new("vpc", "id").block(|_, vpc| Ok(vpc.reference())))
            .build()
            .unwrap();
        let root = StackDefinition::builder("Stack")
            .resource(
                ResourceDeclaration::new("groups", ResourceType::compound("Group")).configure(
                    move |r, _| {
                        r.literal("subnet_count", count);
                    },
                ),
            )
            .build()
            .unwrap();
        Registry::new().with(group).unwrap().with(root).unwrap()
    }

    #[test]
    fn test_plural_output_is_always_a_list() {
        let expected = [
            Value::list(Vec::<Value>::new()),
            Value::list([Value::reference("GroupSubnet")]),
            Value::list([Value::reference("GroupSubnet1"), Value::reference("GroupSubnet2")]),
        ];
        for (count, expected) in expected.into_iter().enumerate() {
            let registry = group_registry(count);
            let graph = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap();
            let group = graph.find(&LogicalId::new("Group")).unwrap();
            assert_eq!(graph.read_property(group.id, "subnets_id").unwrap(), expected);
            assert_eq!(graph.read_property(group.id, "vpc_id").unwrap(), Value::reference("GroupVpc"));
        }
    }

    #[test]
    fn test_unknown_nested_property() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(
                    ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle"))
                        .configure(|r, _| {
                            r.literal("color", "blue");
                        }),
                )
                .build()
                .unwrap(),
        );
        let err = GraphBuilder::new(&registry, Environment::new()).build("Stack").unwrap_err();
        assert!(matches!(err, CompileError::UnknownReference { ref name, .. } if name == "color"));
    }

    #[test]
    fn test_self_containing_compound() {
        let registry = Registry::new()
            .with(
                StackDefinition::builder("Loop")
                    .resource(ResourceDeclaration::new("loops", ResourceType::compound("Loop")))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = GraphBuilder::new(&registry, Environment::new()).build("Loop").unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicCompoundReference {
                stack: "Loop".to_string(),
                chain: vec!["Loop".to_string(), "Loop".to_string()],
            }
        );
    }

    #[test]
    fn test_depth_guard() {
        let registry = registry(
            StackDefinition::builder("Stack")
                .resource(ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle")))
                .build()
                .unwrap(),
        );
        let err = GraphBuilder::new(&registry, Environment::new())
            .with_max_depth(0)
            .build("Stack")
            .unwrap_err();
        assert_eq!(err.kind(), "CyclicCompoundReferenceError");
    }
}
