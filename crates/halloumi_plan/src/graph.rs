//! The flattened resource graph.
//!
//! One [`Frame`] exists per stack expansion: the root stack plus one per
//! compound instance. Instances of every frame live in a single arena so
//! logical ids can be checked for global uniqueness and references can be
//! followed across nesting levels.

use crate::declaration::{AccessorForm, BindingBlock, ResourceConfig, StackDefinition};
use crate::eval::{EvalGuard, InstanceHandle, Scope, Thunk};
use halloumi_core::{CompileError, CompileResult, Environment, LogicalId, Value};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Index of an instance in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) usize);

/// Index of a stack expansion in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) usize);

/// Build phase of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Stack properties are being resolved; resources are not visible
    Properties,
    /// Resource declarations are being expanded
    Resources,
}

/// Build state of one resource declaration inside a frame
#[derive(Debug, Clone)]
pub(crate) enum Members {
    /// Not built yet
    Pending,
    /// Expanded into these instances
    Built(Vec<InstanceId>),
    /// Supplied by the parent stack instead of being expanded
    Bound(Vec<InstanceHandle>),
}

/// Resolution slot of a stack property
#[derive(Debug)]
pub(crate) struct PropertySlot {
    pub(crate) declaration: usize,
    /// Compound instance supplying a value for this property
    pub(crate) inherited: Option<InstanceId>,
    pub(crate) cell: OnceCell<Value>,
}

/// One stack expansion
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) id: FrameId,
    pub(crate) stack: Arc<StackDefinition>,
    pub(crate) owner: Option<InstanceId>,
    pub(crate) prefix: Option<LogicalId>,
    pub(crate) depth: usize,
    pub(crate) properties: IndexMap<String, PropertySlot>,
    pub(crate) members: Vec<Members>,
    pub(crate) phase: Phase,
    pub(crate) building: Option<usize>,
    pub(crate) outputs: Vec<OnceCell<Vec<(InstanceHandle, Value)>>>,
}

impl Frame {
    /// Owner logical id for nested frames, stack name for the root
    pub(crate) fn label(&self) -> String {
        match &self.prefix {
            Some(prefix) => prefix.to_string(),
            None => self.stack.name().to_string(),
        }
    }
}

/// What an instance is emitted as
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InstanceKind {
    /// Leaf resource with its provider type tag
    Provider(String),
    /// Expands into the named stack
    Compound(String),
}

/// A concrete resource instance
pub(crate) struct Instance {
    pub(crate) frame: FrameId,
    pub(crate) declaration: usize,
    pub(crate) index: usize,
    pub(crate) logical_id: LogicalId,
    pub(crate) kind: InstanceKind,
    pub(crate) properties: IndexMap<String, Thunk>,
    pub(crate) depends_on: Vec<Thunk>,
    pub(crate) bindings: IndexMap<String, BindingBlock>,
    pub(crate) nested: Option<FrameId>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("logical_id", &self.logical_id)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("properties", &self.properties)
            .field("nested", &self.nested)
            .finish_non_exhaustive()
    }
}

/// Fully expanded graph of one compilation run
#[derive(Debug)]
pub struct ResourceGraph {
    environment: Environment,
    frames: Vec<Frame>,
    instances: Vec<Instance>,
    logical_ids: IndexMap<LogicalId, InstanceId>,
    guard: EvalGuard,
}

impl ResourceGraph {
    pub(crate) fn new(environment: Environment) -> Self {
        Self {
            environment,
            frames: Vec::new(),
            instances: Vec::new(),
            logical_ids: IndexMap::new(),
            guard: EvalGuard::default(),
        }
    }

    /// Environment the graph was built with
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Number of instances, leaf and compound
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if no instance was created
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of stack expansions, including the root
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Logical ids of all instances in creation order
    pub fn logical_ids(&self) -> impl Iterator<Item = &LogicalId> {
        self.logical_ids.keys()
    }

    /// Look up an instance by logical id
    #[must_use]
    pub fn find(&self, id: &LogicalId) -> Option<InstanceHandle> {
        self.logical_ids.get(id).map(|idx| self.handle(*idx))
    }

    /// Provider type of a leaf instance
    #[must_use]
    pub fn type_of(&self, id: &LogicalId) -> Option<&str> {
        let idx = self.logical_ids.get(id)?;
        match &self.instance(*idx).kind {
            InstanceKind::Provider(tag) => Some(tag),
            InstanceKind::Compound(_) => None,
        }
    }

    pub(crate) fn guard(&self) -> &EvalGuard {
        &self.guard
    }

    pub(crate) fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub(crate) fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub(crate) fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.0]
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> &mut Instance {
        &mut self.instances[id.0]
    }

    pub(crate) fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub(crate) fn leaf(&self, id: &LogicalId) -> Option<&Instance> {
        self.logical_ids
            .get(id)
            .map(|idx| self.instance(*idx))
            .filter(|instance| matches!(instance.kind, InstanceKind::Provider(_)))
    }

    pub(crate) fn handle(&self, id: InstanceId) -> InstanceHandle {
        let instance = self.instance(id);
        InstanceHandle::new(
            id,
            instance.logical_id.clone(),
            instance.index,
            matches!(instance.kind, InstanceKind::Compound(_)),
        )
    }

    /// Add a frame for `stack`. Properties listed in `inherited` take their
    /// value from the given compound instance.
    pub(crate) fn push_frame(
        &mut self,
        stack: Arc<StackDefinition>,
        owner: Option<InstanceId>,
        prefix: Option<LogicalId>,
        depth: usize,
        inherited: &[String],
    ) -> FrameId {
        let id = FrameId(self.frames.len());
        let properties = stack
            .properties()
            .iter()
            .enumerate()
            .map(|(declaration, property)| {
                let slot = PropertySlot {
                    declaration,
                    inherited: owner.filter(|_| inherited.iter().any(|n| n == property.name())),
                    cell: OnceCell::new(),
                };
                (property.name().to_string(), slot)
            })
            .collect();
        let members = vec![Members::Pending; stack.resources().len()];
        let outputs = stack.outputs().iter().map(|_| OnceCell::new()).collect();

        self.frames.push(Frame {
            id,
            stack,
            owner,
            prefix,
            depth,
            properties,
            members,
            phase: Phase::Properties,
            building: None,
            outputs,
        });
        id
    }

    /// Add an instance configured by `config`
    ///
    /// # Errors
    ///
    /// Returns `DuplicateLogicalId` if the id is already taken
    pub(crate) fn push_instance(
        &mut self,
        frame: FrameId,
        declaration: usize,
        index: usize,
        logical_id: LogicalId,
        kind: InstanceKind,
        config: ResourceConfig,
    ) -> CompileResult<InstanceId> {
        let id = InstanceId(self.instances.len());
        if let Some(existing) = self.logical_ids.get(&logical_id) {
            let existing = self.instance(*existing);
            return Err(CompileError::DuplicateLogicalId {
                id: logical_id.to_string(),
                first: self.describe(existing.frame, existing.declaration, existing.index),
                second: self.describe(frame, declaration, index),
            });
        }

        let properties = config
            .properties
            .into_iter()
            .map(|(name, block)| {
                let key = format!("{}.{}", logical_id, name);
                (name, Thunk::new(key, block, frame, id, index))
            })
            .collect();
        let depends_on = config
            .depends_on
            .into_iter()
            .enumerate()
            .map(|(n, block)| {
                let key = format!("{}.depends_on[{}]", logical_id, n);
                Thunk::new(key, block, frame, id, index)
            })
            .collect();

        self.logical_ids.insert(logical_id.clone(), id);
        self.instances.push(Instance {
            frame,
            declaration,
            index,
            logical_id,
            kind,
            properties,
            depends_on,
            bindings: config.bindings,
            nested: None,
        });
        Ok(id)
    }

    fn describe(&self, frame: FrameId, declaration: usize, index: usize) -> String {
        let frame = self.frame(frame);
        format!(
            "{}.{}[{}]",
            frame.label(),
            frame.stack.resources()[declaration].name(),
            index
        )
    }

    /// Resolve a stack property of a frame, `None` if it is not declared
    ///
    /// Override chain: environment, then the value supplied by the owning
    /// compound instance, then the block, then the default.
    pub(crate) fn property_value(&self, frame: FrameId, name: &str) -> CompileResult<Option<Value>> {
        let frame = self.frame(frame);
        let Some(slot) = frame.properties.get(name) else {
            return Ok(None);
        };
        if let Some(value) = slot.cell.get() {
            return Ok(Some(value.clone()));
        }

        let _entered = self.guard.enter(&format!("{}:{}", frame.label(), name))?;
        let declaration = &frame.stack.properties()[slot.declaration];
        let stack = frame.stack.name();

        let mut raw = match declaration.env_key().and_then(|key| self.environment.get(key)) {
            Some(value) => Value::from(value),
            None => Value::Null,
        };
        if raw.is_null() {
            if let Some(owner) = slot.inherited {
                raw = self.read_property(owner, name)?;
            }
        }
        if raw.is_null() {
            if let Some(block) = declaration.block_fn() {
                raw = block(&Scope::new(self, frame.id, None, 0))?;
            }
        }
        if raw.is_null() {
            raw = declaration.default().cloned().unwrap_or_default();
        }

        let value = if raw.is_null() {
            if declaration.is_required() {
                return Err(CompileError::MissingRequiredProperty {
                    stack: stack.to_string(),
                    property: name.to_string(),
                });
            }
            Value::Null
        } else {
            match declaration.filter_fn() {
                Some(filter) => filter(raw).map_err(|reason| CompileError::PropertyFilter {
                    stack: stack.to_string(),
                    property: name.to_string(),
                    reason,
                })?,
                None => raw,
            }
        };

        Ok(Some(slot.cell.get_or_init(|| value).clone()))
    }

    /// Read a property of an instance
    ///
    /// Leaf and compound instances answer with the properties set by their
    /// configuration block. Compound instances additionally expose the
    /// outputs and properties of their nested stack.
    pub(crate) fn read_property(&self, id: InstanceId, name: &str) -> CompileResult<Value> {
        let instance = self.instance(id);
        if let Some(thunk) = instance.properties.get(name) {
            return thunk.force(self);
        }

        if let Some(nested) = instance.nested {
            let frame = self.frame(nested);
            let output = frame
                .stack
                .outputs()
                .iter()
                .position(|o| o.exposed_name() == name);
            if let Some(output) = output {
                let declaration = &frame.stack.outputs()[output];
                let form = frame
                    .stack
                    .accessor(declaration.resource())
                    .map_or(AccessorForm::Plural, |accessor| accessor.form);
                let mut values = self
                    .output_entries(nested, output)?
                    .into_iter()
                    .map(|(_, value)| value);
                // Plural outputs stay lists whatever the instance count
                return match form {
                    AccessorForm::Plural => Ok(Value::List(values.collect())),
                    AccessorForm::Singular => values.next().ok_or_else(|| {
                        CompileError::block(
                            format!("properties of {}", instance.logical_id),
                            format!("'{}' has no instances", declaration.resource()),
                        )
                    }),
                };
            }
            if let Some(value) = self.property_value(nested, name)? {
                return Ok(value);
            }
        }

        Err(CompileError::UnknownReference {
            context: format!("properties of {}", instance.logical_id),
            name: name.to_string(),
        })
    }

    /// Evaluate one output declaration of a frame, one entry per addressed
    /// instance
    pub(crate) fn output_entries(
        &self,
        frame: FrameId,
        output: usize,
    ) -> CompileResult<Vec<(InstanceHandle, Value)>> {
        let frame = self.frame(frame);
        let cell = &frame.outputs[output];
        if let Some(entries) = cell.get() {
            return Ok(entries.clone());
        }

        let declaration = &frame.stack.outputs()[output];
        let _entered = self
            .guard
            .enter(&format!("{}:output:{}", frame.label(), declaration.exposed_name()))?;
        let scope = Scope::new(self, frame.id, None, 0);
        let mut entries = Vec::new();
        for handle in scope.resources(declaration.resource())? {
            let value = match declaration.block_fn() {
                Some(block) => block(&scope, &handle)?,
                None => self.read_property(handle.id, declaration.property())?,
            };
            entries.push((handle, value));
        }
        Ok(cell.get_or_init(|| entries).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{PropertyDeclaration, ResourceDeclaration, ResourceType};

    fn stack() -> Arc<StackDefinition> {
        Arc::new(
            StackDefinition::builder("Stack")
                .property(PropertyDeclaration::new("cidr").default_value("10.0.0.0/16"))
                .property(PropertyDeclaration::new("name").env("STACK_NAME"))
                .resource(ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC")))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_push_frame_creates_slots() {
        let mut graph = ResourceGraph::new(Environment::new());
        let frame = graph.push_frame(stack(), None, None, 0, &[]);
        assert_eq!(graph.frame_count(), 1);
        assert_eq!(graph.frame(frame).properties.len(), 2);
        assert_eq!(graph.frame(frame).label(), "Stack");
        assert!(matches!(graph.frame(frame).members[0], Members::Pending));
    }

    #[test]
    fn test_property_default_and_env() {
        let mut graph = ResourceGraph::new(Environment::new().with("STACK_NAME", "halloumi"));
        let frame = graph.push_frame(stack(), None, None, 0, &[]);
        assert_eq!(
            graph.property_value(frame, "cidr").unwrap(),
            Some(Value::from("10.0.0.0/16"))
        );
        assert_eq!(graph.property_value(frame, "name").unwrap(), Some(Value::from("halloumi")));
        assert_eq!(graph.property_value(frame, "missing").unwrap(), None);
    }

    #[test]
    fn test_duplicate_logical_id() {
        let mut graph = ResourceGraph::new(Environment::new());
        let frame = graph.push_frame(stack(), None, None, 0, &[]);
        let kind = InstanceKind::Provider("AWS::EC2::VPC".to_string());
        graph
            .push_instance(frame, 0, 0, LogicalId::new("Vpc"), kind.clone(), ResourceConfig::default())
            .unwrap();
        let err = graph
            .push_instance(frame, 0, 1, LogicalId::new("Vpc"), kind, ResourceConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateLogicalId {
                id: "Vpc".to_string(),
                first: "Stack.vpcs[0]".to_string(),
                second: "Stack.vpcs[1]".to_string(),
            }
        );
    }

    #[test]
    fn test_read_unknown_property() {
        let mut graph = ResourceGraph::new(Environment::new());
        let frame = graph.push_frame(stack(), None, None, 0, &[]);
        let kind = InstanceKind::Provider("AWS::EC2::VPC".to_string());
        let mut config = ResourceConfig::default();
        config.literal("cidr_block", "10.0.0.0/16");
        let id = graph
            .push_instance(frame, 0, 0, LogicalId::new("Vpc"), kind, config)
            .unwrap();

        assert_eq!(graph.read_property(id, "cidr_block").unwrap(), Value::from("10.0.0.0/16"));
        assert!(matches!(
            graph.read_property(id, "tags"),
            Err(CompileError::UnknownReference { .. })
        ));
        assert_eq!(graph.type_of(&LogicalId::new("Vpc")), Some("AWS::EC2::VPC"));
    }
}
