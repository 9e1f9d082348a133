//! Lazy evaluation of configuration blocks.
//!
//! Every block is wrapped in a [`Thunk`] that knows which frame and instance
//! it belongs to. Forcing a thunk runs the block at most once; the result is
//! kept in a one-shot cell so later readers always observe the same value.
//! Blocks reach the rest of the graph only through the [`Scope`] they are
//! handed.

use crate::declaration::{AccessorForm, ValueBlock};
use crate::graph::{FrameId, InstanceId, Members, Phase, ResourceGraph};
use halloumi_core::{CompileError, CompileResult, LogicalId, Value};
use once_cell::sync::OnceCell;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which reference expression to produce for an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceForm {
    /// `{"Ref": id}`
    Ref,
    /// `{"Fn::GetAtt": [id, attribute]}`
    Attribute(String),
    /// The raw logical id string
    LogicalId,
}

/// A resolved instance as seen from inside a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub(crate) id: InstanceId,
    logical_id: LogicalId,
    index: usize,
    compound: bool,
}

impl InstanceHandle {
    pub(crate) fn new(id: InstanceId, logical_id: LogicalId, index: usize, compound: bool) -> Self {
        Self {
            id,
            logical_id,
            index,
            compound,
        }
    }

    /// `{"Ref": "<LogicalId>"}`
    #[must_use]
    pub fn reference(&self) -> Value {
        self.to_reference(ReferenceForm::Ref)
    }

    /// `{"Fn::GetAtt": ["<LogicalId>", "Arn"]}`
    #[must_use]
    pub fn ref_arn(&self) -> Value {
        self.get_att("Arn")
    }

    /// `{"Fn::GetAtt": ["<LogicalId>", attribute]}`
    #[must_use]
    pub fn get_att(&self, attribute: impl Into<String>) -> Value {
        self.to_reference(ReferenceForm::Attribute(attribute.into()))
    }

    /// Logical id as a plain string value, for `depends_on` lists
    #[must_use]
    pub fn id_value(&self) -> Value {
        self.to_reference(ReferenceForm::LogicalId)
    }

    /// Build the requested reference expression
    #[must_use]
    pub fn to_reference(&self, form: ReferenceForm) -> Value {
        match form {
            ReferenceForm::Ref => Value::reference(self.logical_id.clone()),
            ReferenceForm::Attribute(attribute) => Value::get_att(self.logical_id.clone(), attribute),
            ReferenceForm::LogicalId => Value::from(self.logical_id.as_str()),
        }
    }

    /// Assigned logical id
    #[must_use]
    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    /// Position within the sibling set
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this instance expands into a nested stack
    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.compound
    }
}

/// Tracks the blocks currently being evaluated to detect re-entrant cycles
#[derive(Debug, Default)]
pub(crate) struct EvalGuard {
    active: Mutex<Vec<String>>,
}

impl EvalGuard {
    fn active(&self) -> MutexGuard<'_, Vec<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as being evaluated until the returned token is dropped
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` if `key` is already being evaluated
    pub(crate) fn enter(&self, key: &str) -> CompileResult<Entered<'_>> {
        let mut active = self.active();
        if let Some(pos) = active.iter().position(|k| k == key) {
            let mut chain = active[pos..].to_vec();
            chain.push(key.to_string());
            return Err(CompileError::CyclicDependency { chain });
        }
        active.push(key.to_string());
        Ok(Entered { guard: self })
    }
}

/// Evaluation token, popped from the guard on drop
#[derive(Debug)]
pub(crate) struct Entered<'a> {
    guard: &'a EvalGuard,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.guard.active().pop();
    }
}

/// A deferred block bound to the instance it configures
pub(crate) struct Thunk {
    key: String,
    block: ValueBlock,
    frame: FrameId,
    owner: InstanceId,
    index: usize,
    cell: OnceCell<Value>,
}

impl Thunk {
    pub(crate) fn new(
        key: String,
        block: ValueBlock,
        frame: FrameId,
        owner: InstanceId,
        index: usize,
    ) -> Self {
        Self {
            key,
            block,
            frame,
            owner,
            index,
            cell: OnceCell::new(),
        }
    }

    /// Evaluate the block once and return the memoized value
    pub(crate) fn force(&self, graph: &ResourceGraph) -> CompileResult<Value> {
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }
        let _entered = graph.guard().enter(&self.key)?;
        let scope = Scope::new(graph, self.frame, Some(self.owner), self.index);
        let value = (self.block)(&scope)?;
        Ok(self.cell.get_or_init(|| value).clone())
    }

    /// Whether the block has run
    pub(crate) fn is_forced(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for Thunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thunk")
            .field("key", &self.key)
            .field("forced", &self.is_forced())
            .finish()
    }
}

/// Evaluation context handed to every block
///
/// Gives access to the stack's properties, the plural and singular resource
/// accessors of the enclosing stack, and the properties of other instances.
pub struct Scope<'a> {
    graph: &'a ResourceGraph,
    frame: FrameId,
    owner: Option<InstanceId>,
    index: usize,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        graph: &'a ResourceGraph,
        frame: FrameId,
        owner: Option<InstanceId>,
        index: usize,
    ) -> Self {
        Self {
            graph,
            frame,
            owner,
            index,
        }
    }

    /// Resolved value of a stack property
    ///
    /// # Errors
    ///
    /// Returns `UnknownReference` if the stack declares no such property, or
    /// any error raised while resolving it
    pub fn property(&self, name: &str) -> CompileResult<Value> {
        self.graph
            .property_value(self.frame, name)?
            .ok_or_else(|| self.unknown(name))
    }

    /// Instances reachable through a plural or singular accessor
    ///
    /// # Errors
    ///
    /// Returns `UnknownReference` for undeclared names or when called from a
    /// property block, and `CyclicDependency` when the declaration is not
    /// built yet
    pub fn resources(&self, name: &str) -> CompileResult<Vec<InstanceHandle>> {
        let frame = self.graph.frame(self.frame);
        let accessor = frame.stack.accessor(name).ok_or_else(|| self.unknown(name))?;
        if frame.phase == Phase::Properties {
            return Err(self.unknown(name));
        }

        let handles = match &frame.members[accessor.declaration] {
            Members::Pending => {
                return Err(CompileError::CyclicDependency {
                    chain: vec![self.context(), name.to_string()],
                })
            }
            Members::Built(ids) => ids.iter().map(|id| self.graph.handle(*id)).collect(),
            Members::Bound(handles) => handles.clone(),
        };

        Ok(match accessor.form {
            AccessorForm::Plural => handles,
            AccessorForm::Singular => handles.into_iter().take(1).collect(),
        })
    }

    /// First instance reachable through an accessor
    ///
    /// # Errors
    ///
    /// As [`Scope::resources`], plus a block error when there are no instances
    pub fn resource(&self, name: &str) -> CompileResult<InstanceHandle> {
        self.resources(name)?
            .into_iter()
            .next()
            .ok_or_else(|| self.fail(format!("'{}' has no instances", name)))
    }

    /// Memoized property of another instance.
    ///
    /// For a compound instance this is a nested output (by its exposed
    /// `<resource>_<property>` name) or a nested stack property.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReference` if the instance has no such property
    pub fn read(&self, handle: &InstanceHandle, property: &str) -> CompileResult<Value> {
        self.graph.read_property(handle.id, property)
    }

    /// Index of the instance being configured, zero outside instance blocks
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Handle of the instance being configured
    #[must_use]
    pub fn this(&self) -> Option<InstanceHandle> {
        self.owner.map(|id| self.graph.handle(id))
    }

    /// Raw environment value, empty values count as absent
    #[must_use]
    pub fn env(&self, key: &str) -> Option<&str> {
        self.graph.environment().get(key)
    }

    /// Build an error attributed to the block being evaluated
    #[must_use]
    pub fn fail(&self, message: impl Into<String>) -> CompileError {
        CompileError::block(self.context(), message)
    }

    fn unknown(&self, name: &str) -> CompileError {
        CompileError::UnknownReference {
            context: self.context(),
            name: name.to_string(),
        }
    }

    /// Where the block being evaluated lives, for error messages
    fn context(&self) -> String {
        if let Some(owner) = self.owner {
            return self.graph.instance(owner).logical_id.to_string();
        }
        let frame = self.graph.frame(self.frame);
        match frame.building {
            Some(idx) => format!("{}.{}", frame.label(), frame.stack.resources()[idx].name()),
            None => frame.label(),
        }
    }
}
