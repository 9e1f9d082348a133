//! Property, resource, and output declarations.
//!
//! Declarations are built once, when a stack type is defined, and are
//! immutable afterwards. Configuration blocks are stored as shared closures
//! that receive their evaluation context explicitly through a [`Scope`].

use crate::eval::{InstanceHandle, Scope};
use halloumi_core::{
    camelize, is_declaration_name, singularize, CompileError, CompileResult, DeclarationKind,
    Value,
};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Deferred value computation
pub type ValueBlock = Arc<dyn Fn(&Scope<'_>) -> CompileResult<Value> + Send + Sync>;

/// Deferred instance count computation
pub type CountBlock = Arc<dyn Fn(&Scope<'_>) -> CompileResult<usize> + Send + Sync>;

/// Per-instance configuration, called with the instance index
pub type ConfigureBlock = Arc<dyn Fn(&mut ResourceConfig, usize) + Send + Sync>;

/// Output value derivation for one addressed instance
pub type OutputBlock =
    Arc<dyn Fn(&Scope<'_>, &InstanceHandle) -> CompileResult<Value> + Send + Sync>;

/// Instances handed from a parent stack to a nested declaration
pub type BindingBlock = Arc<dyn Fn(&Scope<'_>) -> CompileResult<Vec<InstanceHandle>> + Send + Sync>;

/// Coercion applied to a property's raw value
pub type Filter = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// A stack-level property
#[derive(Clone)]
pub struct PropertyDeclaration {
    name: String,
    env: Option<String>,
    default: Option<Value>,
    required: bool,
    filter: Option<Filter>,
    block: Option<ValueBlock>,
}

impl PropertyDeclaration {
    /// Create a new optional property with no value source
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: None,
            default: None,
            required: false,
            filter: None,
            block: None,
        }
    }

    /// Read an override from this environment key
    #[must_use]
    pub fn env(mut self, key: impl Into<String>) -> Self {
        self.env = Some(key.into());
        self
    }

    /// Fallback when neither override nor block yields a value
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Fail compilation when no value can be found
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Coerce the resolved raw value
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Compute the value in the stack's context
    #[must_use]
    pub fn block<F>(mut self, block: F) -> Self
    where
        F: Fn(&Scope<'_>) -> CompileResult<Value> + Send + Sync + 'static,
    {
        self.block = Some(Arc::new(block));
        self
    }

    /// Property name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Environment key, if any
    #[must_use]
    pub fn env_key(&self) -> Option<&str> {
        self.env.as_deref()
    }

    /// Default value, if any
    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Whether a value is mandatory
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    pub(crate) fn filter_fn(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub(crate) fn block_fn(&self) -> Option<&ValueBlock> {
        self.block.as_ref()
    }
}

impl fmt::Debug for PropertyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDeclaration")
            .field("name", &self.name)
            .field("env", &self.env)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("filter", &self.filter.is_some())
            .field("block", &self.block.is_some())
            .finish()
    }
}

/// What a resource declaration expands into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Opaque provider type tag, e.g. `AWS::EC2::VPC`
    Provider(String),
    /// Another registered stack definition, expanded recursively
    Compound(String),
}

impl ResourceType {
    /// Provider type tag
    #[must_use]
    pub fn provider(tag: impl Into<String>) -> Self {
        Self::Provider(tag.into())
    }

    /// Reference to a registered stack definition
    #[must_use]
    pub fn compound(stack: impl Into<String>) -> Self {
        Self::Compound(stack.into())
    }

    /// Name as written in the declaration
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Provider(tag) | Self::Compound(tag) => tag,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check that a provider tag has the `Vendor::Service::Type` or `Custom::Name` shape
#[must_use]
pub fn is_provider_tag(tag: &str) -> bool {
    let segments: Vec<&str> = tag.split("::").collect();
    let well_formed = segments
        .iter()
        .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()));
    well_formed
        && match segments.first() {
            Some(&"Custom") => segments.len() == 2,
            Some(_) => segments.len() == 3,
            None => false,
        }
}

/// Instance count of a resource declaration
#[derive(Clone)]
pub enum Amount {
    /// Fixed count
    Literal(usize),
    /// Count computed against the partially built graph
    Dynamic {
        /// Accessor names the block reads
        reads: Vec<String>,
        /// The count computation
        block: CountBlock,
    },
}

impl Amount {
    /// Count computed by `block`, which may only read the listed accessors'
    /// declarations before they are built in dependency order
    #[must_use]
    pub fn dynamic<I, S, F>(reads: I, block: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Scope<'_>) -> CompileResult<usize> + Send + Sync + 'static,
    {
        Self::Dynamic {
            reads: reads.into_iter().map(Into::into).collect(),
            block: Arc::new(block),
        }
    }

    /// The declared reads of a dynamic count
    #[must_use]
    pub fn reads(&self) -> &[String] {
        match self {
            Self::Literal(_) => &[],
            Self::Dynamic { reads, .. } => reads,
        }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::Literal(1)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(n) => write!(f, "Literal({})", n),
            Self::Dynamic { reads, .. } => f.debug_struct("Dynamic").field("reads", reads).finish(),
        }
    }
}

/// A pluralized template for one or more resource instances
#[derive(Clone)]
pub struct ResourceDeclaration {
    name: String,
    resource_type: ResourceType,
    amount: Amount,
    id: Option<String>,
    reads: Vec<String>,
    configure: Option<ConfigureBlock>,
}

impl ResourceDeclaration {
    /// Create a single-instance declaration
    #[must_use]
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            amount: Amount::default(),
            id: None,
            reads: Vec::new(),
            configure: None,
        }
    }

    /// Literal instance count
    #[must_use]
    pub fn amount(mut self, count: usize) -> Self {
        self.amount = Amount::Literal(count);
        self
    }

    /// Instance count computed from sibling declarations
    #[must_use]
    pub fn amount_from(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    /// Override the snake_case base of the logical identifier
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sibling accessors that must be built before this declaration
    #[must_use]
    pub fn reads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(names.into_iter().map(Into::into));
        self
    }

    /// Per-instance configuration block
    #[must_use]
    pub fn configure<F>(mut self, block: F) -> Self
    where
        F: Fn(&mut ResourceConfig, usize) + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(block));
        self
    }

    /// Plural declaration name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Singular accessor name
    #[must_use]
    pub fn singular_name(&self) -> String {
        singularize(&self.name)
    }

    /// Resource type
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Instance count
    #[must_use]
    pub fn instance_amount(&self) -> &Amount {
        &self.amount
    }

    /// CamelCase base of every instance's logical id
    #[must_use]
    pub fn logical_base(&self) -> String {
        match &self.id {
            Some(id) => camelize(id),
            None => camelize(&self.singular_name()),
        }
    }

    /// All accessor names this declaration reads before it can be built
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.amount
            .reads()
            .iter()
            .chain(self.reads.iter())
            .map(String::as_str)
    }

    pub(crate) fn configure_fn(&self) -> Option<&ConfigureBlock> {
        self.configure.as_ref()
    }
}

impl fmt::Debug for ResourceDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDeclaration")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type)
            .field("amount", &self.amount)
            .field("id", &self.id)
            .field("reads", &self.reads)
            .finish_non_exhaustive()
    }
}

/// Collects what a configuration block sets on one instance
#[derive(Default)]
pub struct ResourceConfig {
    pub(crate) properties: IndexMap<String, ValueBlock>,
    pub(crate) depends_on: Vec<ValueBlock>,
    pub(crate) bindings: IndexMap<String, BindingBlock>,
}

impl ResourceConfig {
    /// Set a property to a deferred value. Setting the same name twice keeps
    /// the last block.
    pub fn property<F>(&mut self, name: impl Into<String>, block: F) -> &mut Self
    where
        F: Fn(&Scope<'_>) -> CompileResult<Value> + Send + Sync + 'static,
    {
        self.properties.insert(name.into(), Arc::new(block));
        self
    }

    /// Set a property to a literal value
    pub fn literal(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.property(name, move |_| Ok(value.clone()))
    }

    /// Add explicit dependencies. The block returns logical ids (strings),
    /// reference expressions, or a list of either.
    pub fn depends_on<F>(&mut self, block: F) -> &mut Self
    where
        F: Fn(&Scope<'_>) -> CompileResult<Value> + Send + Sync + 'static,
    {
        self.depends_on.push(Arc::new(block));
        self
    }

    /// Bind a nested declaration of a compound instance to instances from
    /// the enclosing stack
    pub fn resources<F>(&mut self, name: impl Into<String>, block: F) -> &mut Self
    where
        F: Fn(&Scope<'_>) -> CompileResult<Vec<InstanceHandle>> + Send + Sync + 'static,
    {
        self.bindings.insert(name.into(), Arc::new(block));
        self
    }

    /// Names of the properties set so far
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}

/// How an output is exported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Export {
    /// Not exported
    #[default]
    None,
    /// Exported as `${AWS::StackName}-<OutputName>`
    StackQualified,
    /// Exported under a fixed name
    Named(String),
}

/// A template output addressing one or all instances of a declaration
#[derive(Clone)]
pub struct OutputDeclaration {
    resource: String,
    property: String,
    block: Option<OutputBlock>,
    export: Export,
}

impl OutputDeclaration {
    /// Output `property` of the instances addressed by `resource`.
    ///
    /// A plural name addresses every instance; the singular shorthand
    /// addresses the first.
    #[must_use]
    pub fn new(resource: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            property: property.into(),
            block: None,
            export: Export::None,
        }
    }

    /// Derive the value with a block instead of reading the property
    #[must_use]
    pub fn block<F>(mut self, block: F) -> Self
    where
        F: Fn(&Scope<'_>, &InstanceHandle) -> CompileResult<Value> + Send + Sync + 'static,
    {
        self.block = Some(Arc::new(block));
        self
    }

    /// Export under a stack-qualified name
    #[must_use]
    pub fn exported(mut self) -> Self {
        self.export = Export::StackQualified;
        self
    }

    /// Export under a fixed name
    #[must_use]
    pub fn export_as(mut self, name: impl Into<String>) -> Self {
        self.export = Export::Named(name.into());
        self
    }

    /// Addressed accessor name
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Output property name
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Export mode
    #[must_use]
    pub fn export(&self) -> &Export {
        &self.export
    }

    /// Name under which a nested stack exposes this output to its parent
    #[must_use]
    pub fn exposed_name(&self) -> String {
        format!("{}_{}", self.resource, self.property)
    }

    pub(crate) fn block_fn(&self) -> Option<&OutputBlock> {
        self.block.as_ref()
    }
}

impl fmt::Debug for OutputDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDeclaration")
            .field("resource", &self.resource)
            .field("property", &self.property)
            .field("block", &self.block.is_some())
            .field("export", &self.export)
            .finish()
    }
}

/// How an accessor name reaches its declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorForm {
    /// The ordered instance sequence
    Plural,
    /// The first instance
    Singular,
}

/// One entry of a stack's accessor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accessor {
    /// Index into the stack's resource declarations
    pub declaration: usize,
    /// Plural or singular binding
    pub form: AccessorForm,
}

/// A compilation unit: property, resource, and output declarations
#[derive(Debug, Clone)]
pub struct StackDefinition {
    name: String,
    description: Option<String>,
    properties: Vec<PropertyDeclaration>,
    resources: Vec<ResourceDeclaration>,
    outputs: Vec<OutputDeclaration>,
    accessors: IndexMap<String, Accessor>,
}

impl StackDefinition {
    /// Start defining a stack
    #[must_use]
    pub fn builder(name: impl Into<String>) -> StackBuilder {
        StackBuilder {
            name: name.into(),
            description: None,
            properties: Vec::new(),
            resources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Stack type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template description, if declared
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Property declarations in declaration order
    #[must_use]
    pub fn properties(&self) -> &[PropertyDeclaration] {
        &self.properties
    }

    /// Resource declarations in declaration order
    #[must_use]
    pub fn resources(&self) -> &[ResourceDeclaration] {
        &self.resources
    }

    /// Output declarations in declaration order
    #[must_use]
    pub fn outputs(&self) -> &[OutputDeclaration] {
        &self.outputs
    }

    /// Look up a plural or singular accessor
    #[must_use]
    pub fn accessor(&self, name: &str) -> Option<Accessor> {
        self.accessors.get(name).copied()
    }

    /// Find a property declaration by name
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDeclaration> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a resource declaration by plural name
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Builder collecting declarations before validation
#[derive(Debug)]
pub struct StackBuilder {
    name: String,
    description: Option<String>,
    properties: Vec<PropertyDeclaration>,
    resources: Vec<ResourceDeclaration>,
    outputs: Vec<OutputDeclaration>,
}

impl StackBuilder {
    /// Set the template description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a property declaration
    #[must_use]
    pub fn property(mut self, property: PropertyDeclaration) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a resource declaration
    #[must_use]
    pub fn resource(mut self, resource: ResourceDeclaration) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add an output declaration
    #[must_use]
    pub fn output(mut self, output: OutputDeclaration) -> Self {
        self.outputs.push(output);
        self
    }

    /// Validate names and build the accessor table
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDeclaration` for clashing names, `InvalidName` for
    /// names that are not snake_case, and `UnknownReference` for reads or
    /// outputs naming undeclared resources
    pub fn build(self) -> CompileResult<StackDefinition> {
        let stack = self.name;
        let duplicate = |kind, name: &str| CompileError::DuplicateDeclaration {
            stack: stack.clone(),
            kind,
            name: name.to_string(),
        };

        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            check_name(&stack, &property.name)?;
            if !seen.insert(property.name.as_str()) {
                return Err(duplicate(DeclarationKind::Property, &property.name));
            }
        }

        let mut accessors: IndexMap<String, Accessor> = IndexMap::new();
        for (idx, resource) in self.resources.iter().enumerate() {
            check_name(&stack, &resource.name)?;
            if self.resources[..idx].iter().any(|r| r.name == resource.name) {
                return Err(duplicate(DeclarationKind::Resource, &resource.name));
            }
            let singular = resource.singular_name();
            let entries = [
                (resource.name.clone(), AccessorForm::Plural),
                (singular, AccessorForm::Singular),
            ];
            for (name, form) in entries {
                match accessors.get(&name) {
                    Some(existing) if existing.declaration == idx => {}
                    Some(_) => return Err(duplicate(DeclarationKind::Accessor, &name)),
                    None => {
                        accessors.insert(name, Accessor { declaration: idx, form });
                    }
                }
            }
        }

        for resource in &self.resources {
            for read in resource.dependencies() {
                if !accessors.contains_key(read) {
                    return Err(CompileError::UnknownReference {
                        context: format!("reads of {}.{}", stack, resource.name),
                        name: read.to_string(),
                    });
                }
            }
        }

        let mut outputs_seen = std::collections::HashSet::new();
        for output in &self.outputs {
            if !accessors.contains_key(&output.resource) {
                return Err(CompileError::UnknownReference {
                    context: format!("outputs of {}", stack),
                    name: output.resource.clone(),
                });
            }
            if !outputs_seen.insert(output.exposed_name()) {
                return Err(duplicate(DeclarationKind::Output, &output.exposed_name()));
            }
        }

        Ok(StackDefinition {
            name: stack,
            description: self.description,
            properties: self.properties,
            resources: self.resources,
            outputs: self.outputs,
            accessors,
        })
    }
}

fn check_name(stack: &str, name: &str) -> CompileResult<()> {
    if is_declaration_name(name) {
        Ok(())
    } else {
        Err(CompileError::InvalidName {
            stack: stack.to_string(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc() -> ResourceDeclaration {
        ResourceDeclaration::new("vpcs", ResourceType::provider("AWS::EC2::VPC"))
    }

    #[test]
    fn test_builder_collects_declarations() {
        let stack = StackDefinition::builder("Stack")
            .property(PropertyDeclaration::new("cidr").default_value("10.0.0.0/16"))
            .resource(vpc())
            .output(OutputDeclaration::new("vpcs", "cidr"))
            .build()
            .unwrap();

        assert_eq!(stack.name(), "Stack");
        assert_eq!(stack.properties().len(), 1);
        assert_eq!(stack.resources().len(), 1);
        assert_eq!(stack.outputs().len(), 1);
        assert_eq!(
            stack.accessor("vpc"),
            Some(Accessor { declaration: 0, form: AccessorForm::Singular })
        );
        assert_eq!(
            stack.accessor("vpcs"),
            Some(Accessor { declaration: 0, form: AccessorForm::Plural })
        );
    }

    #[test]
    fn test_duplicate_property() {
        let result = StackDefinition::builder("Stack")
            .property(PropertyDeclaration::new("cidr"))
            .property(PropertyDeclaration::new("cidr"))
            .build();
        assert!(matches!(
            result,
            Err(CompileError::DuplicateDeclaration { kind: DeclarationKind::Property, .. })
        ));
    }

    #[test]
    fn test_duplicate_resource() {
        let result = StackDefinition::builder("Stack").resource(vpc()).resource(vpc()).build();
        assert!(matches!(
            result,
            Err(CompileError::DuplicateDeclaration { kind: DeclarationKind::Resource, .. })
        ));
    }

    #[test]
    fn test_accessor_clash() {
        let result = StackDefinition::builder("Stack")
            .resource(vpc())
            .resource(ResourceDeclaration::new("vpc", ResourceType::provider("AWS::EC2::VPC")))
            .build();
        assert!(matches!(
            result,
            Err(CompileError::DuplicateDeclaration { kind: DeclarationKind::Accessor, .. })
        ));
    }

    #[test]
    fn test_property_and_resource_names_are_separate_namespaces() {
        let result = StackDefinition::builder("Stack")
            .property(PropertyDeclaration::new("vpcs"))
            .resource(vpc())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_unknown_read() {
        let result = StackDefinition::builder("Stack")
            .resource(vpc().reads(["subnets"]))
            .build();
        assert!(matches!(result, Err(CompileError::UnknownReference { .. })));
    }

    #[test]
    fn test_invalid_name() {
        let result = StackDefinition::builder("Stack")
            .property(PropertyDeclaration::new("Cidr"))
            .build();
        assert!(matches!(result, Err(CompileError::InvalidName { .. })));
    }

    #[test]
    fn test_logical_base() {
        assert_eq!(vpc().logical_base(), "Vpc");
        let custom = vpc().id("main_network");
        assert_eq!(custom.logical_base(), "MainNetwork");
        let policies =
            ResourceDeclaration::new("vpc_flow_log_policys", ResourceType::provider("AWS::IAM::Role"));
        assert_eq!(policies.logical_base(), "VpcFlowLogPolicy");
    }

    #[test]
    fn test_provider_tag_shape() {
        assert!(is_provider_tag("AWS::EC2::VPC"));
        assert!(is_provider_tag("Custom::Thing"));
        assert!(!is_provider_tag("AWS::EC2"));
        assert!(!is_provider_tag("Skeleton"));
        assert!(!is_provider_tag("AWS::::VPC"));
    }

    #[test]
    fn test_resource_config_collects_blocks() {
        let mut config = ResourceConfig::default();
        config.literal("cidr_block", "10.0.0.0/16").literal("path", "/");
        config.depends_on(|_| Ok(Value::from("Role")));
        let names: Vec<&str> = config.property_names().collect();
        assert_eq!(names, vec!["cidr_block", "path"]);
        assert_eq!(config.depends_on.len(), 1);
    }

    #[test]
    fn test_output_exposed_name() {
        let output = OutputDeclaration::new("vpc", "id").exported();
        assert_eq!(output.exposed_name(), "vpc_id");
        assert_eq!(output.export(), &Export::StackQualified);
    }
}
