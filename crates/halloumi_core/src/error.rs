//! Compilation error types.
//!
//! Every failure aborts the whole compilation; nothing is recovered and no
//! partial template is produced.

/// Compilation result type
pub type CompileResult<T> = Result<T, CompileError>;

/// Kind of declaration, used to report duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    /// Property declaration
    Property,
    /// Resource declaration
    Resource,
    /// Output declaration
    Output,
    /// Resource accessor name (plural or derived singular)
    Accessor,
    /// Stack definition inside a registry
    Stack,
}

impl std::fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Property => "property",
            Self::Resource => "resource",
            Self::Output => "output",
            Self::Accessor => "accessor",
            Self::Stack => "stack",
        };
        f.write_str(name)
    }
}

/// Compilation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Two declarations of the same kind share a name
    #[error("duplicate {kind} declaration '{name}' in {stack}")]
    DuplicateDeclaration {
        stack: String,
        kind: DeclarationKind,
        name: String,
    },

    /// Declaration name is not snake_case
    #[error("invalid declaration name '{name}' in {stack}")]
    InvalidName { stack: String, name: String },

    /// Required property has no override, block result, or default
    #[error("required property '{property}' of {stack} has no value")]
    MissingRequiredProperty { stack: String, property: String },

    /// Declared filter rejected the raw value
    #[error("filter rejected property '{property}' of {stack}: {reason}")]
    PropertyFilter {
        stack: String,
        property: String,
        reason: String,
    },

    /// Resource type is neither a provider type nor a registered stack
    #[error("resource '{declaration}' in {stack} has unknown type '{type_name}'")]
    UnknownResourceType {
        stack: String,
        declaration: String,
        type_name: String,
    },

    /// A block named an identifier that is not in scope
    #[error("unknown reference '{name}' in {context}")]
    UnknownReference { context: String, name: String },

    /// A reference expression names a logical id absent from the graph
    #[error("{from} references unknown logical id '{id}'")]
    UnknownResourceReference { from: String, id: String },

    /// Dependency cycle among declarations, instances, or property blocks
    #[error("cyclic dependency: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    /// A compound stack type contains itself
    #[error("compound stack '{stack}' contains itself: {}", .chain.join(" -> "))]
    CyclicCompoundReference { stack: String, chain: Vec<String> },

    /// Two flattened instances received the same logical id
    #[error("logical id '{id}' is assigned to both {first} and {second}")]
    DuplicateLogicalId {
        id: String,
        first: String,
        second: String,
    },

    /// Compilation target is not registered
    #[error("unknown stack '{name}'")]
    UnknownStack { name: String },

    /// A configuration block failed on its own terms
    #[error("{context}: {message}")]
    Block { context: String, message: String },

    /// Template serialization failed
    #[error("serialization failed: {message}")]
    Serialization { message: String },
}

impl CompileError {
    /// Failure raised from inside a configuration block
    #[must_use]
    pub fn block(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Block {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Short machine-friendly name of the error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateDeclaration { .. } => "DuplicateDeclarationError",
            Self::InvalidName { .. } => "InvalidNameError",
            Self::MissingRequiredProperty { .. } => "MissingRequiredPropertyError",
            Self::PropertyFilter { .. } => "PropertyFilterError",
            Self::UnknownResourceType { .. } => "UnknownResourceTypeError",
            Self::UnknownReference { .. } => "UnknownReferenceError",
            Self::UnknownResourceReference { .. } => "UnknownResourceReferenceError",
            Self::CyclicDependency { .. } => "CyclicDependencyError",
            Self::CyclicCompoundReference { .. } => "CyclicCompoundReferenceError",
            Self::DuplicateLogicalId { .. } => "DuplicateLogicalIdError",
            Self::UnknownStack { .. } => "UnknownStackError",
            Self::Block { .. } => "BlockError",
            Self::Serialization { .. } => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
