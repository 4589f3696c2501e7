use coldwire_metadata::{GraphError, MetadataError};
use std::error::Error;
use thiserror::Error;

/// Boxed error returned from user-provided constructor, setter and lifecycle
/// bindings.
pub type ErrorPtr = Box<dyn Error + Send + Sync>;

/// Errors raised while generating a container program. All of these abort the
/// generation pass; no partial program is emitted.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Unresolvable dependency cycle: {0}")]
    UnresolvableCycle(#[from] GraphError),
    #[error("Missing required dependency {dependency} of component {component}{hint}")]
    MissingDependency {
        component: String,
        dependency: String,
        hint: String,
    },
    #[error("No synthetic setter for non-public field {field} of {component}; class was not woven")]
    MissingSyntheticSetter { component: String, field: String },
    #[error("Malformed descriptor {descriptor} on injection method {method} of {component}")]
    MalformedDescriptor {
        component: String,
        method: String,
        descriptor: String,
    },
    #[error("Duplicate component name: {0}")]
    DuplicateComponentName(String),
    #[error("Invalid container program: {0}")]
    InvalidProgram(String),
    #[error("Cannot read component metadata: {0}")]
    Metadata(#[from] MetadataError),
}

/// Errors raised by the runtime container, mostly during bootstrap. Lookups
/// after a successful bootstrap do not error; they return absent sentinels.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Cannot generate container program: {0}")]
    Generation(#[from] GenerationError),
    #[error("No binding registered for component {0}")]
    MissingBinding(String),
    #[error("Binding for {component} has no accessor {accessor}")]
    MissingAccessor { component: String, accessor: String },
    #[error("Cannot construct component {component}: {source}")]
    ConstructorFailure {
        component: String,
        #[source]
        source: ErrorPtr,
    },
    #[error("Cannot inject {accessor} of component {component}: {source}")]
    InjectionFailure {
        component: String,
        accessor: String,
        #[source]
        source: ErrorPtr,
    },
    #[error("Lifecycle callback of component {component} failed: {source}")]
    LifecycleFailure {
        component: String,
        #[source]
        source: ErrorPtr,
    },
    #[error("Unknown prototype index: {0}")]
    UnknownPrototype(u32),
    #[error("Cannot resolve property expression {0}")]
    UnresolvedProperty(String),
    #[error("Duplicate binding registered for component {0}")]
    DuplicateBinding(String),
}
