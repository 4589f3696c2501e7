//! Pre-bound, type-erased constructors and accessors for container-managed
//! components.
//!
//! The container never resolves members dynamically at lookup time. Every
//! constructor, setter, injection method and lifecycle callback is a plain
//! `fn` pointer bound once per component, registered either statically via
//! [inventory] submission or manually on a [BindingRegistry]. The generated
//! program refers to these bindings by component class name and accessor
//! name.

use crate::error::ErrorPtr;
use derivative::Derivative;
use fxhash::FxHashMap;
use itertools::Itertools;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

pub type ComponentInstancePtr<T> = Arc<T>;
pub type ComponentInstanceAnyPtr = ComponentInstancePtr<dyn Any + Send + Sync + 'static>;

/// A single injected argument or field value.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub enum Value {
    /// A resolved component instance.
    Component(#[derivative(Debug = "ignore")] ComponentInstanceAnyPtr),
    /// A resolved configuration property.
    Text(String),
    /// An absent optional dependency.
    Absent,
}

impl Value {
    /// Unwraps a component value as a shared pointer of a concrete type.
    pub fn into_component<T: Any + Send + Sync>(self) -> Result<ComponentInstancePtr<T>, ErrorPtr> {
        match self {
            Value::Component(instance) => instance
                .downcast::<T>()
                .map_err(|_| "component type mismatch".into()),
            _ => Err("expected a component value".into()),
        }
    }

    /// Unwraps an optional component value; [Value::Absent] maps to `None`.
    pub fn into_optional_component<T: Any + Send + Sync>(
        self,
    ) -> Result<Option<ComponentInstancePtr<T>>, ErrorPtr> {
        match self {
            Value::Absent => Ok(None),
            other => other.into_component().map(Some),
        }
    }

    /// Unwraps a resolved configuration property.
    pub fn into_text(self) -> Result<String, ErrorPtr> {
        match self {
            Value::Text(text) => Ok(text),
            _ => Err("expected a text value".into()),
        }
    }
}

/// Constructs a fresh, not yet injected instance from resolved constructor
/// arguments.
pub type ConstructorFn = fn(&[Value]) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr>;

/// Stores one value into an instance under construction; bound per field
/// (or per synthetic setter for non-public fields).
pub type SetterFn = fn(&mut (dyn Any + Send + Sync), Value) -> Result<(), ErrorPtr>;

/// Invokes an injection method with resolved arguments.
pub type MethodFn = fn(&mut (dyn Any + Send + Sync), &[Value]) -> Result<(), ErrorPtr>;

/// Invokes a lifecycle callback or event-registration hook on a sealed
/// instance.
pub type CallbackFn = fn(&(dyn Any + Send + Sync)) -> Result<(), ErrorPtr>;

/// All bound callables for one component class.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ComponentBinding {
    /// Fully-qualified, dot-separated class name; matches the metadata.
    pub class_name: &'static str,

    #[derivative(Debug = "ignore")]
    pub constructor: ConstructorFn,

    /// Accessors keyed by field name (direct injection) or synthetic setter
    /// name (non-public fields).
    #[derivative(Debug = "ignore")]
    pub setters: Vec<(&'static str, SetterFn)>,

    /// Injection methods keyed by method name.
    #[derivative(Debug = "ignore")]
    pub methods: Vec<(&'static str, MethodFn)>,

    #[derivative(Debug = "ignore")]
    pub post_construct: Option<CallbackFn>,

    #[derivative(Debug = "ignore")]
    pub pre_destroy: Option<CallbackFn>,
}

impl ComponentBinding {
    pub fn new(class_name: &'static str, constructor: ConstructorFn) -> Self {
        Self {
            class_name,
            constructor,
            setters: vec![],
            methods: vec![],
            post_construct: None,
            pre_destroy: None,
        }
    }

    pub fn with_setter(mut self, accessor: &'static str, setter: SetterFn) -> Self {
        self.setters.push((accessor, setter));
        self
    }

    pub fn with_method(mut self, name: &'static str, method: MethodFn) -> Self {
        self.methods.push((name, method));
        self
    }

    pub fn with_post_construct(mut self, callback: CallbackFn) -> Self {
        self.post_construct = Some(callback);
        self
    }

    pub fn with_pre_destroy(mut self, callback: CallbackFn) -> Self {
        self.pre_destroy = Some(callback);
        self
    }

    pub fn setter(&self, accessor: &str) -> Option<SetterFn> {
        self.setters
            .iter()
            .find(|(name, _)| *name == accessor)
            .map(|(_, setter)| *setter)
    }

    pub fn method(&self, name: &str) -> Option<MethodFn> {
        self.methods
            .iter()
            .find(|(method_name, _)| *method_name == name)
            .map(|(_, method)| *method)
    }
}

/// Marker for components retrievable from a container by static type. The
/// associated name must match the class name recorded in the metadata.
pub trait ComponentType: Any + Send + Sync {
    const TYPE_NAME: &'static str;
}

/// Registry of component bindings, initialized from statically submitted
/// bindings or populated manually.
#[derive(Clone, Debug, Default)]
pub struct BindingRegistry {
    bindings: FxHashMap<&'static str, ComponentBinding>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every binding submitted via [internal::submit].
    pub fn from_statically_registered() -> Result<Self, crate::error::ContainerError> {
        let bindings = inventory::iter::<internal::BindingRegisterer>
            .into_iter()
            .map(|registerer| (registerer.register)())
            .collect_vec();

        debug!(count = bindings.len(), "Collected statically registered bindings");

        let mut registry = Self::new();
        for binding in bindings {
            registry.register(binding)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, binding: ComponentBinding) -> Result<(), crate::error::ContainerError> {
        let class_name = binding.class_name;
        if self.bindings.insert(class_name, binding).is_some() {
            return Err(crate::error::ContainerError::DuplicateBinding(
                class_name.to_string(),
            ));
        }
        Ok(())
    }

    pub fn get(&self, class_name: &str) -> Option<&ComponentBinding> {
        self.bindings.get(class_name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[doc(hidden)]
pub mod internal {
    use crate::bindings::ComponentBinding;
    use inventory::collect;
    pub use inventory::submit;

    pub struct BindingRegisterer {
        pub register: fn() -> ComponentBinding,
    }

    collect!(BindingRegisterer);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        label: String,
    }

    fn construct_probe(_args: &[Value]) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr> {
        Ok(Box::new(Probe {
            label: String::new(),
        }))
    }

    fn set_label(instance: &mut (dyn Any + Send + Sync), value: Value) -> Result<(), ErrorPtr> {
        let probe = instance.downcast_mut::<Probe>().ok_or("not a Probe")?;
        match value {
            Value::Text(text) => probe.label = text,
            _ => return Err("expected a text value".into()),
        }
        Ok(())
    }

    #[test]
    fn should_register_and_look_up_bindings() {
        let mut registry = BindingRegistry::new();
        registry
            .register(
                ComponentBinding::new("com.example.Probe", construct_probe)
                    .with_setter("label", set_label),
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        let binding = registry.get("com.example.Probe").unwrap();
        assert!(binding.setter("label").is_some());
        assert!(binding.setter("missing").is_none());
        assert!(registry.get("com.example.Other").is_none());
    }

    #[test]
    fn should_reject_duplicate_bindings() {
        let mut registry = BindingRegistry::new();
        registry
            .register(ComponentBinding::new("com.example.Probe", construct_probe))
            .unwrap();

        assert!(matches!(
            registry
                .register(ComponentBinding::new("com.example.Probe", construct_probe))
                .unwrap_err(),
            crate::error::ContainerError::DuplicateBinding(_)
        ));
    }

    #[test]
    fn should_apply_bound_setter_to_boxed_instance() {
        let mut instance = construct_probe(&[]).unwrap();
        set_label(instance.as_mut(), Value::Text("ready".to_string())).unwrap();

        let probe = instance.downcast_ref::<Probe>().unwrap();
        assert_eq!(probe.label, "ready");
    }

    internal::submit! {
        internal::BindingRegisterer {
            register: || ComponentBinding::new("com.example.Submitted", construct_probe),
        }
    }

    #[test]
    fn should_collect_statically_submitted_bindings() {
        let registry = BindingRegistry::from_statically_registered().unwrap();
        assert!(registry.get("com.example.Submitted").is_some());
    }
}
