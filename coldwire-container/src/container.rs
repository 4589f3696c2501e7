//! The runtime container: executes a generated [ContainerProgram] against a
//! [BindingRegistry].
//!
//! Bootstrap runs the singleton step list once, in topological order; after
//! that the container is immutable and lookups are non-blocking. Type lookup
//! resolves through three tiers: a 4-entry per-thread cache, the pre-placed
//! hash table, and a linear scan of all mappings as the safety net. Absent
//! types return `None`; the container never throws on lookup.

use crate::bindings::{
    BindingRegistry, ComponentBinding, ComponentInstanceAnyPtr, ComponentInstancePtr,
    ComponentType, Value,
};
use crate::codegen::lookup::{self, Probe};
use crate::codegen::program::{
    ComponentRecord, ContainerProgram, DepSource, InitStep, PrototypePlan, Provision,
};
use crate::error::{ContainerError, GenerationError};
use crate::event::EventBus;
use crate::value::PropertyResolver;
use fxhash::FxHashMap;
use itertools::Itertools;
use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::{debug, error, info};

/// Process lifetime of a container. `Closed` is terminal; there is no
/// restart.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum ContainerState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    ShuttingDown = 3,
    Closed = 4,
}

impl ContainerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ContainerState::Uninitialized,
            1 => ContainerState::Initializing,
            2 => ContainerState::Ready,
            3 => ContainerState::ShuttingDown,
            _ => ContainerState::Closed,
        }
    }
}

const LOOKUP_CACHE_SIZE: usize = 4;

#[derive(Copy, Clone, Default)]
struct CacheEntry {
    /// Container id the entry belongs to; 0 marks an empty entry.
    container: u64,
    key: u64,
    mapping: u32,
}

/// Direct-mapped per-thread lookup cache, replaced round-robin on hash-tier
/// hits.
#[derive(Default)]
struct LookupCache {
    entries: [CacheEntry; LOOKUP_CACHE_SIZE],
    next: usize,
}

impl LookupCache {
    fn find(&self, container: u64, key: u64) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.container == container && entry.key == key)
            .map(|entry| entry.mapping)
    }

    fn store(&mut self, container: u64, key: u64, mapping: u32) {
        self.entries[self.next] = CacheEntry {
            container,
            key,
            mapping,
        };
        self.next = (self.next + 1) % LOOKUP_CACHE_SIZE;
    }
}

thread_local! {
    static LOOKUP_CACHE: RefCell<LookupCache> = RefCell::new(LookupCache::default());
}

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// A bootstrapped dependency-injection container.
pub struct Container {
    id: u64,
    state: AtomicU8,
    program: ContainerProgram,
    bindings: BindingRegistry,
    properties: PropertyResolver,
    events: EventBus,
    /// Sealed singleton per component index; `None` for prototype components.
    singletons: Vec<Option<ComponentInstanceAnyPtr>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Runs the program's bootstrap steps and returns a ready container.
    /// Any failure is fatal: a partially constructed singleton graph is not
    /// salvageable.
    pub fn bootstrap(
        program: ContainerProgram,
        bindings: BindingRegistry,
        properties: PropertyResolver,
        events: EventBus,
    ) -> Result<Self, ContainerError> {
        program.verify().map_err(ContainerError::Generation)?;

        let mut singletons: Vec<Option<ComponentInstanceAnyPtr>> =
            vec![None; program.components.len()];
        let mut pending: FxHashMap<u32, Box<dyn Any + Send + Sync>> = FxHashMap::default();

        for step in &program.init_steps {
            execute_bootstrap_step(
                step,
                &program,
                &bindings,
                &properties,
                &events,
                &mut singletons,
                &mut pending,
            )?;
        }

        let container = Self {
            id: NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(ContainerState::Ready as u8),
            program,
            bindings,
            properties,
            events,
            singletons,
        };

        info!(
            container = container.id,
            singletons = container.program.singleton_count(),
            prototypes = container.program.prototypes.len(),
            "Container ready"
        );
        Ok(container)
    }

    pub fn state(&self) -> ContainerState {
        ContainerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn component_count(&self) -> usize {
        self.program.components.len()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.program
            .components
            .iter()
            .map(|record| record.class_name.clone())
            .collect_vec()
    }

    /// Whether some component is reachable by the given type name.
    pub fn contains(&self, type_name: &str) -> bool {
        self.program
            .mappings
            .iter()
            .any(|mapping| mapping.type_name == type_name)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn properties(&self) -> &PropertyResolver {
        &self.properties
    }

    /// Typed primary lookup by the component's registered type name.
    pub fn instance<T: ComponentType>(&self) -> Option<ComponentInstancePtr<T>> {
        self.instance_by_type_name(T::TYPE_NAME)
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    /// Typed named lookup; an absent qualifier defers to the unqualified
    /// lookup.
    pub fn named_instance<T: ComponentType>(
        &self,
        qualifier: Option<&str>,
    ) -> Option<ComponentInstancePtr<T>> {
        self.named_instance_by_type_name(T::TYPE_NAME, qualifier)
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    /// Three-tier type lookup: thread-local cache, hash table, linear scan.
    pub fn instance_by_type_name(&self, type_name: &str) -> Option<ComponentInstanceAnyPtr> {
        if self.state() != ContainerState::Ready {
            return None;
        }

        let key = lookup::hash_key(type_name);

        let cached = LOOKUP_CACHE.with(|cache| cache.borrow().find(self.id, key));
        if let Some(mapping) = cached {
            if let Some(mapping) = self.program.mappings.get(mapping as usize) {
                if mapping.type_name == type_name {
                    return self.provide(mapping.component);
                }
            }
        }

        match lookup::probe(&self.program.table, key, |mapping| {
            let mapping = &self.program.mappings[mapping as usize];
            mapping.key == key && mapping.type_name == type_name
        }) {
            Probe::Found(mapping) => {
                LOOKUP_CACHE.with(|cache| cache.borrow_mut().store(self.id, key, mapping));
                self.provide(self.program.mappings[mapping as usize].component)
            }
            Probe::Absent => None,
            Probe::Overflow => {
                debug!(type_name, "Probe bound exhausted; falling back to linear scan");
                self.program
                    .mappings
                    .iter()
                    .find(|mapping| mapping.type_name == type_name)
                    .and_then(|mapping| self.provide(mapping.component))
            }
        }
    }

    /// Named lookup over the same mapping table, additionally comparing the
    /// component's bean name.
    pub fn named_instance_by_type_name(
        &self,
        type_name: &str,
        qualifier: Option<&str>,
    ) -> Option<ComponentInstanceAnyPtr> {
        let Some(qualifier) = qualifier else {
            return self.instance_by_type_name(type_name);
        };
        if self.state() != ContainerState::Ready {
            return None;
        }

        self.program
            .mappings
            .iter()
            .find(|mapping| {
                mapping.type_name == type_name
                    && self.program.component(mapping.component).bean_name == qualifier
            })
            .and_then(|mapping| self.provide(mapping.component))
    }

    /// Constructs a fresh instance from the indexed prototype plan. Unknown
    /// indices return `None`, a programming-error sentinel for the caller.
    pub fn create_prototype(&self, plan: u32) -> Option<ComponentInstanceAnyPtr> {
        if self.state() != ContainerState::Ready {
            return None;
        }

        match construct_prototype(
            &self.program,
            &self.bindings,
            &self.properties,
            &self.events,
            &self.singletons,
            plan,
        ) {
            Ok(instance) => Some(instance),
            Err(ContainerError::UnknownPrototype(plan)) => {
                debug!(plan, "Unknown prototype index");
                None
            }
            Err(error) => {
                error!(%error, "Prototype construction failed");
                None
            }
        }
    }

    fn provide(&self, component: u32) -> Option<ComponentInstanceAnyPtr> {
        let record = self.program.component(component);
        match record.provision {
            Provision::Singleton => self.singletons[component as usize].clone(),
            Provision::Prototype { plan } => self.create_prototype(plan),
        }
    }

    /// Invokes pre-destroy callbacks in reverse construction order, then
    /// releases framework-owned resources. Idempotent; only the first call
    /// from the ready state runs teardown.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                ContainerState::Ready as u8,
                ContainerState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        for &component in &self.program.shutdown_order {
            let record = self.program.component(component);
            let callback = self
                .bindings
                .get(&record.class_name)
                .and_then(|binding| binding.pre_destroy);
            let instance = self.singletons[component as usize].as_ref();

            if let (Some(callback), Some(instance)) = (callback, instance) {
                debug!(component = %record.class_name, "Invoking pre-destroy callback");
                if let Err(err) = callback(instance.as_ref()) {
                    // teardown is best effort; remaining callbacks still run
                    error!(component = %record.class_name, error = %err, "Pre-destroy callback failed");
                }
            }
        }

        self.events.shutdown();
        self.state
            .store(ContainerState::Closed as u8, Ordering::Release);
        info!(container = self.id, "Container closed");
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn execute_bootstrap_step(
    step: &InitStep,
    program: &ContainerProgram,
    bindings: &BindingRegistry,
    properties: &PropertyResolver,
    events: &EventBus,
    singletons: &mut [Option<ComponentInstanceAnyPtr>],
    pending: &mut FxHashMap<u32, Box<dyn Any + Send + Sync>>,
) -> Result<(), ContainerError> {
    let component = step.component();
    let record = program.component(component);
    let binding = binding_for(bindings, &record.class_name)?;

    match step {
        InitStep::Construct { args, .. } => {
            let values = resolve_sources(args, program, bindings, properties, events, singletons)?;
            let instance = (binding.constructor)(&values).map_err(|source| {
                ContainerError::ConstructorFailure {
                    component: record.class_name.clone(),
                    source,
                }
            })?;
            debug!(component = %record.class_name, "Constructed singleton");
            pending.insert(component, instance);
        }
        InitStep::InjectField { accessor, source, .. } => {
            let value =
                resolve_source(source, program, bindings, properties, events, singletons)?;
            let instance = pending_instance(pending, component, record)?;
            inject(binding, &record.class_name, instance.as_mut(), accessor, value)?;
        }
        InitStep::InjectValue {
            accessor,
            expression,
            ..
        } => {
            let value = Value::Text(properties.resolve(expression)?);
            let instance = pending_instance(pending, component, record)?;
            inject(binding, &record.class_name, instance.as_mut(), accessor, value)?;
        }
        InitStep::InjectMethod { method, args, .. } => {
            let values = resolve_sources(args, program, bindings, properties, events, singletons)?;
            let method_fn =
                binding
                    .method(method)
                    .ok_or_else(|| ContainerError::MissingAccessor {
                        component: record.class_name.clone(),
                        accessor: method.clone(),
                    })?;
            let instance = pending_instance(pending, component, record)?;
            method_fn(instance.as_mut(), &values).map_err(|source| {
                ContainerError::InjectionFailure {
                    component: record.class_name.clone(),
                    accessor: method.clone(),
                    source,
                }
            })?;
        }
        InitStep::Seal { .. } => {
            let instance = pending
                .remove(&component)
                .ok_or_else(|| never_constructed(record))?;
            singletons[component as usize] = Some(ComponentInstanceAnyPtr::from(instance));
        }
        InitStep::RegisterEvents { .. } => {
            let instance = sealed_instance(singletons, component, record)?;
            events.register(record.class_name.clone(), instance);
        }
        InitStep::PostConstruct { .. } => {
            let instance = sealed_instance(singletons, component, record)?;
            invoke_post_construct(binding, record, instance.as_ref())?;
        }
    }

    Ok(())
}

fn construct_prototype(
    program: &ContainerProgram,
    bindings: &BindingRegistry,
    properties: &PropertyResolver,
    events: &EventBus,
    singletons: &[Option<ComponentInstanceAnyPtr>],
    plan: u32,
) -> Result<ComponentInstanceAnyPtr, ContainerError> {
    let plan: &PrototypePlan = program
        .prototypes
        .get(plan as usize)
        .ok_or(ContainerError::UnknownPrototype(plan))?;
    let record = program.component(plan.component);
    let binding = binding_for(bindings, &record.class_name)?;

    let mut instance: Option<Box<dyn Any + Send + Sync>> = None;
    let mut sealed: Option<ComponentInstanceAnyPtr> = None;

    for step in &plan.steps {
        match step {
            InitStep::Construct { args, .. } => {
                let values =
                    resolve_sources(args, program, bindings, properties, events, singletons)?;
                instance = Some((binding.constructor)(&values).map_err(|source| {
                    ContainerError::ConstructorFailure {
                        component: record.class_name.clone(),
                        source,
                    }
                })?);
            }
            InitStep::InjectField { accessor, source, .. } => {
                let value =
                    resolve_source(source, program, bindings, properties, events, singletons)?;
                let target = instance.as_mut().ok_or_else(|| never_constructed(record))?;
                inject(binding, &record.class_name, target.as_mut(), accessor, value)?;
            }
            InitStep::InjectValue {
                accessor,
                expression,
                ..
            } => {
                let value = Value::Text(properties.resolve(expression)?);
                let target = instance.as_mut().ok_or_else(|| never_constructed(record))?;
                inject(binding, &record.class_name, target.as_mut(), accessor, value)?;
            }
            InitStep::InjectMethod { method, args, .. } => {
                let values =
                    resolve_sources(args, program, bindings, properties, events, singletons)?;
                let method_fn =
                    binding
                        .method(method)
                        .ok_or_else(|| ContainerError::MissingAccessor {
                            component: record.class_name.clone(),
                            accessor: method.clone(),
                        })?;
                let target = instance.as_mut().ok_or_else(|| never_constructed(record))?;
                method_fn(target.as_mut(), &values).map_err(|source| {
                    ContainerError::InjectionFailure {
                        component: record.class_name.clone(),
                        accessor: method.clone(),
                        source,
                    }
                })?;
            }
            InitStep::Seal { .. } => {
                let boxed = instance.take().ok_or_else(|| never_constructed(record))?;
                sealed = Some(ComponentInstanceAnyPtr::from(boxed));
            }
            InitStep::RegisterEvents { .. } => {
                let sealed = sealed.clone().ok_or_else(|| never_constructed(record))?;
                events.register(record.class_name.clone(), sealed);
            }
            InitStep::PostConstruct { .. } => {
                let sealed = sealed.as_ref().ok_or_else(|| never_constructed(record))?;
                invoke_post_construct(binding, record, sealed.as_ref())?;
            }
        }
    }

    sealed.ok_or_else(|| never_constructed(record))
}

fn resolve_sources(
    sources: &[DepSource],
    program: &ContainerProgram,
    bindings: &BindingRegistry,
    properties: &PropertyResolver,
    events: &EventBus,
    singletons: &[Option<ComponentInstanceAnyPtr>],
) -> Result<Vec<Value>, ContainerError> {
    sources
        .iter()
        .map(|source| resolve_source(source, program, bindings, properties, events, singletons))
        .collect()
}

fn resolve_source(
    source: &DepSource,
    program: &ContainerProgram,
    bindings: &BindingRegistry,
    properties: &PropertyResolver,
    events: &EventBus,
    singletons: &[Option<ComponentInstanceAnyPtr>],
) -> Result<Value, ContainerError> {
    match source {
        DepSource::Singleton(component) => singletons[*component as usize]
            .clone()
            .map(Value::Component)
            .ok_or_else(|| {
                ContainerError::Generation(GenerationError::InvalidProgram(format!(
                    "singleton {component} used before it was sealed"
                )))
            }),
        DepSource::Prototype(plan) => {
            construct_prototype(program, bindings, properties, events, singletons, *plan)
                .map(Value::Component)
        }
        DepSource::Absent => Ok(Value::Absent),
    }
}

fn binding_for<'a>(
    bindings: &'a BindingRegistry,
    class_name: &str,
) -> Result<&'a ComponentBinding, ContainerError> {
    bindings
        .get(class_name)
        .ok_or_else(|| ContainerError::MissingBinding(class_name.to_string()))
}

fn pending_instance<'a>(
    pending: &'a mut FxHashMap<u32, Box<dyn Any + Send + Sync>>,
    component: u32,
    record: &ComponentRecord,
) -> Result<&'a mut Box<dyn Any + Send + Sync>, ContainerError> {
    pending
        .get_mut(&component)
        .ok_or_else(|| never_constructed(record))
}

fn sealed_instance(
    singletons: &[Option<ComponentInstanceAnyPtr>],
    component: u32,
    record: &ComponentRecord,
) -> Result<ComponentInstanceAnyPtr, ContainerError> {
    singletons[component as usize]
        .clone()
        .ok_or_else(|| never_constructed(record))
}

fn never_constructed(record: &ComponentRecord) -> ContainerError {
    ContainerError::Generation(GenerationError::InvalidProgram(format!(
        "component {} used before construction",
        record.class_name
    )))
}

fn inject(
    binding: &ComponentBinding,
    class_name: &str,
    instance: &mut (dyn Any + Send + Sync),
    accessor: &str,
    value: Value,
) -> Result<(), ContainerError> {
    let setter = binding
        .setter(accessor)
        .ok_or_else(|| ContainerError::MissingAccessor {
            component: class_name.to_string(),
            accessor: accessor.to_string(),
        })?;

    setter(instance, value).map_err(|source| ContainerError::InjectionFailure {
        component: class_name.to_string(),
        accessor: accessor.to_string(),
        source,
    })
}

fn invoke_post_construct(
    binding: &ComponentBinding,
    record: &ComponentRecord,
    instance: &(dyn Any + Send + Sync),
) -> Result<(), ContainerError> {
    let Some(callback) = binding.post_construct else {
        return Err(ContainerError::MissingAccessor {
            component: record.class_name.clone(),
            accessor: "post-construct callback".to_string(),
        });
    };

    debug!(component = %record.class_name, "Invoking post-construct callback");
    callback(instance).map_err(|source| ContainerError::LifecycleFailure {
        component: record.class_name.clone(),
        source,
    })
}
