//! End-to-end pipeline test: component metadata is persisted and re-read,
//! class artifacts are woven, the woven setter inventory feeds generation,
//! and the resulting program bootstraps a working container.

use coldwire_container::bindings::{
    BindingRegistry, ComponentBinding, ComponentInstancePtr, ComponentType, Value,
};
use coldwire_container::codegen::ContainerGenerator;
use coldwire_container::container::{Container, ContainerState};
use coldwire_container::event::EventBus;
use coldwire_container::value::PropertyResolver;
use coldwire_container::ErrorPtr;
use coldwire_metadata::component_meta::{
    read_metadata, write_metadata, ComponentMeta, FieldInjection, LifecycleMethod, Scope,
    Visibility, COMPONENT_METADATA_FILE,
};
use coldwire_weaver::classfile::flags::{ACC_PRIVATE, ACC_PUBLIC};
use coldwire_weaver::classfile::{ClassFile, FieldInfo};
use coldwire_weaver::weaver::FieldAccessWeaver;
use fxhash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Repo;

impl ComponentType for Repo {
    const TYPE_NAME: &'static str = "com.example.Repo";
}

struct Service {
    repo: ComponentInstancePtr<Repo>,
    init_calls: AtomicU32,
}

impl ComponentType for Service {
    const TYPE_NAME: &'static str = "com.example.Service";
}

struct Controller {
    service: Option<ComponentInstancePtr<Service>>,
}

impl ComponentType for Controller {
    const TYPE_NAME: &'static str = "com.example.Controller";
}

fn construct_repo(_args: &[Value]) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr> {
    Ok(Box::new(Repo))
}

fn construct_service(args: &[Value]) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr> {
    Ok(Box::new(Service {
        repo: args[0].clone().into_component()?,
        init_calls: AtomicU32::new(0),
    }))
}

fn service_init(instance: &(dyn Any + Send + Sync)) -> Result<(), ErrorPtr> {
    let service = instance.downcast_ref::<Service>().ok_or("not a Service")?;
    service.init_calls.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn construct_controller(_args: &[Value]) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr> {
    Ok(Box::new(Controller { service: None }))
}

fn set_controller_service(
    instance: &mut (dyn Any + Send + Sync),
    value: Value,
) -> Result<(), ErrorPtr> {
    let controller = instance
        .downcast_mut::<Controller>()
        .ok_or("not a Controller")?;
    controller.service = Some(value.into_component()?);
    Ok(())
}

fn scenario_metadata() -> Vec<ComponentMeta> {
    let repo = ComponentMeta::new(Repo::TYPE_NAME, Scope::Singleton);

    let mut service = ComponentMeta::new(Service::TYPE_NAME, Scope::Singleton);
    service.constructor_deps = vec![Repo::TYPE_NAME.to_string()];
    service.post_construct = Some(LifecycleMethod {
        name: "init".to_string(),
        descriptor: "()V".to_string(),
    });

    let mut controller = ComponentMeta::new(Controller::TYPE_NAME, Scope::Prototype);
    controller.field_injections = vec![FieldInjection {
        name: "service".to_string(),
        dep_type: Service::TYPE_NAME.to_string(),
        descriptor: "Lcom/example/Service;".to_string(),
        visibility: Visibility::Private,
        optional: false,
        provider: false,
    }];

    vec![repo, service, controller]
}

fn controller_artifact() -> ClassFile {
    let mut class = ClassFile::new("com/example/Controller", ACC_PUBLIC);
    class.fields.push(FieldInfo {
        name: "service".to_string(),
        descriptor: "Lcom/example/Service;".to_string(),
        access: ACC_PRIVATE,
        annotations: vec!["Lcoldwire/annotation/Inject;".to_string()],
    });
    class
}

fn scenario_bindings() -> BindingRegistry {
    let mut registry = BindingRegistry::new();
    registry
        .register(ComponentBinding::new(Repo::TYPE_NAME, construct_repo))
        .unwrap();
    registry
        .register(
            ComponentBinding::new(Service::TYPE_NAME, construct_service)
                .with_post_construct(service_init),
        )
        .unwrap();
    registry
        .register(
            ComponentBinding::new(Controller::TYPE_NAME, construct_controller)
                .with_setter("__di_set_service", set_controller_service),
        )
        .unwrap();
    registry
}

#[test]
fn full_pipeline_produces_a_working_container() {
    let dir = tempfile::tempdir().unwrap();

    // persist and re-read the discovered metadata, as a downstream module
    // build would
    let metadata_path = dir.path().join(COMPONENT_METADATA_FILE);
    write_metadata(&metadata_path, &scenario_metadata()).unwrap();
    let components = read_metadata(&metadata_path).unwrap();
    assert_eq!(components.len(), 3);

    // weave the compiled controller so its private field gets a setter
    let artifact_path = dir.path().join("Controller.cwc");
    controller_artifact().write_file(&artifact_path).unwrap();

    let results = FieldAccessWeaver::new().weave_directory(dir.path()).unwrap();
    let mut woven: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
    for result in &results {
        assert!(result.error.is_none());
        woven
            .entry(result.class_name.replace('/', "."))
            .or_default()
            .extend(result.added_setters.iter().cloned());
    }
    assert_eq!(woven["com.example.Controller"].len(), 1);

    // generate and bootstrap
    let generation = ContainerGenerator::new(components)
        .with_woven_setters(woven)
        .generate()
        .unwrap();
    assert!(generation.warnings.is_empty());

    let container = Container::bootstrap(
        generation.program,
        scenario_bindings(),
        PropertyResolver::new(vec![]),
        EventBus::new(),
    )
    .unwrap();
    assert_eq!(container.state(), ContainerState::Ready);

    // singleton identity and lifecycle
    let service = container.instance::<Service>().unwrap();
    assert_eq!(service.init_calls.load(Ordering::SeqCst), 1);

    // prototypes are fresh per lookup, each wired through the woven setter
    let first = container.instance::<Controller>().unwrap();
    let second = container.instance::<Controller>().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(first.service.as_ref().unwrap(), &service));
    assert!(Arc::ptr_eq(second.service.as_ref().unwrap(), &service));

    // unknown qualifiers resolve to nothing
    assert!(container
        .named_instance::<Service>(Some("unknownQualifier"))
        .is_none());

    container.shutdown();
    assert_eq!(container.state(), ContainerState::Closed);
}

#[test]
fn generation_fails_without_woven_setter_for_private_field() {
    let error = ContainerGenerator::new(scenario_metadata())
        .with_woven_setters(FxHashMap::default())
        .generate()
        .unwrap_err();

    assert!(error.to_string().contains("service"));
}
