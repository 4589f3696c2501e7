//! Container program generation from discovered component metadata.
//!
//! The generator is the back end of the pipeline: it consumes a
//! [ComponentMeta] set (plus optional cross-module imports and the woven
//! setter inventory), orders singletons topologically, resolves every
//! injection point to a [DepSource] or property expression, places the type
//! lookup table and emits a verified [ContainerProgram]. Generation is a
//! single-threaded, single-pass step; any fatal error aborts it with no
//! partial program.

pub mod lookup;
pub mod program;

use crate::codegen::program::{
    ComponentRecord, ContainerProgram, DepSource, InitStep, PrototypePlan, Provision, TypeMapping,
};
use crate::error::GenerationError;
use coldwire_metadata::component_meta::{ComponentMeta, Scope, Visibility};
use coldwire_metadata::export::BeanExport;
use coldwire_metadata::graph::DependencyGraph;
use coldwire_weaver::ir::{is_value_descriptor, parse_method};
use coldwire_weaver::weaver::setter_name;
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use tracing::{debug, info, warn};

/// Policy knobs for one generation pass.
#[derive(Clone, Copy, Default, Debug)]
pub struct GeneratorOptions {
    /// In strict mode, malformed method-injection descriptors are fatal
    /// instead of skipped with a warning.
    pub strict: bool,
}

/// A generated program together with the non-fatal diagnostics produced
/// along the way.
#[derive(Debug)]
pub struct Generation {
    pub program: ContainerProgram,
    pub warnings: Vec<String>,
}

/// Generates a [ContainerProgram] from component metadata.
pub struct ContainerGenerator {
    components: Vec<ComponentMeta>,
    imports: Vec<BeanExport>,
    /// Synthetic setter names per class, as reported by the weaving pass.
    /// When present, routing a field through a missing setter is fatal.
    woven_setters: Option<FxHashMap<String, FxHashSet<String>>>,
    options: GeneratorOptions,
}

impl ContainerGenerator {
    pub fn new(components: Vec<ComponentMeta>) -> Self {
        Self {
            components,
            imports: vec![],
            woven_setters: None,
            options: GeneratorOptions::default(),
        }
    }

    /// Registers bean exports of other modules; used to enrich
    /// missing-dependency diagnostics.
    pub fn with_imports(mut self, imports: Vec<BeanExport>) -> Self {
        self.imports = imports;
        self
    }

    /// Registers the setter inventory produced by the weaving pass.
    pub fn with_woven_setters(mut self, setters: FxHashMap<String, FxHashSet<String>>) -> Self {
        self.woven_setters = Some(setters);
        self
    }

    pub fn with_options(mut self, options: GeneratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn generate(self) -> Result<Generation, GenerationError> {
        let mut pass = GenerationPass::prepare(self)?;
        let order = pass.sort()?;
        pass.emit(&order)?;
        pass.finish()
    }
}

struct GenerationPass {
    components: Vec<ComponentMeta>,
    imports: Vec<BeanExport>,
    woven_setters: Option<FxHashMap<String, FxHashSet<String>>>,
    options: GeneratorOptions,
    class_index: FxHashMap<String, usize>,
    bean_index: FxHashMap<String, usize>,
    program: ContainerProgram,
    warnings: Vec<String>,
    /// Component index (in the program) per metadata index, topo order.
    assigned: FxHashMap<usize, u32>,
    /// Prototype plan index per metadata index.
    plans: FxHashMap<usize, u32>,
}

impl GenerationPass {
    fn prepare(generator: ContainerGenerator) -> Result<Self, GenerationError> {
        let mut class_index = FxHashMap::default();
        for (index, component) in generator.components.iter().enumerate() {
            if class_index
                .insert(component.class_name.clone(), index)
                .is_some()
            {
                return Err(GenerationError::DuplicateComponentName(
                    component.class_name.clone(),
                ));
            }
        }

        let mut warnings = vec![];
        let mut bean_index: FxHashMap<String, usize> = FxHashMap::default();
        for (index, component) in generator.components.iter().enumerate() {
            let bean_name = bean_name_of(component);
            if let Some(&existing) = bean_index.get(&bean_name) {
                let warning = format!(
                    "bean name {bean_name} of {} shadows {}",
                    component.class_name, generator.components[existing].class_name
                );
                warn!("{warning}");
                warnings.push(warning);
            } else {
                bean_index.insert(bean_name, index);
            }
        }

        Ok(Self {
            components: generator.components,
            imports: generator.imports,
            woven_setters: generator.woven_setters,
            options: generator.options,
            class_index,
            bean_index,
            program: ContainerProgram::default(),
            warnings,
            assigned: FxHashMap::default(),
            plans: FxHashMap::default(),
        })
    }

    /// Builds the dependency graph and returns metadata indices in
    /// topological order. A cycle aborts generation.
    fn sort(&mut self) -> Result<Vec<usize>, GenerationError> {
        let mut graph = DependencyGraph::new();

        for component in &self.components {
            graph.add_component(component.class_name.as_str());

            let dep_types = component
                .constructor_deps
                .iter()
                .chain(
                    component
                        .field_injections
                        .iter()
                        .filter(|field| !is_value_descriptor(&field.descriptor))
                        .map(|field| &field.dep_type),
                )
                .chain(component.method_injections.iter().flat_map(|m| &m.dep_types));

            for dep_type in dep_types {
                if self.class_index.contains_key(dep_type) {
                    graph.add_dependency(component.class_name.as_str(), dep_type.as_str());
                }
            }

            for explicit in &component.explicit_dependencies {
                match self.bean_index.get(explicit) {
                    Some(&target) => graph.add_dependency(
                        component.class_name.as_str(),
                        self.components[target].class_name.as_str(),
                    ),
                    None => {
                        let warning = format!(
                            "unknown explicit dependency {explicit} of {}",
                            component.class_name
                        );
                        warn!("{warning}");
                        self.warnings.push(warning);
                    }
                }
            }
        }

        let order = graph.topological_sort()?;
        Ok(order
            .iter()
            .map(|class_name| self.class_index[class_name])
            .collect_vec())
    }

    fn emit(&mut self, order: &[usize]) -> Result<(), GenerationError> {
        // assign program indices up front so forward-looking prototype
        // sources resolve while emitting earlier singletons
        for (position, &meta_index) in order.iter().enumerate() {
            self.assigned.insert(meta_index, position as u32);
            if self.components[meta_index].scope == Scope::Prototype {
                let plan = self.plans.len() as u32;
                self.plans.insert(meta_index, plan);
            }
        }

        for &meta_index in order {
            let component = self.components[meta_index].clone();
            let index = self.assigned[&meta_index];

            if component.lazy {
                debug!(component = %component.class_name, "Lazy hint ignored; singletons are constructed eagerly");
            }

            let steps = self.component_steps(&component, index)?;
            match component.scope {
                Scope::Singleton => {
                    self.program.init_steps.extend(steps);
                    self.program.components.push(ComponentRecord {
                        class_name: component.class_name.clone(),
                        bean_name: bean_name_of(&component),
                        scope: component.scope,
                        provision: Provision::Singleton,
                    });
                }
                Scope::Prototype => {
                    let plan = self.plans[&meta_index];
                    self.program.prototypes.push(PrototypePlan {
                        component: index,
                        steps,
                    });
                    self.program.components.push(ComponentRecord {
                        class_name: component.class_name.clone(),
                        bean_name: bean_name_of(&component),
                        scope: component.scope,
                        provision: Provision::Prototype { plan },
                    });
                }
            }

            self.map_types(&component, index);
        }

        self.program.shutdown_order = order
            .iter()
            .rev()
            .filter(|&&meta_index| {
                self.components[meta_index].scope == Scope::Singleton
                    && self.components[meta_index].pre_destroy.is_some()
            })
            .map(|meta_index| self.assigned[meta_index])
            .collect_vec();

        let keys = self
            .program
            .mappings
            .iter()
            .map(|mapping| mapping.key)
            .collect_vec();
        self.program.table = lookup::build_table(&keys);

        Ok(())
    }

    fn component_steps(
        &mut self,
        component: &ComponentMeta,
        index: u32,
    ) -> Result<Vec<InitStep>, GenerationError> {
        let mut steps = vec![];

        let args = component
            .constructor_deps
            .iter()
            .map(|dep_type| self.resolve_dependency(component, dep_type, false))
            .collect::<Result<Vec<_>, _>>()?;
        steps.push(InitStep::Construct {
            component: index,
            args,
        });

        for field in &component.field_injections {
            let accessor = match field.visibility {
                Visibility::Public => field.name.clone(),
                _ => {
                    let setter = setter_name(&field.name);
                    if let Some(woven) = &self.woven_setters {
                        let has_setter = woven
                            .get(&component.class_name)
                            .map(|setters| setters.contains(&setter))
                            .unwrap_or(false);
                        if !has_setter {
                            return Err(GenerationError::MissingSyntheticSetter {
                                component: component.class_name.clone(),
                                field: field.name.clone(),
                            });
                        }
                    }
                    setter
                }
            };

            if is_value_descriptor(&field.descriptor) {
                steps.push(InitStep::InjectValue {
                    component: index,
                    accessor,
                    expression: format!("${{{}}}", field.name),
                });
            } else {
                let source = self.resolve_dependency(component, &field.dep_type, field.optional)?;
                steps.push(InitStep::InjectField {
                    component: index,
                    accessor,
                    source,
                });
            }
        }

        for method in &component.method_injections {
            let well_formed = parse_method(&method.descriptor)
                .map(|(params, _)| params.len() == method.dep_types.len())
                .unwrap_or(false);
            if !well_formed {
                if self.options.strict {
                    return Err(GenerationError::MalformedDescriptor {
                        component: component.class_name.clone(),
                        method: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                    });
                }
                let warning = format!(
                    "skipping injection method {}.{} with malformed descriptor {}",
                    component.class_name, method.name, method.descriptor
                );
                warn!("{warning}");
                self.warnings.push(warning);
                continue;
            }

            let args = method
                .dep_types
                .iter()
                .map(|dep_type| self.resolve_dependency(component, dep_type, false))
                .collect::<Result<Vec<_>, _>>()?;
            steps.push(InitStep::InjectMethod {
                component: index,
                method: method.name.clone(),
                args,
            });
        }

        steps.push(InitStep::Seal { component: index });
        if component.has_subscribe_methods {
            steps.push(InitStep::RegisterEvents { component: index });
        }
        if component.post_construct.is_some() {
            steps.push(InitStep::PostConstruct { component: index });
        }

        Ok(steps)
    }

    fn resolve_dependency(
        &self,
        component: &ComponentMeta,
        dep_type: &str,
        optional: bool,
    ) -> Result<DepSource, GenerationError> {
        if let Some(&meta_index) = self.class_index.get(dep_type) {
            return Ok(match self.components[meta_index].scope {
                Scope::Singleton => DepSource::Singleton(self.assigned[&meta_index]),
                Scope::Prototype => DepSource::Prototype(self.plans[&meta_index]),
            });
        }

        if optional {
            return Ok(DepSource::Absent);
        }

        let hint = self
            .imports
            .iter()
            .find(|export| export.beans.iter().any(|bean| bean.type_name == dep_type))
            .map(|export| {
                format!(
                    "; exported by module {} - link that module into this container build",
                    export.module
                )
            })
            .unwrap_or_default();

        Err(GenerationError::MissingDependency {
            component: component.class_name.clone(),
            dependency: dep_type.to_string(),
            hint,
        })
    }

    /// Maps the component's own type and every interface to it. The first
    /// component claiming a type wins; later claims are warned about.
    fn map_types(&mut self, component: &ComponentMeta, index: u32) {
        for type_name in std::iter::once(&component.class_name).chain(&component.interfaces) {
            if let Some(existing) = self
                .program
                .mappings
                .iter()
                .find(|mapping| &mapping.type_name == type_name)
            {
                let warning = format!(
                    "type {type_name} already provided by {}; {} is not reachable by it",
                    self.program.component(existing.component).class_name,
                    component.class_name
                );
                warn!("{warning}");
                self.warnings.push(warning);
                continue;
            }

            self.program.mappings.push(TypeMapping {
                type_name: type_name.clone(),
                key: lookup::hash_key(type_name),
                component: index,
            });
        }
    }

    fn finish(self) -> Result<Generation, GenerationError> {
        self.program.verify()?;

        info!(
            components = self.program.components.len(),
            singletons = self.program.singleton_count(),
            prototypes = self.program.prototypes.len(),
            mappings = self.program.mappings.len(),
            warnings = self.warnings.len(),
            "Generated container program"
        );

        Ok(Generation {
            program: self.program,
            warnings: self.warnings,
        })
    }
}

fn bean_name_of(component: &ComponentMeta) -> String {
    component
        .component_name
        .clone()
        .unwrap_or_else(|| component.default_bean_name())
}
