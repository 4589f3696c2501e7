//! The generated container program.
//!
//! A [ContainerProgram] is the sole output of generation: a flat, index-based
//! description of what the runtime container executes. Singleton bootstrap is
//! a linear step list in topological order; prototypes get per-component step
//! plans dispatched by index; type lookup goes through a pre-placed hash
//! table over the type mappings.

use crate::codegen::lookup;
use crate::error::GenerationError;
use coldwire_metadata::component_meta::Scope;

/// Where an injected dependency comes from.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum DepSource {
    /// An already sealed singleton, by component index.
    Singleton(u32),
    /// A fresh instance from a prototype plan, by plan index.
    Prototype(u32),
    /// A satisfiably-absent optional dependency.
    Absent,
}

/// One bootstrap or prototype-construction step. Steps for a component are
/// always emitted in the order construct, inject, seal, register, lifecycle.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum InitStep {
    /// Constructs the instance with resolved constructor arguments.
    Construct { component: u32, args: Vec<DepSource> },
    /// Stores a dependency through a bound accessor (field name or synthetic
    /// setter name).
    InjectField {
        component: u32,
        accessor: String,
        source: DepSource,
    },
    /// Resolves a property expression and stores it through an accessor.
    InjectValue {
        component: u32,
        accessor: String,
        expression: String,
    },
    /// Invokes an injection method with resolved arguments.
    InjectMethod {
        component: u32,
        method: String,
        args: Vec<DepSource>,
    },
    /// Publishes the mutable instance as an immutable shared pointer. No
    /// injection step for this component may follow.
    Seal { component: u32 },
    /// Registers the sealed instance with the event bus.
    RegisterEvents { component: u32 },
    /// Invokes the post-construct callback on the sealed instance.
    PostConstruct { component: u32 },
}

impl InitStep {
    pub fn component(&self) -> u32 {
        match self {
            InitStep::Construct { component, .. }
            | InitStep::InjectField { component, .. }
            | InitStep::InjectValue { component, .. }
            | InitStep::InjectMethod { component, .. }
            | InitStep::Seal { component }
            | InitStep::RegisterEvents { component }
            | InitStep::PostConstruct { component } => *component,
        }
    }
}

/// How instances of a component are provided at lookup time.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Provision {
    /// One shared instance, sealed during bootstrap.
    Singleton,
    /// A fresh instance per request, via the indexed prototype plan.
    Prototype { plan: u32 },
}

/// One managed component.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ComponentRecord {
    /// Fully-qualified dot-separated class name.
    pub class_name: String,
    /// Qualifier for named lookup; defaults to the decapitalized simple name.
    pub bean_name: String,
    pub scope: Scope,
    pub provision: Provision,
}

/// One entry of the type-lookup table: a component is reachable by its own
/// type and by every interface it implements.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TypeMapping {
    pub type_name: String,
    /// Hash key of `type_name`, precomputed at generation time.
    pub key: u64,
    pub component: u32,
}

/// Construction plan for one prototype component.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PrototypePlan {
    pub component: u32,
    /// Full step sequence for one fresh instance, ending in seal, event
    /// registration and post-construct as applicable.
    pub steps: Vec<InitStep>,
}

/// A complete, executable container description.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ContainerProgram {
    pub components: Vec<ComponentRecord>,
    /// Singleton bootstrap steps in topological order.
    pub init_steps: Vec<InitStep>,
    pub mappings: Vec<TypeMapping>,
    /// Open-addressed table of mapping indices; see [crate::codegen::lookup].
    pub table: Vec<Option<u32>>,
    pub prototypes: Vec<PrototypePlan>,
    /// Components with a pre-destroy callback, in reverse construction order.
    pub shutdown_order: Vec<u32>,
}

impl ContainerProgram {
    pub fn component(&self, index: u32) -> &ComponentRecord {
        &self.components[index as usize]
    }

    pub fn singleton_count(&self) -> usize {
        self.components
            .iter()
            .filter(|record| record.provision == Provision::Singleton)
            .count()
    }

    /// Structural validation: all indices in range, table slots consistent
    /// with the shared placement routine, singleton steps well ordered
    /// (construct before inject before seal, each exactly once).
    pub fn verify(&self) -> Result<(), GenerationError> {
        let invalid = |reason: String| GenerationError::InvalidProgram(reason);
        let component_count = self.components.len() as u32;

        let check_component = |index: u32| {
            if index >= component_count {
                Err(invalid(format!("component index {index} out of range")))
            } else {
                Ok(())
            }
        };
        let check_source = |source: &DepSource| match source {
            DepSource::Singleton(index) => {
                check_component(*index)?;
                match self.components[*index as usize].provision {
                    Provision::Singleton => Ok(()),
                    Provision::Prototype { .. } => Err(invalid(format!(
                        "singleton source refers to prototype component {index}"
                    ))),
                }
            }
            DepSource::Prototype(plan) => {
                if *plan as usize >= self.prototypes.len() {
                    Err(invalid(format!("prototype plan {plan} out of range")))
                } else {
                    Ok(())
                }
            }
            DepSource::Absent => Ok(()),
        };

        self.verify_steps(&self.init_steps, &check_component, &check_source)?;

        for (index, plan) in self.prototypes.iter().enumerate() {
            check_component(plan.component)?;
            if !matches!(
                self.components[plan.component as usize].provision,
                Provision::Prototype { plan: recorded } if recorded as usize == index
            ) {
                return Err(invalid(format!(
                    "prototype plan {index} does not match its component record"
                )));
            }
            if plan.steps.iter().any(|step| step.component() != plan.component) {
                return Err(invalid(format!(
                    "prototype plan {index} contains steps for another component"
                )));
            }
            self.verify_steps(&plan.steps, &check_component, &check_source)?;
        }

        if !self.table.len().is_power_of_two() {
            return Err(invalid("lookup table size is not a power of two".to_string()));
        }
        for mapping in &self.mappings {
            check_component(mapping.component)?;
            if mapping.key != lookup::hash_key(&mapping.type_name) {
                return Err(invalid(format!(
                    "stale hash key for mapping {}",
                    mapping.type_name
                )));
            }
        }
        let mut seen = vec![false; self.mappings.len()];
        for slot in self.table.iter().flatten() {
            let index = *slot as usize;
            if index >= self.mappings.len() || seen[index] {
                return Err(invalid(format!("invalid table slot entry {slot}")));
            }
            seen[index] = true;
        }
        if seen.iter().any(|placed| !placed) {
            return Err(invalid("mapping missing from lookup table".to_string()));
        }

        for component in &self.shutdown_order {
            check_component(*component)?;
        }

        Ok(())
    }

    fn verify_steps(
        &self,
        steps: &[InitStep],
        check_component: &impl Fn(u32) -> Result<(), GenerationError>,
        check_source: &impl Fn(&DepSource) -> Result<(), GenerationError>,
    ) -> Result<(), GenerationError> {
        let invalid = |reason: String| GenerationError::InvalidProgram(reason);

        let mut constructed = vec![false; self.components.len()];
        let mut sealed = vec![false; self.components.len()];

        for step in steps {
            let component = step.component();
            check_component(component)?;
            let index = component as usize;

            match step {
                InitStep::Construct { args, .. } => {
                    if constructed[index] {
                        return Err(invalid(format!("component {component} constructed twice")));
                    }
                    constructed[index] = true;
                    for arg in args {
                        check_source(arg)?;
                    }
                }
                InitStep::InjectField { source, .. } => {
                    check_source(source)?;
                    if !constructed[index] || sealed[index] {
                        return Err(invalid(format!(
                            "injection outside construct..seal window for component {component}"
                        )));
                    }
                }
                InitStep::InjectValue { .. } | InitStep::InjectMethod { .. } => {
                    if let InitStep::InjectMethod { args, .. } = step {
                        for arg in args {
                            check_source(arg)?;
                        }
                    }
                    if !constructed[index] || sealed[index] {
                        return Err(invalid(format!(
                            "injection outside construct..seal window for component {component}"
                        )));
                    }
                }
                InitStep::Seal { .. } => {
                    if !constructed[index] || sealed[index] {
                        return Err(invalid(format!("invalid seal for component {component}")));
                    }
                    sealed[index] = true;
                }
                InitStep::RegisterEvents { .. } | InitStep::PostConstruct { .. } => {
                    if !sealed[index] {
                        return Err(invalid(format!(
                            "lifecycle step before seal for component {component}"
                        )));
                    }
                }
            }
        }

        for (index, was_constructed) in constructed.iter().enumerate() {
            if *was_constructed && !sealed[index] {
                return Err(invalid(format!("component {index} constructed but never sealed")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_component_program() -> ContainerProgram {
        let type_name = "com.example.Repo".to_string();
        let key = lookup::hash_key(&type_name);
        ContainerProgram {
            components: vec![ComponentRecord {
                class_name: type_name.clone(),
                bean_name: "repo".to_string(),
                scope: Scope::Singleton,
                provision: Provision::Singleton,
            }],
            init_steps: vec![
                InitStep::Construct {
                    component: 0,
                    args: vec![],
                },
                InitStep::Seal { component: 0 },
            ],
            mappings: vec![TypeMapping {
                type_name,
                key,
                component: 0,
            }],
            table: lookup::build_table(&[key]),
            prototypes: vec![],
            shutdown_order: vec![],
        }
    }

    #[test]
    fn should_accept_well_formed_program() {
        single_component_program().verify().unwrap();
    }

    #[test]
    fn should_reject_injection_after_seal() {
        let mut program = single_component_program();
        program.init_steps.push(InitStep::InjectField {
            component: 0,
            accessor: "repo".to_string(),
            source: DepSource::Absent,
        });

        assert!(program.verify().is_err());
    }

    #[test]
    fn should_reject_unsealed_component() {
        let mut program = single_component_program();
        program.init_steps.pop();

        assert!(program.verify().is_err());
    }

    #[test]
    fn should_reject_out_of_range_indices() {
        let mut program = single_component_program();
        program.init_steps[0] = InitStep::Construct {
            component: 0,
            args: vec![DepSource::Singleton(7)],
        };

        assert!(program.verify().is_err());

        let mut program = single_component_program();
        program.shutdown_order.push(9);
        assert!(program.verify().is_err());
    }

    #[test]
    fn should_reject_stale_hash_key() {
        let mut program = single_component_program();
        program.mappings[0].key ^= 1;

        assert!(program.verify().is_err());
    }

    #[test]
    fn should_reject_lifecycle_before_seal() {
        let mut program = single_component_program();
        program.init_steps.insert(1, InitStep::PostConstruct { component: 0 });

        assert!(program.verify().is_err());
    }
}
