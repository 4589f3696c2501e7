//! Component metadata model and static dependency analysis for the Coldwire
//! dependency injection toolchain.
//!
//! The toolchain is split into a front end which discovers components and
//! records facts about them, and back ends which consume those facts to weave
//! class artifacts and generate the runtime container. This crate is the
//! shared fact database: the [ComponentMeta](component_meta::ComponentMeta)
//! model, its stable line-based serialization, the cross-module
//! [bean export](export) artifact and the [DependencyGraph](graph::DependencyGraph)
//! used to establish initialization order.

pub mod component_meta;
mod error;
pub mod export;
pub mod graph;

pub use error::{GraphError, MetadataError};
