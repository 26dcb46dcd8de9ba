//! Gantry Core - Core library for the gantry workflow orchestrator
//!
//! This crate provides the error taxonomy, configuration loading, and the
//! immutable project dependency graph that the task engine schedules against.

pub mod config;
pub mod error;
pub mod graph;
pub mod project;

pub use error::{ConfigError, GantryError, GraphError, Result};
pub use graph::{
    DependencyGraph, DependencyQuery, Edge, EdgePurpose, GraphBuilder, Node, NodeAction, NodeFilter,
    NodeId, NodeKind,
};
pub use project::{PathMatch, Project};
