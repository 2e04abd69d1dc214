//! Nebula Core
//!
//! Resource model, schema and diff contract that infrastructure providers plug into

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
