//! OpenNebula resource schema definitions

pub mod virtual_machine;

use nebula_core::schema::ResourceSchema;

/// Returns all OpenNebula schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    vec![virtual_machine::schema()]
}
