//! Effect - A side effect to be performed against a Provider
//!
//! Effects are plain values. Nothing happens until an Interpreter executes them.

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource that does not exist yet
    Create(Resource),
    /// Apply in-place changes to an existing resource
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
    },
    /// Destroy the existing resource and create it again
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
    },
    /// Destroy an existing resource
    Delete { id: ResourceId, identifier: String },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(resource) => &resource.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => id,
        }
    }

    /// Whether executing this effect destroys the existing resource
    pub fn is_destructive(&self) -> bool {
        matches!(self, Effect::Replace { .. } | Effect::Delete { .. })
    }
}
