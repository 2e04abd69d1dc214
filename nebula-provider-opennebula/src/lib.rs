//! Nebula OpenNebula Provider
//!
//! Manages OpenNebula virtual machines through the controller's XML-RPC API.
//!
//! ## Module Structure
//!
//! - `spec` - Typed VM specification decoded from configuration
//! - `template` - Template compiler
//! - `permissions` - Permission codec
//! - `poller` - Convergence poller
//! - `client` / `xmlrpc` - Remote API trait and its XML-RPC implementation
//! - `record` - Remote VM record
//! - `provider` - OpenNebulaProvider lifecycle
//! - `resources` / `schemas` - Resource type and schema definitions

pub mod client;
pub mod config;
pub mod error;
pub mod permissions;
pub mod poller;
pub mod provider;
pub mod record;
pub mod resources;
pub mod schemas;
pub mod spec;
pub mod template;
pub mod xmlrpc;

// Re-export main types
pub use client::OneApi;
pub use config::{OneConfig, Timeouts};
pub use error::{OneError, OneResult};
pub use permissions::Permissions;
pub use provider::OpenNebulaProvider;
pub use spec::VmSpec;
pub use xmlrpc::OneClient;

use nebula_core::differ::find_changed_attributes;
use nebula_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use nebula_core::resource::{Resource, ResourceId, State, Value};

use provider::parse_identifier;
use record::VmRecord;
use resources::resource_types;
use schemas::virtual_machine;

fn check_type(id: &ResourceId) -> ProviderResult<()> {
    if id.resource_type == virtual_machine::RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
            .for_resource(id.clone()))
    }
}

fn to_state(id: &ResourceId, vm: &VmRecord) -> State {
    State::existing(id.clone(), vm.to_attributes()).with_identifier(vm.id.to_string())
}

/// Decode a resource into a specification. The resource name doubles as the
/// VM name when none is configured.
pub fn decode(resource: &Resource) -> OneResult<VmSpec> {
    let mut attributes = resource.attributes.clone();
    virtual_machine::schema().apply_defaults(&mut attributes);
    attributes
        .entry("name".to_string())
        .or_insert_with(|| Value::String(resource.id.name.clone()));
    VmSpec::from_attributes(&attributes)
}

impl<C: OneApi> OpenNebulaProvider<C> {
    async fn read_resource(&self, id: &ResourceId, identifier: Option<&str>) -> ProviderResult<State> {
        check_type(id)?;
        let vm = self
            .read_vm(identifier, Some(&id.name))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        Ok(match vm {
            Some(vm) => to_state(id, &vm),
            None => State::not_found(id.clone()),
        })
    }

    async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        check_type(&resource.id)?;
        let result: OneResult<VmRecord> = async {
            let spec = decode(resource)?;
            self.create_vm(&spec).await
        }
        .await;

        result
            .map(|vm| to_state(&resource.id, &vm))
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))
    }

    async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        check_type(id)?;
        let changed =
            find_changed_attributes(&to.attributes, &from.attributes, &virtual_machine::schema());

        let result: OneResult<VmRecord> = async {
            let vm_id = parse_identifier(identifier)?;
            let spec = decode(to)?;
            self.update_vm(vm_id, &changed, &spec).await
        }
        .await;

        result
            .map(|vm| to_state(id, &vm))
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }

    async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        check_type(id)?;
        let result: OneResult<()> = async {
            let vm_id = parse_identifier(identifier)?;
            self.delete_vm(vm_id).await
        }
        .await;

        result.map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }
}

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl<C: OneApi> Provider for OpenNebulaProvider<C> {
    fn name(&self) -> &'static str {
        "opennebula"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn exists(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<bool>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move {
            check_type(&id)?;
            let result = match identifier.as_deref() {
                Some(identifier) => match parse_identifier(identifier) {
                    Ok(vm_id) => self.vm_exists(vm_id).await,
                    Err(e) => Err(e),
                },
                None => self.read_vm(None, Some(&id.name)).await.map(|vm| vm.is_some()),
            };
            result.map_err(|e| ProviderError::from(e).for_resource(id))
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use nebula_core::differ::create_plan;
    use nebula_core::effect::Effect;
    use nebula_core::interpreter::{EffectOutcome, Interpreter};

    use crate::provider::tests::{FakeOne, vm};

    fn web() -> Resource {
        Resource::new("virtual_machine", "web")
            .with_attribute("cpu", Value::Float(0.5))
            .with_attribute("memory", Value::Int(1024))
            .with_attribute("permissions", Value::String("640".to_string()))
    }

    #[test]
    fn decode_defaults_name_to_resource_name() {
        let spec = decode(&web()).unwrap();
        assert_eq!(spec.name.as_deref(), Some("web"));
        assert!(!spec.pending);
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_read_back() {
        let provider = OpenNebulaProvider::new(FakeOne::default());

        let state = provider.create(&web()).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some("0"));
        assert_eq!(state.attributes["permissions"], Value::String("640".to_string()));

        let read = provider.read(&state.id, None).await.unwrap();
        assert!(read.exists);
        assert_eq!(read.identifier.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn errors_carry_the_resource() {
        let provider = OpenNebulaProvider::new(FakeOne::default());
        let resource = Resource::new("virtual_machine", "web");

        let err = provider.create(&resource).await.unwrap_err();
        assert_eq!(err.resource_id, Some(resource.id.clone()));
        assert!(err.message.contains("cpu and memory are required"));

        let err = provider.delete(&resource.id, "abc").await.unwrap_err();
        assert!(err.message.contains("not a valid VM id"));
    }

    #[tokio::test]
    async fn unknown_resource_type_is_rejected() {
        let provider = OpenNebulaProvider::new(FakeOne::default());
        let id = ResourceId::new("image", "base");
        assert!(provider.read(&id, Some("1")).await.is_err());
    }

    #[tokio::test]
    async fn update_outside_in_place_fields_requires_replacement() {
        let provider = OpenNebulaProvider::new(FakeOne::default().with_vm(vm(3, "web", 3, 3)));
        let from = provider
            .read(&ResourceId::new("virtual_machine", "web"), Some("3"))
            .await
            .unwrap();
        let to = web().with_attribute("vcpu", Value::Int(4));

        let err = provider.update(&from.id, "3", &from, &to).await.unwrap_err();
        assert!(err.requires_replacement);
    }

    #[tokio::test(start_paused = true)]
    async fn plan_and_apply_replaces_boot_failed_vm() {
        let provider = OpenNebulaProvider::new(FakeOne::default().with_vm(vm(3, "web", 3, 36)));
        let id = ResourceId::new("virtual_machine", "web");
        let current = provider.read(&id, None).await.unwrap();

        let mut states = HashMap::new();
        states.insert(id.clone(), current);
        let desired = vec![Resource::new("virtual_machine", "web")
            .with_attribute("cpu", Value::Float(0.5))
            .with_attribute("memory", Value::Int(1024))];

        let plan = create_plan(&desired, &states, &provider).unwrap();
        assert!(matches!(plan.effects(), [Effect::Replace { .. }]));

        let result = Interpreter::new(&provider).apply(&plan).await;
        assert!(result.is_success());
        match &result.outcomes[0] {
            Ok(EffectOutcome::Replaced { state }) => {
                assert_eq!(state.identifier.as_deref(), Some("4"))
            }
            other => panic!("Expected Replaced, got {:?}", other),
        }
        assert_eq!(
            provider.client().actions(),
            vec!["terminate 3", "allocate pending=false", "rename 4 web"]
        );
    }
}
