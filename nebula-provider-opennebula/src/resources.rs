//! Resource type definitions for OpenNebula

use nebula_core::differ::ResourceDiff;
use nebula_core::provider::{ProviderResult, ResourceType};
use nebula_core::resource::Value;
use nebula_core::schema::ResourceSchema;

use crate::poller::{LCM_BOOT_FAILURE, LCM_RUNNING};
use crate::schemas::virtual_machine;

pub struct VirtualMachineType;

impl ResourceType for VirtualMachineType {
    fn name(&self) -> &'static str {
        virtual_machine::RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        virtual_machine::schema()
    }

    /// A VM stuck in boot failure is recreated instead of left in place
    fn customize_diff(&self, diff: &mut ResourceDiff) -> ProviderResult<()> {
        if diff.get("lcmstate") == Some(&Value::Int(LCM_BOOT_FAILURE)) {
            log::warn!("VM is in boot failure, planning replacement");
            diff.set_new("lcmstate", Value::Int(LCM_RUNNING));
            diff.force_new("lcmstate")?;
        }
        Ok(())
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![Box::new(VirtualMachineType)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use nebula_core::differ::{Diff, diff};
    use nebula_core::resource::{Resource, ResourceId, State};

    fn observed(lcm_state: i64) -> State {
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("web".to_string()));
        attrs.insert("state".to_string(), Value::Int(3));
        attrs.insert("lcmstate".to_string(), Value::Int(lcm_state));
        attrs.insert("cpu".to_string(), Value::Float(1.0));
        State::existing(ResourceId::new("virtual_machine", "web"), attrs).with_identifier("42")
    }

    fn desired() -> Resource {
        Resource::new("virtual_machine", "web")
            .with_attribute("name", Value::String("web".to_string()))
            .with_attribute("cpu", Value::Int(1))
    }

    #[test]
    fn boot_failure_forces_replacement() {
        match diff(&desired(), &observed(36), &VirtualMachineType).unwrap() {
            Diff::Replace { forced_by, .. } => assert_eq!(forced_by, vec!["lcmstate".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn running_vm_is_left_alone() {
        assert!(matches!(
            diff(&desired(), &observed(3), &VirtualMachineType).unwrap(),
            Diff::NoChange(_)
        ));
    }

    #[test]
    fn rename_is_an_update_but_cpu_is_a_replacement() {
        let renamed = desired().with_attribute("name", Value::String("api".to_string()));
        assert!(matches!(
            diff(&renamed, &observed(3), &VirtualMachineType).unwrap(),
            Diff::Update { .. }
        ));

        let resized = desired().with_attribute("cpu", Value::Float(2.0));
        assert!(matches!(
            diff(&resized, &observed(3), &VirtualMachineType).unwrap(),
            Diff::Replace { .. }
        ));
    }

    fn disk(size: i64) -> Value {
        let mut map = HashMap::new();
        map.insert("image_id".to_string(), Value::Int(5));
        map.insert("size".to_string(), Value::Int(size));
        Value::Map(map)
    }

    fn observed_with_disk() -> State {
        let mut state = observed(3);
        let mut reported = HashMap::new();
        reported.insert("image_id".to_string(), Value::Int(5));
        reported.insert("size".to_string(), Value::Int(2252));
        reported.insert("target".to_string(), Value::String("vda".to_string()));
        state
            .attributes
            .insert("disk".to_string(), Value::List(vec![Value::Map(reported)]));
        state
    }

    #[test]
    fn zero_disk_size_keeps_image_size() {
        let resource = desired().with_attribute("disk", Value::List(vec![disk(0)]));
        assert!(matches!(
            diff(&resource, &observed_with_disk(), &VirtualMachineType).unwrap(),
            Diff::NoChange(_)
        ));
    }

    #[test]
    fn explicit_disk_size_change_is_a_replacement() {
        let resource = desired().with_attribute("disk", Value::List(vec![disk(4096)]));
        match diff(&resource, &observed_with_disk(), &VirtualMachineType).unwrap() {
            Diff::Replace { forced_by, .. } => assert_eq!(forced_by, vec!["disk".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }
}
