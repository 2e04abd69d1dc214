//! Virtual machine resource schema
//!
//! Everything except `name`, `permissions`, `group` and `gid` forces
//! recreation when changed.

use nebula_core::resource::Value;
use nebula_core::schema::{AttributeSchema, AttributeType, BlockSchema, ResourceSchema, types};

use crate::permissions::Permissions;
use crate::spec::{DEFAULT_KEYMAP, MAX_DISKS, MAX_NICS, nic_identity_of};

pub const RESOURCE_TYPE: &str = "virtual_machine";

/// Three-digit permission mode such as "640"
pub fn permission_mode() -> AttributeType {
    AttributeType::Custom {
        name: "PermissionMode".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => Permissions::parse(s).map(|_| ()).map_err(|e| e.to_string()),
            _ => Err("Expected string".to_string()),
        },
    }
}

fn disk() -> BlockSchema {
    BlockSchema::new()
        .attribute(AttributeSchema::new("image_id", types::non_negative_int()).required())
        .attribute(
            AttributeSchema::new("size", types::non_negative_int())
                .computed()
                .optional()
                .zero_is_unset()
                .with_description("Size in MB; 0 keeps the image size"),
        )
        .attribute(
            AttributeSchema::new("target", AttributeType::String)
                .computed()
                .optional(),
        )
        .attribute(AttributeSchema::new("driver", AttributeType::String).write_only())
        .with_items(0, MAX_DISKS)
}

fn nic() -> BlockSchema {
    BlockSchema::new()
        .attribute(AttributeSchema::new("network_id", types::non_negative_int()).required())
        .attribute(
            AttributeSchema::new("ip", AttributeType::String)
                .computed()
                .optional(),
        )
        .attribute(AttributeSchema::new("mac", AttributeType::String).computed())
        .attribute(AttributeSchema::new("model", AttributeType::String))
        .attribute(AttributeSchema::new("network", AttributeType::String).computed())
        .attribute(AttributeSchema::new("physical_device", AttributeType::String))
        .attribute(
            AttributeSchema::new(
                "security_groups",
                AttributeType::List(Box::new(AttributeType::Int)),
            )
            .computed()
            .optional(),
        )
        .attribute(AttributeSchema::new("nic_id", AttributeType::Int).computed())
        .with_items(0, MAX_NICS)
}

fn graphics() -> BlockSchema {
    BlockSchema::new()
        .attribute(AttributeSchema::new("listen", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("port", AttributeType::String)
                .computed()
                .optional(),
        )
        .attribute(AttributeSchema::new("type", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("keymap", AttributeType::String)
                .with_default(Value::String(DEFAULT_KEYMAP.to_string())),
        )
        .with_items(0, 1)
}

fn os() -> BlockSchema {
    BlockSchema::new()
        .attribute(AttributeSchema::new("arch", AttributeType::String).required())
        .attribute(AttributeSchema::new("boot", AttributeType::String).required())
        .with_items(0, 1)
}

/// Returns the schema for `virtual_machine`
pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("An OpenNebula virtual machine")
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .computed()
                .optional()
                .with_description("VM name; defaults to the resource name"),
        )
        .attribute(AttributeSchema::new("instance", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("template_id", types::non_negative_int())
                .computed()
                .optional()
                .force_new()
                .with_description("Registered template to instantiate"),
        )
        .attribute(
            AttributeSchema::new("pending", AttributeType::Bool)
                .write_only()
                .with_default(Value::Bool(false))
                .with_description("Submit the VM on hold"),
        )
        .attribute(
            AttributeSchema::new("permissions", permission_mode())
                .computed()
                .optional(),
        )
        .attribute(AttributeSchema::new("uid", AttributeType::Int).computed())
        .attribute(
            AttributeSchema::new("gid", types::non_negative_int())
                .computed()
                .optional(),
        )
        .attribute(AttributeSchema::new("uname", AttributeType::String).computed())
        .attribute(AttributeSchema::new("gname", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("group", AttributeType::String)
                .computed()
                .optional()
                .conflicts_with("gid"),
        )
        .attribute(AttributeSchema::new("state", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("lcmstate", AttributeType::Int).computed())
        .attribute(
            AttributeSchema::new("cpu", types::positive_float())
                .computed()
                .optional()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("vcpu", types::positive_int())
                .computed()
                .optional()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("memory", types::positive_int())
                .computed()
                .optional()
                .force_new()
                .with_description("Memory in MB"),
        )
        .attribute(
            AttributeSchema::new("context", AttributeType::Map(Box::new(AttributeType::String)))
                .write_only()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("disk", AttributeType::Block(Box::new(disk())))
                .computed()
                .optional()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("nic", AttributeType::Block(Box::new(nic())))
                .computed()
                .optional()
                .force_new()
                .with_identity(nic_identity_of),
        )
        .attribute(
            AttributeSchema::new("graphics", AttributeType::Block(Box::new(graphics())))
                .computed()
                .optional()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("os", AttributeType::Block(Box::new(os())))
                .computed()
                .optional()
                .force_new(),
        )
        .attribute(AttributeSchema::new("ip", AttributeType::String).computed())
}
