//! Remote VM record
//!
//! Deserialized from the `<VM>` document returned by `one.vm.info` and mirrored
//! back into the declarative attribute model.

use std::collections::HashMap;

use nebula_core::resource::Value;
use serde::Deserialize;

use crate::permissions::Permissions;

/// `PERMISSIONS` element, one 0/1 flag per child
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct PermissionFlags {
    pub owner_u: u8,
    pub owner_m: u8,
    pub owner_a: u8,
    pub group_u: u8,
    pub group_m: u8,
    pub group_a: u8,
    pub other_u: u8,
    pub other_m: u8,
    pub other_a: u8,
}

impl From<PermissionFlags> for Permissions {
    fn from(p: PermissionFlags) -> Self {
        Permissions {
            owner_use: p.owner_u == 1,
            owner_manage: p.owner_m == 1,
            owner_admin: p.owner_a == 1,
            group_use: p.group_u == 1,
            group_manage: p.group_m == 1,
            group_admin: p.group_a == 1,
            other_use: p.other_u == 1,
            other_manage: p.other_m == 1,
            other_admin: p.other_a == 1,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct DiskRecord {
    pub image_id: Option<i64>,
    pub size: Option<i64>,
    pub target: Option<String>,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct NicRecord {
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub model: Option<String>,
    pub network: Option<String>,
    pub network_id: Option<i64>,
    pub nic_id: Option<i64>,
    pub phydev: Option<String>,
    /// Comma-separated ids
    pub security_groups: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct OsRecord {
    pub arch: Option<String>,
    pub boot: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct GraphicsRecord {
    pub listen: Option<String>,
    pub port: Option<String>,
    #[serde(rename = "TYPE")]
    pub graphics_type: Option<String>,
    pub keymap: Option<String>,
}

/// The realized `TEMPLATE` of a VM
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct TemplateRecord {
    pub cpu: Option<f64>,
    pub vcpu: Option<i64>,
    pub memory: Option<i64>,
    pub template_id: Option<i64>,
    #[serde(rename = "DISK", default)]
    pub disks: Vec<DiskRecord>,
    #[serde(rename = "NIC", default)]
    pub nics: Vec<NicRecord>,
    pub os: Option<OsRecord>,
    pub graphics: Option<GraphicsRecord>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct UserTemplateRecord {
    /// Diagnostic left by the controller when a VM fails
    pub error: Option<String>,
}

/// A VM as reported by the controller
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct VmRecord {
    pub id: i64,
    pub name: String,
    pub uid: i64,
    pub gid: i64,
    pub uname: String,
    pub gname: String,
    pub state: i64,
    pub lcm_state: i64,
    pub permissions: PermissionFlags,
    #[serde(default)]
    pub template: TemplateRecord,
    #[serde(default)]
    pub user_template: UserTemplateRecord,
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn map(entries: Vec<(&str, Option<Value>)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect(),
    )
}

impl DiskRecord {
    fn to_value(&self) -> Value {
        map(vec![
            ("image_id", self.image_id.map(Value::Int)),
            ("size", self.size.map(Value::Int)),
            ("target", self.target.as_deref().map(string)),
            ("driver", self.driver.as_deref().map(string)),
        ])
    }
}

impl NicRecord {
    pub fn security_group_ids(&self) -> Vec<i64> {
        self.security_groups
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    }

    fn to_value(&self) -> Value {
        let security_groups = self.security_groups.as_ref().map(|_| {
            Value::List(
                self.security_group_ids()
                    .into_iter()
                    .map(Value::Int)
                    .collect(),
            )
        });

        map(vec![
            ("ip", self.ip.as_deref().map(string)),
            ("mac", self.mac.as_deref().map(string)),
            ("model", self.model.as_deref().map(string)),
            ("network", self.network.as_deref().map(string)),
            ("network_id", self.network_id.map(Value::Int)),
            ("nic_id", self.nic_id.map(Value::Int)),
            ("physical_device", self.phydev.as_deref().map(string)),
            ("security_groups", security_groups),
        ])
    }
}

impl VmRecord {
    pub fn permission_set(&self) -> Permissions {
        self.permissions.into()
    }

    /// Raw `(STATE, LCM_STATE)` pair
    pub fn states(&self) -> (i64, i64) {
        (self.state, self.lcm_state)
    }

    /// IP of the first NIC
    pub fn ip(&self) -> Option<&str> {
        self.template.nics.first().and_then(|nic| nic.ip.as_deref())
    }

    /// Mirror every observable field into the declarative model
    pub fn to_attributes(&self) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        attrs.insert("instance".to_string(), string(&self.name));
        attrs.insert("name".to_string(), string(&self.name));
        attrs.insert("uid".to_string(), Value::Int(self.uid));
        attrs.insert("gid".to_string(), Value::Int(self.gid));
        attrs.insert("uname".to_string(), string(&self.uname));
        attrs.insert("gname".to_string(), string(&self.gname));
        attrs.insert("group".to_string(), string(&self.gname));
        attrs.insert("state".to_string(), Value::Int(self.state));
        attrs.insert("lcmstate".to_string(), Value::Int(self.lcm_state));
        attrs.insert(
            "permissions".to_string(),
            Value::String(self.permission_set().format()),
        );

        let template = &self.template;
        if let Some(cpu) = template.cpu {
            attrs.insert("cpu".to_string(), Value::Float(cpu));
        }
        if let Some(vcpu) = template.vcpu {
            attrs.insert("vcpu".to_string(), Value::Int(vcpu));
        }
        if let Some(memory) = template.memory {
            attrs.insert("memory".to_string(), Value::Int(memory));
        }
        if let Some(template_id) = template.template_id {
            attrs.insert("template_id".to_string(), Value::Int(template_id));
        }
        if !template.nics.is_empty() {
            attrs.insert(
                "nic".to_string(),
                Value::List(template.nics.iter().map(NicRecord::to_value).collect()),
            );
        }
        if let Some(ip) = self.ip() {
            attrs.insert("ip".to_string(), string(ip));
        }
        if !template.disks.is_empty() {
            attrs.insert(
                "disk".to_string(),
                Value::List(template.disks.iter().map(DiskRecord::to_value).collect()),
            );
        }
        if let Some(os) = &template.os {
            attrs.insert(
                "os".to_string(),
                Value::List(vec![map(vec![
                    ("arch", os.arch.as_deref().map(string)),
                    ("boot", os.boot.as_deref().map(string)),
                ])]),
            );
        }
        if let Some(graphics) = &template.graphics {
            attrs.insert(
                "graphics".to_string(),
                Value::List(vec![map(vec![
                    ("listen", graphics.listen.as_deref().map(string)),
                    ("port", graphics.port.as_deref().map(string)),
                    ("type", graphics.graphics_type.as_deref().map(string)),
                    ("keymap", graphics.keymap.as_deref().map(string)),
                ])]),
            );
        }

        attrs
    }
}
