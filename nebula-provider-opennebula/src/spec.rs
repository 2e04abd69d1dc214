//! Strongly-typed virtual machine specification
//!
//! Configuration reaches the provider as an untyped attribute map. It is
//! decoded once, here, into a [`VmSpec`]; the template compiler and the
//! lifecycle code only ever see the typed form.

use std::collections::{BTreeMap, HashMap};

use nebula_core::resource::Value;

use crate::error::{OneError, OneResult};
use crate::permissions::Permissions;
use crate::template::is_bare_token;

pub const MAX_DISKS: usize = 8;
pub const MAX_NICS: usize = 8;
pub const DEFAULT_KEYMAP: &str = "en-us";

/// Group ownership requested for a VM
#[derive(Debug, Clone, PartialEq)]
pub enum GroupRef {
    Id(i64),
    /// Resolved to an id through a name lookup
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub image_id: i64,
    /// `None` when unset or configured as 0
    pub size: Option<i64>,
    pub target: Option<String>,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nic {
    pub network_id: i64,
    pub ip: Option<String>,
    pub model: Option<String>,
    pub physical_device: Option<String>,
    pub security_groups: Vec<i64>,
}

impl Nic {
    pub fn identity(&self) -> String {
        nic_identity(self.model.as_deref(), self.network_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graphics {
    pub listen: String,
    pub graphics_type: String,
    pub port: Option<String>,
    pub keymap: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Os {
    pub arch: String,
    pub boot: String,
}

/// Desired configuration of one virtual machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmSpec {
    pub name: Option<String>,
    pub template_id: Option<i64>,
    pub pending: bool,
    pub permissions: Option<Permissions>,
    pub group: Option<GroupRef>,
    pub cpu: Option<f64>,
    pub vcpu: Option<i64>,
    pub memory: Option<i64>,
    /// Sorted by key so compiled templates are stable
    pub context: BTreeMap<String, String>,
    pub disks: Vec<Disk>,
    pub nics: Vec<Nic>,
    pub graphics: Option<Graphics>,
    pub os: Option<Os>,
}

/// Set key of a NIC: model and network, never the remote-assigned MAC or IP
pub fn nic_identity(model: Option<&str>, network_id: i64) -> String {
    format!("{}-{}-", model.unwrap_or_default(), network_id)
}

/// [`nic_identity`] of a NIC block in attribute form
pub fn nic_identity_of(value: &Value) -> String {
    let map = value.as_map();
    let model = map.and_then(|m| m.get("model")).and_then(Value::as_str);
    let network_id = map
        .and_then(|m| m.get("network_id"))
        .and_then(Value::as_int)
        .unwrap_or_default();
    nic_identity(model, network_id)
}

type Attributes = HashMap<String, Value>;

fn type_error(key: &str, expected: &str, got: &Value) -> OneError {
    OneError::validation(format!("'{}' must be {}, got {}", key, expected, got))
}

fn get_str(attrs: &Attributes, key: &str) -> OneResult<Option<String>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(type_error(key, "a string", other)),
    }
}

/// Optional string where an empty value means unset
fn get_opt_str(attrs: &Attributes, key: &str) -> OneResult<Option<String>> {
    Ok(get_str(attrs, key)?.filter(|s| !s.is_empty()))
}

fn require_str(attrs: &Attributes, block: &str, key: &str) -> OneResult<String> {
    get_str(attrs, key)?
        .ok_or_else(|| OneError::validation(format!("{}.{} is required", block, key)))
}

fn get_int(attrs: &Attributes, key: &str) -> OneResult<Option<i64>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(Value::Int(n)) => Ok(Some(*n)),
        // Ids sometimes arrive as strings from hand-written files
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| OneError::validation(format!("'{}' is not a valid integer: '{}'", key, s))),
        Some(other) => Err(type_error(key, "an integer", other)),
    }
}

fn require_int(attrs: &Attributes, block: &str, key: &str) -> OneResult<i64> {
    get_int(attrs, key)?
        .ok_or_else(|| OneError::validation(format!("{}.{} is required", block, key)))
}

fn get_float(attrs: &Attributes, key: &str) -> OneResult<Option<f64>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .map(Some)
            .ok_or_else(|| type_error(key, "a number", value)),
    }
}

fn get_bool(attrs: &Attributes, key: &str) -> OneResult<Option<bool>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(type_error(key, "a boolean", other)),
    }
}

fn get_blocks<'a>(attrs: &'a Attributes, key: &str, max: usize) -> OneResult<Vec<&'a Attributes>> {
    let items = match attrs.get(key) {
        None => return Ok(Vec::new()),
        Some(Value::List(items)) => items,
        Some(Value::Map(map)) => return Ok(vec![map]),
        Some(other) => return Err(type_error(key, "a list of blocks", other)),
    };

    if items.len() > max {
        return Err(OneError::validation(format!(
            "at most {} '{}' blocks are allowed, got {}",
            max,
            key,
            items.len()
        )));
    }

    items
        .iter()
        .map(|item| item.as_map().ok_or_else(|| type_error(key, "a block", item)))
        .collect()
}

impl Disk {
    fn decode(attrs: &Attributes) -> OneResult<Self> {
        Ok(Self {
            image_id: require_int(attrs, "disk", "image_id")?,
            size: get_int(attrs, "size")?.filter(|size| *size > 0),
            target: get_opt_str(attrs, "target")?,
            driver: get_opt_str(attrs, "driver")?,
        })
    }
}

impl Nic {
    fn decode(attrs: &Attributes) -> OneResult<Self> {
        let security_groups = match attrs.get("security_groups") {
            None => Vec::new(),
            Some(Value::List(ids)) => ids
                .iter()
                .map(|id| {
                    id.as_int()
                        .ok_or_else(|| type_error("security_groups", "a list of integers", id))
                })
                .collect::<OneResult<_>>()?,
            Some(other) => return Err(type_error("security_groups", "a list of integers", other)),
        };

        Ok(Self {
            network_id: require_int(attrs, "nic", "network_id")?,
            ip: get_opt_str(attrs, "ip")?,
            model: get_opt_str(attrs, "model")?,
            physical_device: get_opt_str(attrs, "physical_device")?,
            security_groups,
        })
    }
}

impl Graphics {
    fn decode(attrs: &Attributes) -> OneResult<Self> {
        Ok(Self {
            listen: require_str(attrs, "graphics", "listen")?,
            graphics_type: require_str(attrs, "graphics", "type")?,
            port: get_str(attrs, "port")?,
            keymap: get_str(attrs, "keymap")?.unwrap_or_else(|| DEFAULT_KEYMAP.to_string()),
        })
    }
}

impl Os {
    fn decode(attrs: &Attributes) -> OneResult<Self> {
        Ok(Self {
            arch: require_str(attrs, "os", "arch")?,
            boot: require_str(attrs, "os", "boot")?,
        })
    }
}

impl VmSpec {
    /// Decode and validate a `virtual_machine` attribute map
    pub fn from_attributes(attrs: &Attributes) -> OneResult<Self> {
        let permissions = get_str(attrs, "permissions")?
            .map(|mode| Permissions::parse(&mode))
            .transpose()?;

        let group = match (get_int(attrs, "gid")?, get_str(attrs, "group")?) {
            (Some(_), Some(_)) => {
                return Err(OneError::validation("'group' conflicts with 'gid'"));
            }
            (Some(gid), None) => Some(GroupRef::Id(gid)),
            (None, Some(name)) => Some(GroupRef::Name(name)),
            (None, None) => None,
        };

        let context = match attrs.get("context") {
            None => BTreeMap::new(),
            Some(Value::Map(map)) => map
                .iter()
                .map(|(key, value)| {
                    if !is_bare_token(key) {
                        return Err(OneError::validation(format!(
                            "context key '{}' may only contain letters, digits and _ . : / -",
                            key
                        )));
                    }
                    match value {
                        Value::String(s) => Ok((key.clone(), s.clone())),
                        Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
                            Ok((key.clone(), value.to_string()))
                        }
                        other => Err(type_error(&format!("context.{}", key), "a scalar", other)),
                    }
                })
                .collect::<OneResult<_>>()?,
            Some(other) => return Err(type_error("context", "a map", other)),
        };

        let disks = get_blocks(attrs, "disk", MAX_DISKS)?
            .into_iter()
            .map(Disk::decode)
            .collect::<OneResult<_>>()?;
        let nics = get_blocks(attrs, "nic", MAX_NICS)?
            .into_iter()
            .map(Nic::decode)
            .collect::<OneResult<_>>()?;
        let graphics = match get_blocks(attrs, "graphics", 1)?.first() {
            Some(block) => Some(Graphics::decode(block)?),
            None => None,
        };
        let os = match get_blocks(attrs, "os", 1)?.first() {
            Some(block) => Some(Os::decode(block)?),
            None => None,
        };

        Ok(Self {
            name: get_str(attrs, "name")?,
            template_id: get_int(attrs, "template_id")?,
            pending: get_bool(attrs, "pending")?.unwrap_or(false),
            permissions,
            group,
            cpu: get_float(attrs, "cpu")?,
            vcpu: get_int(attrs, "vcpu")?,
            memory: get_int(attrs, "memory")?,
            context,
            disks,
            nics,
            graphics,
            os,
        })
    }
}
