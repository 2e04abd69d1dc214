//! Template compiler
//!
//! Serializes a [`VmSpec`] into OpenNebula's attribute-list template language:
//!
//! ```text
//! CPU = 0.500000
//! MEMORY = 1024
//! DISK = [
//!   IMAGE_ID = 5
//! ]
//! ```
//!
//! Scalars come first, then the `CONTEXT`, `OS`, `GRAPHICS`, `NIC` and `DISK`
//! blocks. Optional fields are only emitted when set. Separators are written
//! by the serializer in [`fmt::Display`] for [`Template`], never by callers.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{OneError, OneResult};
use crate::spec::{Disk, Graphics, Nic, Os, VmSpec};

static BARE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:/\-]+$").expect("valid regex"));

/// Whether `token` can appear in a template without quoting
pub fn is_bare_token(token: &str) -> bool {
    BARE_VALUE.is_match(token)
}

/// Render a value, quoting it unless it is a plain token
fn render_value(value: &str) -> String {
    if is_bare_token(value) {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Ordered `KEY = value` pairs of a bracketed block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pairs: Vec<(String, String)>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.pairs.push((key.into(), render_value(&value.to_string())));
        self
    }

    pub fn set_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Scalar(String, String),
    Block(String, Block),
}

/// An ordered template document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    entries: Vec<Entry>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries
            .push(Entry::Scalar(key.into(), render_value(&value.to_string())));
    }

    /// Append a block; empty blocks are dropped
    pub fn block(&mut self, name: impl Into<String>, block: Block) {
        if !block.is_empty() {
            self.entries.push(Entry::Block(name.into(), block));
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match entry {
                Entry::Scalar(key, value) => writeln!(f, "{} = {}", key, value)?,
                Entry::Block(name, block) => {
                    let body = block
                        .pairs
                        .iter()
                        .map(|(key, value)| format!("  {} = {}", key, value))
                        .collect::<Vec<_>>()
                        .join(",\n");
                    writeln!(f, "{} = [\n{}\n]", name, body)?;
                }
            }
        }
        Ok(())
    }
}

fn os_block(os: &Os) -> Block {
    Block::new().set("ARCH", &os.arch).set("BOOT", &os.boot)
}

fn graphics_block(graphics: &Graphics) -> Block {
    Block::new()
        .set("LISTEN", &graphics.listen)
        .set("TYPE", &graphics.graphics_type)
        .set_opt("PORT", graphics.port.as_ref())
        .set("KEYMAP", &graphics.keymap)
}

fn nic_block(nic: &Nic) -> Block {
    let security_groups = (!nic.security_groups.is_empty()).then(|| {
        nic.security_groups
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    });

    Block::new()
        .set("NETWORK_ID", nic.network_id)
        .set_opt("PHYDEV", nic.physical_device.as_ref())
        .set_opt("IP", nic.ip.as_ref())
        .set_opt("MODEL", nic.model.as_ref())
        .set_opt("SECURITY_GROUPS", security_groups)
}

fn disk_block(disk: &Disk) -> Block {
    Block::new()
        .set("IMAGE_ID", disk.image_id)
        .set_opt("SIZE", disk.size.filter(|size| *size > 0))
        .set_opt("TARGET", disk.target.as_ref())
        .set_opt("DRIVER", disk.driver.as_ref())
}

/// Build the template document for a specification
pub fn build(spec: &VmSpec) -> OneResult<Template> {
    let mut template = Template::new();

    // Instantiation takes CPU and memory from the registered template
    if spec.template_id.is_none() {
        let (Some(cpu), Some(memory)) = (spec.cpu, spec.memory) else {
            return Err(OneError::validation(
                "cpu and memory are required when template_id is not set",
            ));
        };
        template.scalar("CPU", format!("{:.6}", cpu));
        template.scalar("MEMORY", memory);
        if let Some(vcpu) = spec.vcpu {
            template.scalar("VCPU", vcpu);
        }
    }

    let context = spec
        .context
        .iter()
        .fold(Block::new(), |block, (key, value)| block.set(key, value));
    template.block("CONTEXT", context);

    if let Some(os) = &spec.os {
        template.block("OS", os_block(os));
    }
    if let Some(graphics) = &spec.graphics {
        template.block("GRAPHICS", graphics_block(graphics));
    }
    for nic in &spec.nics {
        template.block("NIC", nic_block(nic));
    }
    for disk in &spec.disks {
        template.block("DISK", disk_block(disk));
    }

    Ok(template)
}

/// Compile a specification to template text
pub fn compile(spec: &VmSpec) -> OneResult<String> {
    let text = build(spec)?.to_string();
    log::debug!("Compiled VM template:\n{}", text);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::GroupRef;

    fn sized(cpu: f64, memory: i64) -> VmSpec {
        VmSpec {
            cpu: Some(cpu),
            memory: Some(memory),
            ..Default::default()
        }
    }

    fn disk(image_id: i64) -> Disk {
        Disk {
            image_id,
            size: None,
            target: None,
            driver: None,
        }
    }

    fn nic(network_id: i64) -> Nic {
        Nic {
            network_id,
            ip: None,
            model: None,
            physical_device: None,
            security_groups: vec![],
        }
    }

    #[test]
    fn compile_small_vm() {
        let mut spec = sized(0.5, 1024);
        spec.disks.push(disk(5));
        spec.nics.push(Nic {
            ip: Some("10.0.0.5".to_string()),
            ..nic(7)
        });

        let text = compile(&spec).unwrap();
        assert_eq!(
            text,
            "CPU = 0.500000\n\
             MEMORY = 1024\n\
             NIC = [\n  NETWORK_ID = 7,\n  IP = 10.0.0.5\n]\n\
             DISK = [\n  IMAGE_ID = 5\n]\n"
        );
    }

    #[test]
    fn compile_is_deterministic() {
        let mut spec = sized(2.0, 2048);
        spec.vcpu = Some(2);
        for key in ["SSH_PUBLIC_KEY", "HOSTNAME", "NETWORK", "A"] {
            spec.context.insert(key.to_string(), format!("${}", key));
        }
        spec.group = Some(GroupRef::Id(1));

        let first = compile(&spec).unwrap();
        assert_eq!(first, compile(&spec).unwrap());
        assert!(first.starts_with("CPU = 2.000000\nMEMORY = 2048\nVCPU = 2\nCONTEXT = [\n  A = \"$A\",\n  HOSTNAME = \"$HOSTNAME\","));
        assert!(first.contains("  SSH_PUBLIC_KEY = \"$SSH_PUBLIC_KEY\"\n]\n"));
    }

    #[test]
    fn no_blocks_without_disks_or_nics() {
        let text = compile(&sized(1.0, 512)).unwrap();
        assert_eq!(text, "CPU = 1.000000\nMEMORY = 512\n");
        assert!(!text.contains("DISK"));
        assert!(!text.contains("NIC"));
        assert!(!text.contains("CONTEXT"));
    }

    #[test]
    fn disks_keep_declaration_order() {
        let mut spec = sized(1.0, 512);
        spec.disks = vec![disk(3), disk(1), disk(2)];

        let text = compile(&spec).unwrap();
        assert_eq!(text.matches("DISK = [").count(), 3);
        let positions: Vec<usize> = ["IMAGE_ID = 3", "IMAGE_ID = 1", "IMAGE_ID = 2"]
            .iter()
            .map(|needle| text.find(needle).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let mut spec = sized(1.0, 512);
        spec.disks.push(Disk {
            size: Some(0),
            target: Some("vda".to_string()),
            ..disk(9)
        });
        spec.graphics = Some(Graphics {
            listen: "0.0.0.0".to_string(),
            graphics_type: "VNC".to_string(),
            port: None,
            keymap: "en-us".to_string(),
        });

        let text = compile(&spec).unwrap();
        assert!(!text.contains("SIZE"));
        assert!(!text.contains("DRIVER"));
        assert!(!text.contains("PORT"));
        assert!(!text.contains("VCPU"));
        assert!(!text.contains("= \n"));
        assert!(text.contains("DISK = [\n  IMAGE_ID = 9,\n  TARGET = vda\n]"));
        assert!(text.contains(
            "GRAPHICS = [\n  LISTEN = 0.0.0.0,\n  TYPE = VNC,\n  KEYMAP = en-us\n]"
        ));
    }

    #[test]
    fn nic_details_and_security_groups() {
        let mut spec = sized(1.0, 512);
        spec.nics.push(Nic {
            model: Some("virtio".to_string()),
            physical_device: Some("eth1".to_string()),
            security_groups: vec![0, 100],
            ..nic(2)
        });
        spec.os = Some(Os {
            arch: "x86_64".to_string(),
            boot: "disk0,nic0".to_string(),
        });

        let text = compile(&spec).unwrap();
        assert!(text.contains("OS = [\n  ARCH = x86_64,\n  BOOT = \"disk0,nic0\"\n]"));
        assert!(text.contains(
            "NIC = [\n  NETWORK_ID = 2,\n  PHYDEV = eth1,\n  MODEL = virtio,\n  SECURITY_GROUPS = \"0,100\"\n]"
        ));
    }

    #[test]
    fn template_id_mode_skips_sizing() {
        let spec = VmSpec {
            template_id: Some(12),
            cpu: Some(4.0),
            memory: Some(4096),
            disks: vec![disk(5)],
            ..Default::default()
        };

        assert_eq!(compile(&spec).unwrap(), "DISK = [\n  IMAGE_ID = 5\n]\n");
        assert_eq!(
            compile(&VmSpec {
                template_id: Some(12),
                ..Default::default()
            })
            .unwrap(),
            ""
        );
    }

    #[test]
    fn cpu_and_memory_required_without_template() {
        let no_memory = VmSpec {
            cpu: Some(1.0),
            ..Default::default()
        };
        let no_cpu = VmSpec {
            memory: Some(512),
            ..Default::default()
        };
        assert!(matches!(compile(&no_memory), Err(OneError::Validation(_))));
        assert!(matches!(compile(&no_cpu), Err(OneError::Validation(_))));
    }

    #[test]
    fn quotes_values_outside_plain_tokens() {
        assert_eq!(render_value("10.0.0.5"), "10.0.0.5");
        assert_eq!(render_value(""), "\"\"");
        assert_eq!(render_value("a b"), "\"a b\"");
        assert_eq!(render_value("say \"hi\""), "\"say \\\"hi\\\"\"");
    }
}
