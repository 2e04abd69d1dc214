//! OpenNebula Provider implementation
//!
//! Sequences the virtual machine lifecycle: compile a template, submit it,
//! wait for the VM to run, then apply rename / chmod / chown. Side effects run
//! in order and the first failure aborts the operation, leaving whatever was
//! already applied in place.

use crate::client::OneApi;
use crate::config::Timeouts;
use crate::error::{OneError, OneResult};
use crate::poller::{PollSettings, STATE_DONE, VmState, wait_for};
use crate::record::VmRecord;
use crate::spec::{GroupRef, VmSpec};
use crate::template::compile;

/// Attributes that can change without recreating the VM
pub const IN_PLACE_ATTRIBUTES: &[&str] = &["name", "permissions", "group", "gid"];

/// Parse a remote VM id
pub fn parse_identifier(identifier: &str) -> OneResult<i64> {
    identifier
        .parse()
        .map_err(|_| OneError::validation(format!("'{}' is not a valid VM id", identifier)))
}

/// OpenNebula Provider
pub struct OpenNebulaProvider<C: OneApi> {
    client: C,
    timeouts: Timeouts,
}

impl<C: OneApi> OpenNebulaProvider<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a VM and wait for it to run
    pub async fn create_vm(&self, spec: &VmSpec) -> OneResult<VmRecord> {
        let template = compile(spec)?;

        let id = match spec.template_id {
            Some(template_id) => {
                let name = spec.name.as_deref().unwrap_or_default();
                self.client
                    .template_instantiate(template_id, name, spec.pending, &template, false)
                    .await?
            }
            None => self.client.vm_allocate(&template, spec.pending).await?,
        };
        log::info!("Submitted VM {}, waiting for it to run", id);

        self.wait_for_state(id, VmState::Running).await?;

        if let Err(e) = self.configure(id, spec).await {
            log::error!("VM {} was created but could not be configured: {}", id, e);
            return Err(e);
        }

        let vm = self.client.vm_info(id).await?;
        log::info!("VM {} ({}) is running", vm.id, vm.name);
        Ok(vm)
    }

    /// Apply name, permissions and group of a freshly created VM
    async fn configure(&self, id: i64, spec: &VmSpec) -> OneResult<()> {
        if let Some(name) = &spec.name {
            self.client.vm_rename(id, name).await?;
        }
        if let Some(permissions) = &spec.permissions {
            self.client.vm_chmod(id, permissions).await?;
        }
        if let Some(group) = &spec.group {
            self.change_group(id, group).await?;
        }
        Ok(())
    }

    async fn change_group(&self, id: i64, group: &GroupRef) -> OneResult<()> {
        let gid = match group {
            GroupRef::Id(gid) => *gid,
            GroupRef::Name(name) => self.client.group_id_by_name(name).await?,
        };
        self.client.vm_chown(id, -1, gid).await?;
        log::info!("VM {} moved to group {}", id, gid);
        Ok(())
    }

    /// Fetch a VM by id, or by name when no id is known.
    ///
    /// Returns `None` for missing VMs and for VMs in the DONE state.
    pub async fn read_vm(
        &self,
        identifier: Option<&str>,
        name: Option<&str>,
    ) -> OneResult<Option<VmRecord>> {
        let lookup = match (identifier, name) {
            (Some(identifier), _) => Ok(parse_identifier(identifier)?),
            (None, Some(name)) => self.client.vm_id_by_name(name).await,
            (None, None) => return Ok(None),
        };

        match lookup {
            Ok(id) => self.read_vm_by_id(id).await,
            Err(OneError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read_vm_by_id(&self, id: i64) -> OneResult<Option<VmRecord>> {
        match self.client.vm_info(id).await {
            Ok(vm) if vm.state == STATE_DONE => Ok(None),
            Ok(vm) => Ok(Some(vm)),
            Err(OneError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn vm_exists(&self, id: i64) -> OneResult<bool> {
        Ok(self.read_vm_by_id(id).await?.is_some())
    }

    /// Apply the changed attributes that can be changed in place.
    ///
    /// Fails with [`OneError::RequiresReplacement`] when anything else changed.
    pub async fn update_vm(&self, id: i64, changed: &[String], spec: &VmSpec) -> OneResult<VmRecord> {
        let fixed: Vec<String> = changed
            .iter()
            .filter(|key| !IN_PLACE_ATTRIBUTES.contains(&key.as_str()))
            .cloned()
            .collect();
        if !fixed.is_empty() {
            return Err(OneError::RequiresReplacement(fixed));
        }

        let has = |key: &str| changed.iter().any(|c| c == key);

        if has("name")
            && let Some(name) = &spec.name
        {
            self.client.vm_rename(id, name).await?;
            log::info!("VM {} renamed to {}", id, name);
        }
        if has("permissions")
            && let Some(permissions) = &spec.permissions
        {
            self.client.vm_chmod(id, permissions).await?;
            log::info!("VM {} permissions set to {}", id, permissions);
        }
        if (has("group") || has("gid"))
            && let Some(group) = &spec.group
        {
            self.change_group(id, group).await?;
        }

        self.client.vm_info(id).await
    }

    /// Terminate a VM and wait until it is DONE. Already-gone VMs succeed.
    pub async fn delete_vm(&self, id: i64) -> OneResult<()> {
        if !self.vm_exists(id).await? {
            log::info!("VM {} is already gone", id);
            return Ok(());
        }

        self.client.vm_terminate_hard(id).await?;
        self.wait_for_state(id, VmState::Done).await?;
        log::info!("VM {} terminated", id);
        Ok(())
    }

    async fn wait_for_state(&self, id: i64, target: VmState) -> OneResult<VmRecord> {
        let timeout = match target {
            VmState::Done => self.timeouts.delete,
            _ => self.timeouts.create,
        };
        let settings = PollSettings::new(timeout, &self.timeouts);
        wait_for(id, target, &settings, || self.client.vm_info(id)).await
    }
}
