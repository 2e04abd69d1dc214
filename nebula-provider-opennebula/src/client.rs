//! Remote management API consumed by the VM lifecycle

use async_trait::async_trait;

use crate::error::OneResult;
use crate::permissions::Permissions;
use crate::record::VmRecord;

/// Operations the provider needs from an OpenNebula controller.
///
/// Implemented over XML-RPC by [`crate::xmlrpc::OneClient`]; tests substitute
/// an in-memory controller.
#[async_trait]
pub trait OneApi: Send + Sync {
    /// Submit a template, returning the new VM id
    async fn vm_allocate(&self, template: &str, pending: bool) -> OneResult<i64>;

    /// Instantiate a registered template, returning the new VM id
    async fn template_instantiate(
        &self,
        template_id: i64,
        name: &str,
        pending: bool,
        extra_template: &str,
        persistent: bool,
    ) -> OneResult<i64>;

    async fn vm_info(&self, id: i64) -> OneResult<VmRecord>;

    /// Id of the single VM with exactly this name
    async fn vm_id_by_name(&self, name: &str) -> OneResult<i64>;

    async fn vm_rename(&self, id: i64, name: &str) -> OneResult<()>;

    async fn vm_chmod(&self, id: i64, permissions: &Permissions) -> OneResult<()>;

    /// Change owner and group; `-1` leaves either unchanged
    async fn vm_chown(&self, id: i64, uid: i64, gid: i64) -> OneResult<()>;

    async fn vm_terminate_hard(&self, id: i64) -> OneResult<()>;

    /// Id of the single group with exactly this name
    async fn group_id_by_name(&self, name: &str) -> OneResult<i64>;
}
