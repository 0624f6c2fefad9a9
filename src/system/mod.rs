use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SystemError;

pub mod resolved;
pub use resolved::SystemdResolved;

/// Host level name resolution plumbing.
///
/// Only [`configure`](Self::configure) can fail: without the override
/// nothing on the host would query our resolver.  Everything else is
/// best-effort and logs its own failures.
#[async_trait]
pub trait SystemResolution: Send + Sync {
    /// Points host resolution at `listen_address`.
    async fn configure(&self, listen_address: IpAddr) -> Result<(), SystemError>;

    /// Removes the override written by [`configure`](Self::configure).
    async fn unconfigure(&self);

    /// Applies the current override.
    async fn reload(&self);

    /// Drops cached answers so new records are visible immediately.
    async fn flush_cache(&self);

    /// Relabels freshly written files on SELinux hosts.
    async fn restore_security_context(&self, paths: &[PathBuf]);
}
