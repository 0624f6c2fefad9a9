use async_trait::async_trait;

use crate::error::SystemError;

pub mod config;
pub mod process;
pub use config::ConfigWriter;
pub use process::Dnsmasq;

/// The resolver daemon reading the generated document.
#[async_trait]
pub trait ResolverProcess: Send + Sync {
    async fn start(&self) -> Result<(), SystemError>;

    /// Makes a running resolver pick up the current document.  Does
    /// nothing if it was never started or has been stopped.
    async fn reload(&self) -> Result<(), SystemError>;

    /// Stops the resolver for good.
    async fn stop(&self) -> Result<(), SystemError>;
}
