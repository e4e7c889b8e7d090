//! Extension-facing traits

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{CandidatePort, ProvidedPortAttributes};

/// Runtime source of port attributes, typically registered by an extension
#[async_trait]
pub trait PortAttributesProvider: Send + Sync {
    /// Provide attributes for `ports`, all owned by the same process
    ///
    /// Implementations should stop early once `cancel` fires.
    async fn provide_port_attributes(
        &self,
        ports: &[u16],
        pid: Option<u32>,
        command_line: Option<&str>,
        cancel: CancellationToken,
    ) -> Vec<ProvidedPortAttributes>;
}

/// Filter applied to every candidate snapshot before it is reconciled
#[async_trait]
pub trait CandidateFilter: Send + Sync {
    /// Return the candidates worth tracking
    async fn filter(&self, candidates: Vec<CandidatePort>) -> Vec<CandidatePort>;
}

/// User-facing notification surface
pub trait Notifier: Send + Sync {
    /// Show an informational message
    fn info(&self, message: &str);
}
