//! Transport channels: how one envelope reaches one worker.
//!
//! Two structurally different mechanisms hide behind the same
//! [`Channel`] contract, selected by configuration rather than by type
//! hierarchy:
//!
//! - [`tunnel::TunnelChannel`] holds a direct socket session per
//!   delivery, which is the fast path.
//! - [`script::ScriptChannel`] round-trips the request as a file via
//!   the provider's upload/exec/download surface. Slower, but it needs
//!   no network path to the worker.
//!
//! The worker supervisor only ever calls `deliver`, so the variants are
//! substitutable without touching supervision logic.

pub mod script;
pub mod tunnel;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{Request, Response};
use crate::error::ChannelError;
use crate::provider::{Provider, WorkerHandle};

pub use script::{ScriptChannel, ScriptChannelConfig};
pub use tunnel::TunnelChannel;

/// Delivers one request envelope to one live worker and returns its
/// response envelope.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn deliver(
        &self,
        request: &Request,
        worker: &WorkerHandle,
    ) -> Result<Response, ChannelError>;
}

/// Which transport mechanism a pool uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Persistent socket session per delivery.
    Tunnel,
    /// One-shot file exchange through the provider.
    Script,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Tunnel => write!(f, "tunnel"),
            ChannelKind::Script => write!(f, "script"),
        }
    }
}

/// Builds the channel implementation for the configured kind.
pub fn build_channel(
    kind: ChannelKind,
    provider: &Arc<dyn Provider>,
    script: ScriptChannelConfig,
) -> Arc<dyn Channel> {
    match kind {
        ChannelKind::Tunnel => Arc::new(TunnelChannel::new()),
        ChannelKind::Script => Arc::new(ScriptChannel::new(Arc::clone(provider), script)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_serde() {
        let kind: ChannelKind = serde_yaml::from_str("tunnel").expect("should parse");
        assert_eq!(kind, ChannelKind::Tunnel);
        let kind: ChannelKind = serde_yaml::from_str("script").expect("should parse");
        assert_eq!(kind, ChannelKind::Script);
    }

    #[test]
    fn test_channel_kind_display() {
        assert_eq!(ChannelKind::Tunnel.to_string(), "tunnel");
        assert_eq!(ChannelKind::Script.to_string(), "script");
    }
}
