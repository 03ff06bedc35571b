use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use super::{DependencyCheck, ProbeResults};
use crate::registry::ConnectionRegistry;

/// Workflow engine probe. The endpoint is dialed once by the registry; the
/// probe reports whether that handshake succeeded.
pub struct TemporalCheck {
    registry: Arc<ConnectionRegistry>,
}

impl TemporalCheck {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DependencyCheck for TemporalCheck {
    fn name(&self) -> &'static str {
        "temporal"
    }

    async fn check(&self) -> ProbeResults {
        let connected = match self.registry.workflow().await {
            Ok(handle) => {
                debug!("Temporal endpoint {} is registered.", handle.endpoint);
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        };
        ProbeResults::from([("connection", connected)])
    }
}
