use async_trait::async_trait;
use futures::future::BoxFuture;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::management::error::SupervisorError;
use crate::utils::strip_color;

/// Black-box request/response client over the authenticated admin
/// session. The session layer never looks inside the wire format.
#[async_trait]
pub trait ControlChannel: Send {
    async fn request(&mut self, command: &str) -> anyhow::Result<String>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

pub type BoxedChannel = Box<dyn ControlChannel>;

#[derive(Debug, Clone)]
pub struct ControlEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Factory invoked per connect attempt; injected so the session logic
/// stays transport-agnostic (and testable with a scripted channel).
pub type Connector =
    Arc<dyn Fn(ControlEndpoint) -> BoxFuture<'static, anyhow::Result<BoxedChannel>> + Send + Sync>;

/// The one live admin session. All requests serialize through the inner
/// mutex — no concurrent in-flight commands. A failed request drops the
/// channel so the caller degrades to the fallback path until the next
/// ONLINE transition reconnects.
pub struct Session {
    chan: Mutex<Option<BoxedChannel>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            chan: Mutex::new(None),
        }
    }

    pub async fn install(&self, channel: BoxedChannel) {
        *self.chan.lock().await = Some(channel);
    }

    pub async fn is_connected(&self) -> bool {
        self.chan.lock().await.is_some()
    }

    /// Executes one command, returning the response with presentation
    /// color codes stripped.
    pub async fn execute(&self, command: &str) -> Result<String, SupervisorError> {
        let mut guard = self.chan.lock().await;
        let channel = guard
            .as_mut()
            .ok_or(SupervisorError::ControlChannelUnavailable)?;
        match channel.request(command).await {
            Ok(response) => Ok(strip_color(&response)),
            Err(e) => {
                debug!("control channel request failed: {}", e);
                *guard = None;
                Err(SupervisorError::ControlChannelUnavailable)
            }
        }
    }

    /// Unconditional teardown; close errors are swallowed so stop and
    /// crash paths never fail on a dead session.
    pub async fn teardown(&self) {
        if let Some(mut channel) = self.chan.lock().await.take() {
            if let Err(e) = channel.close().await {
                debug!("control channel close failed: {}", e);
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
