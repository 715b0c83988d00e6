//! Network reachability checks.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::cache::Connectivity;

/// Considers the network up when a TCP connection to `address` succeeds
/// within `timeout`.
#[derive(Debug, Clone)]
pub struct ProbeConnectivity {
  address: String,
  timeout: Duration,
}

impl ProbeConnectivity {
  pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
    Self {
      address: address.into(),
      timeout,
    }
  }
}

#[async_trait]
impl Connectivity for ProbeConnectivity {
  async fn is_connected(&self) -> bool {
    let connected = matches!(
      tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await,
      Ok(Ok(_))
    );
    debug!(probe = %self.address, connected, "connectivity check");
    connected
  }
}

/// Fixed answer, for `--offline`.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl Connectivity for StaticConnectivity {
  async fn is_connected(&self) -> bool {
    self.0
  }
}
