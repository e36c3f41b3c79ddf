//! Shared SSH port-forwards to backends whose API only listens on the remote host.
//!
//! One tunnel per [`TunnelKey`]. Callers racing on the same key queue on that key's
//! slot, so the loser finds the winner's tunnel and reuses it.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to start ssh for {key}: {source}")]
    Spawn {
        key: TunnelKey,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh for {key} exited early ({status})")]
    Exited { key: TunnelKey, status: String },
    #[error("tunnel for {key} not ready after {waited:?}")]
    NotReady { key: TunnelKey, waited: Duration },
    #[error("no free local port: {0}")]
    NoLocalPort(std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub host: String,
    pub user: Option<String>,
    pub ssh_port: Option<u16>,
    pub remote_port: u16,
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.ssh_port {
            write!(f, ":{port}")?;
        }
        write!(f, " -> {}", self.remote_port)
    }
}

/// A running forward. `process` is `None` for forwards not owned by this process.
pub struct Tunnel {
    pub local_port: u16,
    pub process: Option<Child>,
}

impl Tunnel {
    async fn is_healthy(&mut self) -> bool {
        if let Some(child) = self.process.as_mut() {
            match child.try_wait() {
                Ok(None) => {}
                _ => return false,
            }
        }
        port_accepts(self.local_port).await
    }
}

#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    async fn launch(&self, key: &TunnelKey) -> Result<Tunnel, TunnelError>;
}

/// Launches `ssh -N -L <local>:127.0.0.1:<remote>` and waits until the local end accepts.
pub struct SshLauncher {
    pub ssh_binary: String,
    pub ready_timeout: Duration,
}

impl SshLauncher {
    pub fn new(ssh_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl TunnelLauncher for SshLauncher {
    async fn launch(&self, key: &TunnelKey) -> Result<Tunnel, TunnelError> {
        let local_port = free_local_port().await?;

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-N")
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "ServerAliveInterval=30"])
            .arg("-L")
            .arg(format!("{local_port}:127.0.0.1:{}", key.remote_port));
        if let Some(port) = key.ssh_port {
            cmd.arg("-p").arg(port.to_string());
        }
        let target = match &key.user {
            Some(user) => format!("{user}@{}", key.host),
            None => key.host.clone(),
        };
        cmd.arg(target).kill_on_drop(true);

        debug!(%key, local_port, "spawning ssh tunnel");
        let mut child = cmd.spawn().map_err(|source| TunnelError::Spawn {
            key: key.clone(),
            source,
        })?;

        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < self.ready_timeout {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(TunnelError::Exited {
                    key: key.clone(),
                    status: status.to_string(),
                });
            }
            if port_accepts(local_port).await {
                return Ok(Tunnel {
                    local_port,
                    process: Some(child),
                });
            }
            tokio::time::sleep(step).await;
            waited += step;
        }

        let _ = child.start_kill();
        Err(TunnelError::NotReady {
            key: key.clone(),
            waited,
        })
    }
}

type Slot = Arc<AsyncMutex<Option<Tunnel>>>;

pub struct TunnelManager {
    launcher: Arc<dyn TunnelLauncher>,
    slots: Mutex<HashMap<TunnelKey, Slot>>,
}

impl TunnelManager {
    pub fn new(launcher: Arc<dyn TunnelLauncher>) -> Self {
        Self {
            launcher,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ssh(ssh_binary: impl Into<String>) -> Self {
        Self::new(Arc::new(SshLauncher::new(ssh_binary)))
    }

    /// Local port forwarding to `key`, reusing a healthy tunnel when there is one.
    pub async fn ensure(&self, key: &TunnelKey) -> Result<u16, TunnelError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.clone()).or_default().clone()
        };

        let mut current = slot.lock().await;
        if let Some(tunnel) = current.as_mut() {
            if tunnel.is_healthy().await {
                return Ok(tunnel.local_port);
            }
            warn!(%key, port = tunnel.local_port, "ssh tunnel unhealthy, re-establishing");
            if let Some(child) = tunnel.process.as_mut() {
                let _ = child.start_kill();
            }
            *current = None;
        }

        let tunnel = self.launcher.launch(key).await?;
        let port = tunnel.local_port;
        info!(%key, local_port = port, "ssh tunnel established");
        *current = Some(tunnel);
        Ok(port)
    }

    /// Tear down every tunnel this manager started.
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            if let Some(mut tunnel) = slot.lock().await.take() {
                if let Some(child) = tunnel.process.as_mut() {
                    let _ = child.kill().await;
                }
            }
        }
    }
}

async fn port_accepts(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_millis(500),
            TcpStream::connect(("127.0.0.1", port))
        )
        .await,
        Ok(Ok(_))
    )
}

async fn free_local_port() -> Result<u16, TunnelError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(TunnelError::NoLocalPort)?;
    let port = listener
        .local_addr()
        .map_err(TunnelError::NoLocalPort)?
        .port();
    Ok(port)
}
