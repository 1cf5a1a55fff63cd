//! Tunnels between the local machine and a shadow pod
//!
//! [`Tunnel`] is the capability sessions use once their shadow is running.
//! [`SshTunnel`] implements it with child processes: a `kubectl
//! port-forward` from a free local port to the shadow's SSH port, then either
//! `ssh -R` (inbound, cluster traffic to a local port) or `sshuttle`
//! (outbound, local traffic to cluster ranges). Each tunnel gets its own local
//! port, so sessions can run next to a live `connect`. Children are killed
//! when the handle is dropped.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info};

use ktctl_common::ssh::SshCredential;

use crate::{Error, Result};

/// SSH port inside the shadow container
pub const SHADOW_SSH_PORT: u16 = 22;

/// How long the port-forward may take to start accepting connections
const PORT_FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(15);

const SSH_OPTIONS: [&str; 4] = [
    "-oStrictHostKeyChecking=no",
    "-oUserKnownHostsFile=/dev/null",
    "-oServerAliveInterval=30",
    "-oExitOnForwardFailure=yes",
];

/// Port mapping for an inbound tunnel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expose {
    /// Port the shadow listens on inside the cluster
    pub remote: u16,
    /// Local port traffic is delivered to
    pub local: u16,
}

impl FromStr for Expose {
    type Err = Error;

    /// Parse `<port>` or `<remote>:<local>`
    fn from_str(s: &str) -> Result<Self> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| {
                    Error::validation(format!(
                        "invalid expose '{}', expected <port> or <remote>:<local>",
                        s
                    ))
                })
        };
        match s.split_once(':') {
            Some((remote, local)) => Ok(Self {
                remote: parse(remote)?,
                local: parse(local)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(Self {
                    remote: port,
                    local: port,
                })
            }
        }
    }
}

impl fmt::Display for Expose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.local)
    }
}

/// Keeps a tunnel alive until dropped
#[async_trait]
pub trait TunnelHandle: Send {
    /// Resolves when the tunnel stops on its own
    async fn closed(&mut self) -> Result<()>;
}

/// Establishes tunnels to a running shadow pod
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Route traffic arriving at the shadow to a local port
    async fn inbound(
        &self,
        expose: Expose,
        pod_name: &str,
        pod_ip: &str,
        credential: &SshCredential,
    ) -> Result<Box<dyn TunnelHandle>>;

    /// Route local traffic for `cidrs` through the shadow
    async fn outbound(
        &self,
        pod_name: &str,
        pod_ip: &str,
        credential: &SshCredential,
        cidrs: &[String],
    ) -> Result<Box<dyn TunnelHandle>>;
}

/// Child processes backing one tunnel
pub struct ProcessTunnel {
    children: Vec<(String, Child)>,
}

#[async_trait]
impl TunnelHandle for ProcessTunnel {
    async fn closed(&mut self) -> Result<()> {
        if self.children.is_empty() {
            return Ok(());
        }
        let waits = self.children.iter_mut().map(|(name, child)| {
            let name = name.clone();
            Box::pin(async move { (name, child.wait().await) })
        });
        let ((name, status), _, _) = futures::future::select_all(waits).await;
        let status = status?;
        Err(Error::command_failed(format!(
            "tunnel process {} exited with {}",
            name, status
        )))
    }
}

/// Process-based tunnel over `kubectl port-forward` and SSH
#[derive(Clone, Debug)]
pub struct SshTunnel {
    namespace: String,
    kubeconfig: Option<PathBuf>,
}

impl SshTunnel {
    /// Tunnel to pods in `namespace`
    pub fn new(namespace: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            kubeconfig,
        }
    }

    /// Forward a free local port to the shadow's SSH port.
    async fn port_forward(&self, pod_name: &str) -> Result<(Child, u16)> {
        let local_port = free_local_port().await?;
        let mut cmd = Command::new("kubectl");
        if let Some(kc) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kc);
        }
        cmd.args(["-n", &self.namespace, "port-forward"])
            .arg(format!("pod/{}", pod_name))
            .arg(format!("{}:{}", local_port, SHADOW_SSH_PORT));

        let mut child = spawn(cmd, "kubectl port-forward")?;
        wait_for_port(&mut child, local_port, PORT_FORWARD_READY_TIMEOUT).await?;
        info!(pod = %pod_name, local_port, "Port-forward ready");
        Ok((child, local_port))
    }
}

fn spawn(mut cmd: Command, what: &str) -> Result<Child> {
    debug!(command = ?cmd.as_std(), "Spawning {}", what);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::command_failed(format!("failed to spawn {}: {}", what, e)))
}

/// A local port nothing is listening on right now
async fn free_local_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Wait until `port` accepts connections, failing early if `child` exits.
async fn wait_for_port(child: &mut Child, port: u16, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(Error::command_failed(format!(
                "port-forward on port {} exited with {} before it was ready",
                port, status
            )));
        }
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::command_failed(format!(
                "port-forward on port {} not ready after {:?}",
                port, timeout
            )));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// `ssh -R` arguments forwarding the shadow's `remote` port to local `local`
pub fn reverse_forward_args(expose: Expose, credential: &SshCredential) -> Vec<String> {
    let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
    args.extend([
        "-i".to_string(),
        credential.private_key_path.display().to_string(),
        "-p".to_string(),
        credential.port.to_string(),
        "-N".to_string(),
        "-R".to_string(),
        format!("{}:127.0.0.1:{}", expose.remote, expose.local),
        format!("{}@{}", credential.username, credential.remote_host),
    ]);
    args
}

/// `sshuttle` arguments routing `cidrs` through the shadow
pub fn sshuttle_args(pod_ip: &str, credential: &SshCredential, cidrs: &[String]) -> Vec<String> {
    let ssh_cmd = format!(
        "ssh {} -i {}",
        SSH_OPTIONS.join(" "),
        credential.private_key_path.display()
    );
    let mut args = vec![
        "--dns".to_string(),
        "--to-ns".to_string(),
        pod_ip.to_string(),
        "-e".to_string(),
        ssh_cmd,
        "-r".to_string(),
        format!(
            "{}@{}:{}",
            credential.username, credential.remote_host, credential.port
        ),
    ];
    args.extend(cidrs.iter().cloned());
    args
}

#[async_trait]
impl Tunnel for SshTunnel {
    async fn inbound(
        &self,
        expose: Expose,
        pod_name: &str,
        _pod_ip: &str,
        credential: &SshCredential,
    ) -> Result<Box<dyn TunnelHandle>> {
        let (forward, local_port) = self.port_forward(pod_name).await?;
        let credential = SshCredential {
            port: local_port,
            ..credential.clone()
        };

        let mut ssh = Command::new("ssh");
        ssh.args(reverse_forward_args(expose, &credential));
        let ssh = spawn(ssh, "ssh")?;
        info!(pod = %pod_name, expose = %expose, "Inbound tunnel started");

        Ok(Box::new(ProcessTunnel {
            children: vec![
                ("kubectl port-forward".to_string(), forward),
                ("ssh".to_string(), ssh),
            ],
        }))
    }

    async fn outbound(
        &self,
        pod_name: &str,
        pod_ip: &str,
        credential: &SshCredential,
        cidrs: &[String],
    ) -> Result<Box<dyn TunnelHandle>> {
        let (forward, local_port) = self.port_forward(pod_name).await?;
        let credential = SshCredential {
            port: local_port,
            ..credential.clone()
        };

        let mut sshuttle = Command::new("sshuttle");
        sshuttle.args(sshuttle_args(pod_ip, &credential, cidrs));
        let sshuttle = spawn(sshuttle, "sshuttle")?;
        info!(pod = %pod_name, cidrs = ?cidrs, "Outbound tunnel started");

        Ok(Box::new(ProcessTunnel {
            children: vec![
                ("kubectl port-forward".to_string(), forward),
                ("sshuttle".to_string(), sshuttle),
            ],
        }))
    }
}
