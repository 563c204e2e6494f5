//! Remote command execution on hosts
//!
//! Commands run through a [`RemoteExecutor`]. The production executor shells
//! out to the `ssh` binary with the host's private key; every command is
//! bounded by a timeout.

use localdriver_core::props::HostNetworkV1;
use localdriver_core::{Error, Host, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of a command run on a host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit code into a [`Error::RemoteCommand`]
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::RemoteCommand {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs shell commands on one host
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command; a non-zero exit code is not an error at this level
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Address used to reach a host
///
/// The address on the default network wins, then any known address.
pub fn access_ip(host: &Host) -> Result<Option<String>> {
    let network: HostNetworkV1 = host.properties.get()?;
    Ok(network
        .ipv4_addresses
        .get(&network.default_network_id)
        .or_else(|| network.ipv4_addresses.values().next())
        .cloned())
}

/// Where and how to reach a host over SSH
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: String,
    /// Host to jump through when the target has no direct route
    pub gateway: Option<Box<SshTarget>>,
}

impl SshTarget {
    /// Build the target of a host from its metadata
    pub fn for_host(host: &Host, user: &str, port: u16) -> Result<Self> {
        let address = access_ip(host)?.ok_or_else(|| {
            Error::Inconsistency(format!("host '{}' has no known address", host.name))
        })?;
        Ok(Self {
            host: address,
            port,
            user: user.to_string(),
            private_key: host.private_key.clone(),
            gateway: None,
        })
    }

    pub fn with_gateway(mut self, gateway: SshTarget) -> Self {
        self.gateway = Some(Box::new(gateway));
        self
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Write a private key to a file only the current user can read
fn key_file(private_key: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("localdriver-key").tempfile()?;
    file.write_all(private_key.as_bytes())?;
    if !private_key.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

/// Key files referenced by an ssh/scp invocation, removed on drop
struct SshSession {
    args: Vec<String>,
    _keys: Vec<NamedTempFile>,
}

impl SshSession {
    fn prepare(target: &SshTarget, port_flag: &str) -> Result<Self> {
        let key = key_file(&target.private_key)?;
        let mut args = vec![
            "-i".to_string(),
            key.path().display().to_string(),
            port_flag.to_string(),
            target.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        let mut keys = vec![key];

        if let Some(gateway) = &target.gateway {
            let gateway_key = key_file(&gateway.private_key)?;
            args.push("-o".to_string());
            args.push(format!(
                "ProxyCommand=ssh -i {} -p {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -W %h:%p {}",
                gateway_key.path().display(),
                gateway.port,
                gateway.destination()
            ));
            keys.push(gateway_key);
        }

        Ok(Self { args, _keys: keys })
    }
}

/// Executor running commands through the `ssh` binary
pub struct SshExecutor {
    target: SshTarget,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(target: SshTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    async fn output(&self, program: &str, args: Vec<String>, label: &str) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(label.to_string(), self.timeout))??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Copy a file between the local machine and the host
    pub async fn copy(&self, local: &str, remote: &str, upload: bool) -> Result<CommandOutput> {
        let session = SshSession::prepare(&self.target, "-P")?;
        let remote = format!("{}:{}", self.target.destination(), remote);
        let mut args = session.args.clone();
        args.push("-r".to_string());
        if upload {
            args.push(local.to_string());
            args.push(remote);
        } else {
            args.push(remote);
            args.push(local.to_string());
        }
        debug!(host = %self.target.host, local, upload, "Copying over scp");
        self.output("scp", args, "scp").await
    }

    /// Open an interactive session, inheriting the terminal
    pub async fn connect(&self) -> Result<i32> {
        let session = SshSession::prepare(&self.target, "-p")?;
        let mut args = session.args.clone();
        args.push(self.target.destination());
        let status = Command::new("ssh").args(&args).status().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let session = SshSession::prepare(&self.target, "-p")?;
        let mut args = session.args.clone();
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push(self.target.destination());
        args.push("--".to_string());
        args.push(command.to_string());

        debug!(host = %self.target.host, command, "Running remote command");
        let output = self.output("ssh", args, command).await?;
        if !output.success() {
            warn!(
                host = %self.target.host,
                command,
                exit_code = output.exit_code,
                "Remote command failed"
            );
        }
        Ok(output)
    }
}

/// Executor replaying canned outputs, for tests
///
/// Each expectation matches commands containing a pattern and is consumed
/// once. Commands matching nothing succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    expectations: Mutex<VecDeque<(String, CommandOutput)>>,
    history: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next command containing `pattern`
    pub fn expect(&self, pattern: impl Into<String>, output: CommandOutput) -> &Self {
        self.expectations.lock().push_back((pattern.into(), output));
        self
    }

    /// Every command run so far, in order
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.history.lock().push(command.to_string());
        let mut expectations = self.expectations.lock();
        let position = expectations
            .iter()
            .position(|(pattern, _)| command.contains(pattern.as_str()));
        Ok(position
            .and_then(|i| expectations.remove(i))
            .map(|(_, output)| output)
            .unwrap_or_default())
    }
}
