//! SSH Commands
//!
//! Commands, copies and interactive sessions on hosts, jumping through the
//! gateway of hosts without a direct route.

use crate::app::App;
use crate::symbols;
use anyhow::{bail, Result};
use console::style;
use localdriver_provider::RemoteExecutor;

/// Resolved direction of a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub host: String,
    pub local: String,
    pub remote: String,
    pub upload: bool,
}

/// Split `host:path` into its parts, if it names a remote path
fn remote_part(endpoint: &str) -> Option<(&str, &str)> {
    let (host, path) = endpoint.split_once(':')?;
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some((host, path))
}

/// Work out which side of a copy is remote
///
/// Exactly one of `from` and `to` must be of the form `host:path`.
pub fn parse_copy_endpoints(from: &str, to: &str) -> Result<CopyPlan> {
    match (remote_part(from), remote_part(to)) {
        (Some(_), Some(_)) => bail!("Copy between two hosts is not supported"),
        (None, None) => bail!("One of '{}' and '{}' must be of the form host:path", from, to),
        (Some((host, path)), None) => Ok(CopyPlan {
            host: host.to_string(),
            local: to.to_string(),
            remote: path.to_string(),
            upload: false,
        }),
        (None, Some((host, path))) => Ok(CopyPlan {
            host: host.to_string(),
            local: from.to_string(),
            remote: path.to_string(),
            upload: true,
        }),
    }
}

/// Run ssh run command
pub async fn run_command(app: &App, host: &str, command: &str) -> Result<()> {
    let executor = app.executor(host).await?;
    let output = executor.run(command).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if !output.success() {
        bail!("Command exited with {} on host '{}'", output.exit_code, host);
    }
    Ok(())
}

/// Run ssh copy command
pub async fn run_copy(app: &App, from: &str, to: &str) -> Result<()> {
    let plan = parse_copy_endpoints(from, to)?;
    let executor = app.executor(&plan.host).await?;
    let output = executor.copy(&plan.local, &plan.remote, plan.upload).await?;
    if !output.success() {
        bail!(
            "Copy failed with {}: {}",
            output.exit_code,
            output.stderr.trim()
        );
    }
    println!("{} Copied {} to {}", style(symbols::CHECK).green(), from, to);
    Ok(())
}

/// Run ssh connect command
pub async fn run_connect(app: &App, host: &str) -> Result<()> {
    let executor = app.executor(host).await?;
    let code = executor.connect().await?;
    if code != 0 {
        bail!("Session on host '{}' ended with {}", host, code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload() {
        let plan = parse_copy_endpoints("./build.tar", "web:/tmp/build.tar").unwrap();
        assert_eq!(
            plan,
            CopyPlan {
                host: "web".to_string(),
                local: "./build.tar".to_string(),
                remote: "/tmp/build.tar".to_string(),
                upload: true,
            }
        );
    }

    #[test]
    fn test_download() {
        let plan = parse_copy_endpoints("db:/var/log/syslog", "logs/").unwrap();
        assert_eq!(plan.host, "db");
        assert_eq!(plan.remote, "/var/log/syslog");
        assert_eq!(plan.local, "logs/");
        assert!(!plan.upload);
    }

    #[test]
    fn test_colon_after_slash_is_local() {
        let plan = parse_copy_endpoints("./a:b", "web:/tmp").unwrap();
        assert_eq!(plan.local, "./a:b");
        assert!(plan.upload);
    }

    #[test]
    fn test_rejected_pairs() {
        assert!(parse_copy_endpoints("a:/x", "b:/y").is_err());
        assert!(parse_copy_endpoints("/x", "/y").is_err());
    }
}
