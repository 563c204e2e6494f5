//! Block device mounting on a host

use crate::remote::{shell_quote, CommandOutput, RemoteExecutor};
use localdriver_core::Result;
use tracing::info;

/// Lists the block devices of a host, one `NAME TYPE` row per device
pub const LIST_BLOCK_DEVICES: &str = "sudo lsblk -l -n -o NAME,TYPE";

/// Formats, mounts and unmounts block devices through a remote executor
pub struct BlockDeviceMounter<'a> {
    executor: &'a dyn RemoteExecutor,
}

impl<'a> BlockDeviceMounter<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor) -> Self {
        Self { executor }
    }

    async fn run_checked(&self, command: String) -> Result<CommandOutput> {
        self.executor.run(&command).await?.check(&command)
    }

    /// Raw `lsblk` listing of the host
    pub async fn list_block_devices(&self) -> Result<String> {
        Ok(self.run_checked(LIST_BLOCK_DEVICES.to_string()).await?.stdout)
    }

    /// Create a filesystem on `device`, mount it at `path` and persist the
    /// mount in fstab
    pub async fn mount_block_device(&self, device: &str, path: &str, format: &str) -> Result<()> {
        let (qdevice, qpath, qformat) = (shell_quote(device), shell_quote(path), shell_quote(format));
        let command = [
            format!("sudo mkfs -t {} {}", qformat, qdevice),
            format!("sudo mkdir -p {}", qpath),
            format!("sudo mount -t {} {} {}", qformat, qdevice, qpath),
            format!(
                "echo {}' '{}' '{}' defaults 0 2' | sudo tee -a /etc/fstab > /dev/null",
                qdevice, qpath, qformat
            ),
        ]
        .join(" && ");
        self.run_checked(command).await?;
        info!(device, path, format, "Mounted block device");
        Ok(())
    }

    /// Unmount `device` and drop its fstab entry
    pub async fn unmount_block_device(&self, device: &str) -> Result<()> {
        let escaped = device.replace('/', r"\/");
        let command = format!(
            "sudo umount {} && sudo sed -i '/^{} /d' /etc/fstab",
            shell_quote(device),
            escaped
        );
        self.run_checked(command).await?;
        info!(device, "Unmounted block device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ScriptedExecutor;
    use localdriver_core::Error;

    #[tokio::test]
    async fn test_mount_command() {
        let executor = ScriptedExecutor::new();
        BlockDeviceMounter::new(&executor)
            .mount_block_device("/dev/vdb", "/shared/data", "ext4")
            .await
            .unwrap();

        let history = executor.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].starts_with("sudo mkfs -t 'ext4' '/dev/vdb'"));
        assert!(history[0].contains("sudo mount -t 'ext4' '/dev/vdb' '/shared/data'"));
        assert!(history[0].contains("/etc/fstab"));
    }

    #[tokio::test]
    async fn test_unmount_failure_carries_stderr() {
        let executor = ScriptedExecutor::new();
        executor.expect("umount", CommandOutput::failed(32, "target is busy"));

        let err = BlockDeviceMounter::new(&executor)
            .unmount_block_device("/dev/vdb")
            .await
            .unwrap_err();
        match err {
            Error::RemoteCommand { stderr, .. } => assert_eq!(stderr, "target is busy"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(executor.history()[0].contains(r"/^\/dev\/vdb /d"));
    }
}
