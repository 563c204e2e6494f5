//! LocalDriver Provider
//!
//! Collaborators the metadata layer talks to at their interface boundary:
//! - `Hypervisor` trait, implemented over `virsh` and in memory
//! - `RemoteExecutor` for commands run on hosts, over `ssh` or scripted
//! - `BlockDeviceMounter` for formatting and mounting attached volumes
//! - Image/template catalog and template selection by size

pub mod catalog;
pub mod config;
pub mod hypervisor;
pub mod memory;
pub mod mount;
pub mod remote;
pub mod template;
pub mod virsh;

pub use catalog::Catalog;
pub use config::ProviderConfig;
pub use hypervisor::Hypervisor;
pub use memory::{InMemoryHypervisor, SimulatedShell};
pub use mount::{BlockDeviceMounter, LIST_BLOCK_DEVICES};
pub use remote::{access_ip, CommandOutput, RemoteExecutor, ScriptedExecutor, SshExecutor, SshTarget};
pub use template::{rank_drf, select_template_by_size};
pub use virsh::VirshHypervisor;
