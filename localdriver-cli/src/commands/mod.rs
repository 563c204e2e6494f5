//! CLI Commands

pub mod catalog;
pub mod host;
pub mod network;
pub mod repair;
pub mod ssh;
pub mod volume;
