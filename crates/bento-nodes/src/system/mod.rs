//! System nodes
//!
//! Nodes for process execution and environment interaction.

mod shell_command;

pub use shell_command::ShellCommandExecutor;
