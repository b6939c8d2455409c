//! Command-injection bridge to a virtual machine's monitor

pub mod bridge;
pub mod command;

pub use bridge::{MonitorBridge, MonitorOptions, MonitorReply};
pub use command::MonitorCommand;
