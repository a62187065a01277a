//! Command implementations

pub mod config_cmd;
pub mod scan;
pub mod watch;
