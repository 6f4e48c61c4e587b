pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod mqtt;
pub mod poll;
pub mod pollfile;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod signals;
pub mod wakeup;
