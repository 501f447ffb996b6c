pub mod config;
pub mod probe;
pub mod utils;

pub use config::check_config;
pub use probe::{probe, remote_time, ProbeOptions};
