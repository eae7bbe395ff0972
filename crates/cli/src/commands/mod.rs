pub mod config_cmd;
pub mod daemon;
pub mod ingest;
pub mod memory;
pub mod observe;
pub mod queue;
pub mod status;
