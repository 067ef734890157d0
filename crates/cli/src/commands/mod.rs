pub mod chat;
pub mod config_cmd;
pub mod ingest;
pub mod runtime;
pub mod serve;
