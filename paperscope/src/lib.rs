// Library interface for paperscope modules
// This allows tests and other binaries to import modules

pub mod aggregator;
pub mod cache;
pub mod ingestion;
pub mod processing;
pub mod server;
