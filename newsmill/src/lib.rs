// Library interface for newsmill modules
// This allows tests and other binaries to import modules

pub mod aggregator;
pub mod engine;
pub mod events;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod poller;
pub mod processing;
pub mod registry;
pub mod scraping;
pub mod server;
pub mod storage;
