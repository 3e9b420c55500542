pub mod assembler;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extractors;
pub mod fetcher;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod types;
