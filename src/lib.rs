pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod report;
