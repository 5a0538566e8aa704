pub mod config;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod relay;
pub mod reports;
pub mod strategies;
pub mod supervisor;
pub mod telemetry;
pub mod trader;
