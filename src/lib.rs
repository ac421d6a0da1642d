pub mod asns;
pub mod campaign;
pub mod config;
pub mod distribution;
pub mod exclude;
pub mod ports;
pub mod report;
pub mod scanner;
pub mod tracing;
