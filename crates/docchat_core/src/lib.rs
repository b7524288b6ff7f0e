pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod exchange_log;
pub mod memory;
pub mod metrics;
