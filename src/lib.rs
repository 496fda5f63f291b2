pub mod app;
pub mod config;
pub mod consolidate;
pub mod domain;
pub mod error;
pub mod output;
pub mod planner;
pub mod quality;
pub mod session;
pub mod shard;
pub mod store;
pub mod table;
pub mod traverser;
pub mod webdriver;
