pub mod alerts;
pub mod cache;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod quota;
pub mod risk;
pub mod store;
pub mod time;
pub mod types;
