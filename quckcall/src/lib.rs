pub mod call;
pub mod config;
pub mod error;
pub mod models;
pub mod native;
pub mod offer;
pub mod peer;
pub mod pending;
pub mod storage;
