pub mod client;
pub mod config;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod models;
pub mod objects;
pub mod registry;
