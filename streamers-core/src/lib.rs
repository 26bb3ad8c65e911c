pub mod models;
pub mod repository;
pub mod service;
pub mod cache;
pub mod provider;
pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

#[cfg(test)]
pub mod test_helpers;

pub use config::{Config, StreamersSettings};
pub use error::{Error, Result};
pub use cache::KeyBuilder;
