pub mod config;
pub mod error;
pub mod persistence;
pub mod types;

pub use config::RecallConfig;
pub use error::{RecallError, Result};
pub use persistence::CatalogPersistence;
pub use types::*;
