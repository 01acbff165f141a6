pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod validation;

pub use config::{LockoutConfig, RiskConfig, StorageConfig, VaultConfig};
pub use errors::VaultError;
