//! Custody security core.
//!
//! Building blocks for custodial wallet and card provisioning: a master key
//! registry with rotation-aware resolution, versioned AES-GCM envelope
//! encryption, BIP39 mnemonic derivation across pluggable chain strategies,
//! an Argon2-backed PIN guard with lockout, and an advisory risk heuristic.
//!
//! The services in [`service`] compose these pieces; everything below them
//! is usable on its own.

pub mod core;
pub mod crypto;
pub mod risk;
pub mod security;
pub mod service;
pub mod storage;

pub use crate::core::config::{LockoutConfig, RiskConfig, StorageConfig, VaultConfig};
pub use crate::core::errors::VaultError;
pub use crate::crypto::envelope::{EncryptedEnvelope, KeyResolver};
pub use crate::crypto::master_key::{MasterKeyRegistry, MasterKeySource, StaticKeySource};
pub use crate::crypto::mnemonic::MnemonicDeriver;
pub use crate::risk::RiskEngine;
pub use crate::security::pin::PinGuard;
pub use crate::service::{CardService, WalletService};
pub use crate::storage::{VaultStorage, VaultStorageTrait};
