//! Wallet provisioning.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::core::domain::{masked_address, AuditEvent, Wallet};
use crate::core::errors::VaultError;
use crate::core::validation::validate_address;
use crate::crypto::envelope;
use crate::crypto::master_key::MasterKeyRegistry;
use crate::security::pin::PinGuard;
use crate::storage::VaultStorageTrait;

/// Orchestrates wallet creation: PIN gate, address validation, envelope
/// encryption under the active master key, persistence, audit.
pub struct WalletService {
    storage: Arc<dyn VaultStorageTrait>,
    keys: Arc<MasterKeyRegistry>,
    pin_guard: Arc<PinGuard>,
}

impl WalletService {
    pub fn new(
        storage: Arc<dyn VaultStorageTrait>,
        keys: Arc<MasterKeyRegistry>,
        pin_guard: Arc<PinGuard>,
    ) -> Self {
        Self { storage, keys, pin_guard }
    }

    /// Provision a wallet for `owner_id` and return the new wallet id.
    ///
    /// If the owner already has a PIN it must verify (lockout applies before
    /// any other work). A first-time caller associates `pin` with the account
    /// instead. The private key is encrypted under the current active master
    /// key; without an active key the call fails with
    /// `VaultError::Configuration` and nothing is persisted.
    pub async fn create_wallet(
        &self,
        owner_id: &str,
        chain: &str,
        address: &str,
        private_key: &[u8],
        pin: &str,
    ) -> Result<String, VaultError> {
        if self.pin_guard.has_pin(owner_id).await? {
            self.pin_guard.verify_pin(owner_id, pin).await?;
        } else {
            self.pin_guard.set_pin(owner_id, pin).await?;
        }

        validate_address(address, chain)?;

        let active = self.keys.active_key()?;
        let key_bytes: &[u8] = &active.material;
        let encrypted_key = envelope::encrypt(private_key, &active.key_id, key_bytes)?;

        let wallet = Wallet {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            chain: chain.to_string(),
            address: address.to_string(),
            encrypted_key,
            active: true,
            created_at: Utc::now(),
        };

        self.storage.store_wallet(&wallet).await?;

        // Audit after the row is committed; an audit failure must not undo
        // the provisioning.
        let event = AuditEvent {
            actor_id: owner_id.to_string(),
            entity_type: "wallet".to_string(),
            entity_id: wallet.id.clone(),
            action: "wallet_created".to_string(),
            metadata: serde_json::json!({
                "chain": chain,
                "masked_address": masked_address(address),
            }),
        };
        if let Err(e) = self.storage.log_audit(&event).await {
            warn!(wallet_id = %wallet.id, "audit write failed after wallet commit: {}", e);
        }

        info!(wallet_id = %wallet.id, chain = %chain, "wallet created");
        Ok(wallet.id)
    }

    /// Decrypt a wallet's private key after a successful PIN verification in
    /// the same call.
    pub async fn export_private_key(
        &self,
        owner_id: &str,
        wallet_id: &str,
        pin: &str,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        self.pin_guard.verify_pin(owner_id, pin).await?;

        let wallet = self
            .storage
            .load_wallet(owner_id, wallet_id)
            .await?
            .ok_or_else(|| VaultError::Persistence(format!("wallet not found: {}", wallet_id)))?;

        let plaintext = envelope::decrypt(&wallet.encrypted_key, self.keys.as_ref())?;

        let event = AuditEvent {
            actor_id: owner_id.to_string(),
            entity_type: "wallet".to_string(),
            entity_id: wallet_id.to_string(),
            action: "wallet_key_exported".to_string(),
            metadata: serde_json::json!({
                "masked_address": masked_address(&wallet.address),
            }),
        };
        if let Err(e) = self.storage.log_audit(&event).await {
            warn!(wallet_id = %wallet_id, "audit write failed after key export: {}", e);
        }

        Ok(plaintext)
    }

    /// Owner's wallets with only public fields meaningful to a caller.
    pub async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>, VaultError> {
        Ok(self.storage.list_wallets(owner_id).await?)
    }
}
