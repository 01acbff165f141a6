//! Card provisioning and PIN-gated detail access.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::core::domain::{masked_pan, AuditEvent, Card, CardDetails, CardStatus};
use crate::core::errors::VaultError;
use crate::core::validation::{validate_card_number, validate_cvv, validate_expiry};
use crate::crypto::envelope;
use crate::crypto::master_key::MasterKeyRegistry;
use crate::security::pin::PinGuard;
use crate::storage::VaultStorageTrait;

pub struct CardService {
    storage: Arc<dyn VaultStorageTrait>,
    keys: Arc<MasterKeyRegistry>,
    pin_guard: Arc<PinGuard>,
}

impl CardService {
    pub fn new(
        storage: Arc<dyn VaultStorageTrait>,
        keys: Arc<MasterKeyRegistry>,
        pin_guard: Arc<PinGuard>,
    ) -> Self {
        Self { storage, keys, pin_guard }
    }

    /// Provision a card for `owner_id` and return the new card id.
    ///
    /// PIN verification runs before anything else, so lockout and invalid-pin
    /// outcomes propagate unchanged. The full card data is sealed into a
    /// single envelope; only the masked PAN is stored readable.
    pub async fn add_card(
        &self,
        owner_id: &str,
        card_number: &str,
        expiry: &str,
        cvv: &str,
        pin: &str,
    ) -> Result<String, VaultError> {
        self.pin_guard.verify_pin(owner_id, pin).await?;

        validate_card_number(card_number)?;
        validate_expiry(expiry)?;
        validate_cvv(cvv)?;

        let details = CardDetails {
            card_number: card_number.to_string(),
            expiry: expiry.to_string(),
            cvv: cvv.to_string(),
        };
        let mut payload = serde_json::to_vec(&details)
            .map_err(|e| VaultError::Persistence(format!("card payload encode: {}", e)))?;

        let active = self.keys.active_key()?;
        let key_bytes: &[u8] = &active.material;
        let encrypted_payload = envelope::encrypt(&payload, &active.key_id, key_bytes)?;
        payload.zeroize();

        let card = Card {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            masked_pan: masked_pan(card_number),
            encrypted_payload,
            balance: "0".to_string(),
            status: CardStatus::Active,
            created_at: Utc::now(),
        };

        self.storage.store_card(&card).await?;

        let event = AuditEvent {
            actor_id: owner_id.to_string(),
            entity_type: "card".to_string(),
            entity_id: card.id.clone(),
            action: "card_added".to_string(),
            metadata: serde_json::json!({ "masked_pan": card.masked_pan }),
        };
        if let Err(e) = self.storage.log_audit(&event).await {
            warn!(card_id = %card.id, "audit write failed after card commit: {}", e);
        }

        info!(card_id = %card.id, masked_pan = %card.masked_pan, "card added");
        Ok(card.id)
    }

    /// Decrypt a card's full details. The PIN verifies inside this call;
    /// there is no decrypt path that skips it.
    pub async fn get_card_details(
        &self,
        owner_id: &str,
        card_id: &str,
        pin: &str,
    ) -> Result<CardDetails, VaultError> {
        self.pin_guard.verify_pin(owner_id, pin).await?;

        let card = self
            .storage
            .load_card(owner_id, card_id)
            .await?
            .ok_or_else(|| VaultError::Persistence(format!("card not found: {}", card_id)))?;

        let plaintext = envelope::decrypt(&card.encrypted_payload, self.keys.as_ref())?;
        let details: CardDetails = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Decryption(format!("card payload decode: {}", e)))?;

        let event = AuditEvent {
            actor_id: owner_id.to_string(),
            entity_type: "card".to_string(),
            entity_id: card_id.to_string(),
            action: "card_accessed".to_string(),
            metadata: serde_json::json!({ "masked_pan": card.masked_pan }),
        };
        if let Err(e) = self.storage.log_audit(&event).await {
            warn!(card_id = %card_id, "audit write failed after card access: {}", e);
        }

        Ok(details)
    }

    /// Masked listing surface; no PIN required because nothing sensitive
    /// leaves the envelope.
    pub async fn get_card(&self, owner_id: &str, card_id: &str) -> Result<Option<Card>, VaultError> {
        Ok(self.storage.load_card(owner_id, card_id).await?)
    }
}
