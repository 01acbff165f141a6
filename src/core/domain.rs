//! Domain records shared by the provisioning services and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::envelope::EncryptedEnvelope;

/// A provisioned wallet. The private key only exists inside `encrypted_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub owner_id: String,
    pub chain: String,
    pub address: String,
    pub encrypted_key: EncryptedEnvelope,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Card lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Frozen,
    Closed,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "active",
            CardStatus::Frozen => "frozen",
            CardStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CardStatus::Active),
            "frozen" => Some(CardStatus::Frozen),
            "closed" => Some(CardStatus::Closed),
            _ => None,
        }
    }
}

/// A provisioned virtual card. Only the masked PAN is readable without the
/// envelope cipher and a verified PIN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub owner_id: String,
    pub masked_pan: String,
    pub encrypted_payload: EncryptedEnvelope,
    pub balance: String,
    pub status: CardStatus,
    pub created_at: DateTime<Utc>,
}

/// Decrypted card payload. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDetails {
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
}

/// Per-owner PIN and lockout state, one row per owner.
#[derive(Debug, Clone)]
pub struct AccountSecurityState {
    pub owner_id: String,
    pub pin_hash: Vec<u8>,
    pub pin_salt: Vec<u8>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl AccountSecurityState {
    pub fn new(owner_id: &str, pin_hash: Vec<u8>, pin_salt: Vec<u8>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            pin_hash,
            pin_salt,
            failed_attempts: 0,
            locked_until: None,
            last_attempt: None,
        }
    }

    /// Whether the owner is inside an active lockout window at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

/// Transaction row as consumed by the risk heuristic.
#[derive(Debug, Clone)]
pub struct StoredTransaction {
    pub owner_id: String,
    pub amount: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

/// Audit event emitted after the primary transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub metadata: serde_json::Value,
}

/// Mask a PAN down to its trailing four digits.
pub fn masked_pan(card_number: &str) -> String {
    let digits: String = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let tail = &digits[digits.len() - 4..];
    format!("{}{}", "*".repeat(digits.len() - 4), tail)
}

/// Mask a chain address, keeping a short prefix and suffix for audit trails.
pub fn masked_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
