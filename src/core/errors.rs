use chrono::{DateTime, Utc};
use std::fmt;

/// Custom error type for custody operations.
#[derive(Debug)]
pub enum VaultError {
    /// Address failed chain-specific validation.
    InvalidAddress(String),
    /// Recovery phrase failed word-count or checksum validation.
    InvalidPhrase(String),
    /// Card number / expiry / CVV validation errors.
    InvalidCardData(String),
    /// Envelope decryption errors (unknown key id, tag mismatch, bad version).
    Decryption(String),
    /// Envelope encryption errors.
    Encryption(String),
    /// Account is inside an active lockout window.
    AccountLocked {
        /// When the lockout window ends.
        locked_until: DateTime<Utc>,
    },
    /// PIN comparison failed (or the account is unknown; the two are not
    /// distinguishable at this boundary).
    InvalidPin {
        /// Failed attempts recorded so far, including this one.
        failed_attempts: u32,
        /// Attempts left before the account locks.
        attempts_remaining: u32,
    },
    /// Opaque wrapper around store failures.
    Persistence(String),
    /// No active master key resolvable; fatal for encrypting callers.
    Configuration(String),
    /// Key derivation errors.
    KeyDerivation(String),
    /// Unsupported or unregistered chain identifier.
    UnsupportedChain(String),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            VaultError::InvalidPhrase(msg) => write!(f, "Invalid recovery phrase: {}", msg),
            VaultError::InvalidCardData(msg) => write!(f, "Invalid card data: {}", msg),
            VaultError::Decryption(msg) => write!(f, "Decryption error: {}", msg),
            VaultError::Encryption(msg) => write!(f, "Encryption error: {}", msg),
            VaultError::AccountLocked { locked_until } => {
                write!(f, "Account locked until {}", locked_until)
            }
            VaultError::InvalidPin { attempts_remaining, .. } => {
                write!(f, "Invalid PIN ({} attempts remaining)", attempts_remaining)
            }
            VaultError::Persistence(_) => write!(f, "Internal storage error"),
            VaultError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            VaultError::KeyDerivation(msg) => write!(f, "Key derivation error: {}", msg),
            VaultError::UnsupportedChain(chain) => write!(f, "Unsupported chain: {}", chain),
        }
    }
}

impl std::error::Error for VaultError {}

impl VaultError {
    /// Stable machine-readable code for the service boundary.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InvalidAddress(_) => "invalid_address",
            VaultError::InvalidPhrase(_) => "invalid_phrase",
            VaultError::InvalidCardData(_) => "invalid_card_data",
            VaultError::Decryption(_) => "decryption_failed",
            VaultError::Encryption(_) => "encryption_failed",
            VaultError::AccountLocked { .. } => "account_locked",
            VaultError::InvalidPin { .. } => "invalid_pin",
            VaultError::Persistence(_) => "internal_error",
            VaultError::Configuration(_) => "configuration_error",
            VaultError::KeyDerivation(_) => "key_derivation_failed",
            VaultError::UnsupportedChain(_) => "unsupported_chain",
        }
    }

    /// Critical errors should block provisioning entirely.
    pub fn is_critical(&self) -> bool {
        matches!(self, VaultError::Configuration(_) | VaultError::Encryption(_))
    }

    /// Validation errors are caller-visible and never retried internally.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidAddress(_)
                | VaultError::InvalidPhrase(_)
                | VaultError::InvalidCardData(_)
        )
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(err: anyhow::Error) -> Self {
        VaultError::Persistence(err.to_string())
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        VaultError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_address() {
        let err = VaultError::InvalidAddress("bad hex".to_string());
        assert_eq!(format!("{}", err), "Invalid address: bad hex");
    }

    #[test]
    fn test_persistence_display_is_generic() {
        // Store failures must not leak context to callers.
        let err = VaultError::Persistence("connection refused to db at 10.0.0.3".to_string());
        assert_eq!(format!("{}", err), "Internal storage error");
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(VaultError::InvalidCardData(String::new()).code(), "invalid_card_data");
        assert_eq!(
            VaultError::AccountLocked { locked_until: Utc::now() }.code(),
            "account_locked"
        );
    }

    #[test]
    fn test_configuration_is_critical() {
        assert!(VaultError::Configuration("no active key".into()).is_critical());
        assert!(!VaultError::InvalidAddress("x".into()).is_critical());
    }

    #[test]
    fn test_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("db exploded");
        let err: VaultError = anyhow_err.into();
        match err {
            VaultError::Persistence(msg) => assert_eq!(msg, "db exploded"),
            _ => panic!("Expected Persistence variant"),
        }
    }
}
