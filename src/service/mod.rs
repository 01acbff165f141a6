//! Provisioning services that compose the crypto, PIN, and storage layers.

pub mod card;
pub mod wallet;

pub use card::CardService;
pub use wallet::WalletService;
