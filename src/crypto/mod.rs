pub mod chains;
pub mod envelope;
pub mod master_key;
pub mod mnemonic;

pub use chains::{ChainDeriver, ChainRegistry, DerivedKeyMaterial};
pub use envelope::{EncryptedEnvelope, KeyResolver};
pub use master_key::{ActiveKeyInfo, MasterKeyRegistry, MasterKeySource, StaticKeySource};
pub use mnemonic::MnemonicDeriver;
