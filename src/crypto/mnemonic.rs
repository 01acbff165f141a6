//! Recovery phrase generation, validation and multi-chain key derivation.

use bip39::Mnemonic;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::core::errors::VaultError;
use crate::crypto::chains::{ChainRegistry, DerivedKeyMaterial, IMPORTED_PATH};

/// A freshly generated recovery phrase with its seed. Ephemeral; neither
/// field may ever cross a persistence boundary in cleartext.
pub struct GeneratedPhrase {
    pub phrase: Zeroizing<String>,
    pub seed: Zeroizing<Vec<u8>>,
}

/// Turns recovery phrases into per-chain key material.
pub struct MnemonicDeriver {
    registry: ChainRegistry,
}

impl MnemonicDeriver {
    pub fn new(registry: ChainRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Generate a phrase from `entropy_bits` of OS randomness (128, 192 or
    /// 256). The BIP39 checksum is embedded in the final word.
    pub fn generate(&self, entropy_bits: usize) -> Result<GeneratedPhrase, VaultError> {
        if !matches!(entropy_bits, 128 | 192 | 256) {
            return Err(VaultError::KeyDerivation(format!(
                "Unsupported entropy size: {} bits",
                entropy_bits
            )));
        }
        let mut entropy = vec![0u8; entropy_bits / 8];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| VaultError::KeyDerivation(format!("Mnemonic generation failed: {}", e)));
        entropy.zeroize();
        let mnemonic = mnemonic?;

        let seed = Zeroizing::new(mnemonic.to_seed("").to_vec());
        debug!(words = mnemonic.word_count(), "recovery phrase generated");
        Ok(GeneratedPhrase { phrase: Zeroizing::new(mnemonic.to_string()), seed })
    }

    /// Whether `phrase` has a valid word count and checksum. Agrees with
    /// [`Self::generate`] by construction: both go through the same parser.
    pub fn validate(&self, phrase: &str) -> bool {
        Mnemonic::parse(phrase).is_ok()
    }

    /// Validate a phrase and fan its seed out to every registered chain.
    pub fn import_from_phrase(
        &self,
        phrase: &str,
    ) -> Result<BTreeMap<String, DerivedKeyMaterial>, VaultError> {
        let mnemonic = Mnemonic::parse(phrase)
            .map_err(|e| VaultError::InvalidPhrase(format!("{}", e)))?;
        let seed = Zeroizing::new(mnemonic.to_seed("").to_vec());
        self.derive_chain_keys(&seed)
    }

    /// Deterministic fan-out: the same seed always yields the same keys for
    /// every chain.
    pub fn derive_chain_keys(
        &self,
        seed: &[u8],
    ) -> Result<BTreeMap<String, DerivedKeyMaterial>, VaultError> {
        self.registry.derive_all(seed)
    }

    /// Import a single chain's private key (hex, `0x` prefix optional).
    /// Derives only that chain's public identifier; no multi-chain fan-out.
    pub fn import_from_private_key(
        &self,
        private_key_hex: &str,
        chain: &str,
    ) -> Result<DerivedKeyMaterial, VaultError> {
        let deriver = self.registry.get(chain)?;
        let stripped = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
        let key_bytes = hex::decode(stripped)
            .map(Zeroizing::new)
            .map_err(|_| VaultError::KeyDerivation("Private key must be hex".to_string()))?;
        let public_identifier = deriver.public_from_private(&key_bytes)?;
        Ok(DerivedKeyMaterial {
            chain: chain.to_string(),
            public_identifier,
            private_key: key_bytes,
            derivation_path: IMPORTED_PATH.to_string(),
        })
    }
}

impl Default for MnemonicDeriver {
    fn default() -> Self {
        Self::new(ChainRegistry::with_default_chains())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Canonical BIP39 phrase; first address of half the test tooling out there.
    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_word_counts() {
        let deriver = MnemonicDeriver::default();
        assert_eq!(deriver.generate(128).unwrap().phrase.split(' ').count(), 12);
        assert_eq!(deriver.generate(256).unwrap().phrase.split(' ').count(), 24);
    }

    #[test]
    fn test_generate_rejects_odd_entropy() {
        let deriver = MnemonicDeriver::default();
        assert!(deriver.generate(100).is_err());
        assert!(deriver.generate(512).is_err());
    }

    #[test]
    fn test_generated_phrase_validates() {
        let deriver = MnemonicDeriver::default();
        let generated = deriver.generate(256).unwrap();
        assert!(deriver.validate(&generated.phrase));
    }

    #[test]
    fn test_seed_matches_phrase() {
        let deriver = MnemonicDeriver::default();
        let generated = deriver.generate(128).unwrap();
        let reparsed = Mnemonic::parse(generated.phrase.as_str()).unwrap();
        assert_eq!(reparsed.to_seed("").to_vec(), generated.seed.to_vec());
    }

    #[test]
    fn test_known_phrase_seed_vector() {
        let mnemonic = Mnemonic::parse(PHRASE).unwrap();
        assert_eq!(
            hex::encode(mnemonic.to_seed("")),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
             9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
    }

    #[test]
    fn test_validate_rejects_mutated_word() {
        let deriver = MnemonicDeriver::default();
        assert!(deriver.validate(PHRASE));
        let mutated = PHRASE.replacen("about", "zoo", 1);
        assert!(!deriver.validate(&mutated));
    }

    #[test]
    fn test_validate_rejects_bad_word_count() {
        let deriver = MnemonicDeriver::default();
        assert!(!deriver.validate("abandon abandon abandon"));
    }

    #[test]
    fn test_import_from_phrase_checksum_error() {
        let deriver = MnemonicDeriver::default();
        let mutated = PHRASE.replacen("about", "abandon", 1);
        match deriver.import_from_phrase(&mutated) {
            Err(VaultError::InvalidPhrase(_)) => {}
            other => panic!("Expected InvalidPhrase, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_import_from_phrase_derives_all_chains() {
        let deriver = MnemonicDeriver::default();
        let keys = deriver.import_from_phrase(PHRASE).unwrap();
        assert!(keys.contains_key("ethereum"));
        assert!(keys.contains_key("solana"));
    }

    #[test]
    fn test_derive_chain_keys_deterministic() {
        let deriver = MnemonicDeriver::default();
        let seed = [0xabu8; 64];
        let a = deriver.derive_chain_keys(&seed).unwrap();
        let b = deriver.derive_chain_keys(&seed).unwrap();
        for (chain, material) in &a {
            let other = &b[chain];
            assert_eq!(material.public_identifier, other.public_identifier);
            assert_eq!(material.private_key.as_slice(), other.private_key.as_slice());
        }
    }

    #[test]
    fn test_import_private_key_marks_imported() {
        let deriver = MnemonicDeriver::default();
        let material = deriver
            .import_from_private_key(
                "0x0000000000000000000000000000000000000000000000000000000000000001",
                "ethereum",
            )
            .unwrap();
        assert_eq!(material.derivation_path, "imported");
        assert_eq!(material.chain, "ethereum");
        assert!(material.public_identifier.starts_with("0x"));
    }

    #[test]
    fn test_import_private_key_bad_hex() {
        let deriver = MnemonicDeriver::default();
        match deriver.import_from_private_key("not-hex", "ethereum") {
            Err(VaultError::KeyDerivation(msg)) => assert!(msg.contains("hex")),
            other => panic!("Expected KeyDerivation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_import_private_key_unknown_chain() {
        let deriver = MnemonicDeriver::default();
        assert!(matches!(
            deriver.import_from_private_key("00", "dogecoin"),
            Err(VaultError::UnsupportedChain(_))
        ));
    }
}
