//! Per-chain key derivation strategies.
//!
//! Each supported chain implements [`ChainDeriver`] with one fixed derivation
//! path. New chains register a strategy; orchestration code never changes.

use coins_bip32::xkeys::{Parent, XPriv};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::core::errors::VaultError;

type HmacSha512 = Hmac<Sha512>;

/// Derivation path marker for keys imported directly rather than derived
/// from a seed.
pub const IMPORTED_PATH: &str = "imported";

/// One chain's keypair, derived or imported. Ephemeral until encrypted.
#[derive(Clone)]
pub struct DerivedKeyMaterial {
    pub chain: String,
    pub public_identifier: String,
    pub private_key: Zeroizing<Vec<u8>>,
    pub derivation_path: String,
}

impl std::fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyMaterial")
            .field("chain", &self.chain)
            .field("public_identifier", &self.public_identifier)
            .field("derivation_path", &self.derivation_path)
            .finish()
    }
}

/// A chain-specific derivation strategy.
pub trait ChainDeriver: Send + Sync {
    fn chain_id(&self) -> &'static str;
    fn derivation_path(&self) -> &'static str;

    /// Deterministically derive this chain's keypair from a BIP39 seed.
    fn derive(&self, seed: &[u8]) -> Result<DerivedKeyMaterial, VaultError>;

    /// Compute the public identifier for an externally supplied private key.
    fn public_from_private(&self, private_key: &[u8]) -> Result<String, VaultError>;
}

/// Ethereum: BIP44 m/44'/60'/0'/0/0 over secp256k1, Keccak-256 address.
pub struct EthereumDeriver;

const HARDENED: u32 = 0x8000_0000;
const ETHEREUM_PATH: [u32; 5] = [44 | HARDENED, 60 | HARDENED, HARDENED, 0, 0];

impl EthereumDeriver {
    fn address_from_verifying_key(vk: &k256::ecdsa::VerifyingKey) -> String {
        let point = vk.to_encoded_point(false);
        let mut keccak = Keccak256::new();
        keccak.update(&point.as_bytes()[1..]);
        let hash = keccak.finalize();
        format!("0x{}", hex::encode(&hash[12..]))
    }
}

impl ChainDeriver for EthereumDeriver {
    fn chain_id(&self) -> &'static str {
        "ethereum"
    }

    fn derivation_path(&self) -> &'static str {
        "m/44'/60'/0'/0/0"
    }

    fn derive(&self, seed: &[u8]) -> Result<DerivedKeyMaterial, VaultError> {
        let mut xprv = XPriv::root_from_seed(seed, None)
            .map_err(|e| VaultError::KeyDerivation(format!("BIP32 root failed: {}", e)))?;
        for index in ETHEREUM_PATH {
            xprv = xprv
                .derive_child(index)
                .map_err(|e| VaultError::KeyDerivation(format!("BIP32 step failed: {}", e)))?;
        }
        let signing_key: &k256::ecdsa::SigningKey = xprv.as_ref();
        let private_key = Zeroizing::new(signing_key.to_bytes().to_vec());
        let address = Self::address_from_verifying_key(signing_key.verifying_key());
        Ok(DerivedKeyMaterial {
            chain: self.chain_id().to_string(),
            public_identifier: address,
            private_key,
            derivation_path: self.derivation_path().to_string(),
        })
    }

    fn public_from_private(&self, private_key: &[u8]) -> Result<String, VaultError> {
        let signing_key = k256::ecdsa::SigningKey::from_slice(private_key)
            .map_err(|_| VaultError::KeyDerivation("Invalid secp256k1 private key".to_string()))?;
        Ok(Self::address_from_verifying_key(signing_key.verifying_key()))
    }
}

/// SLIP-0010 Ed25519 derivation engine. Ed25519 supports hardened steps
/// only; non-hardened indices are rejected.
struct Slip10Ed25519 {
    chain_code: [u8; 32],
    key: Zeroizing<[u8; 32]>,
}

impl Slip10Ed25519 {
    fn from_seed(seed: &[u8]) -> Result<Self, VaultError> {
        if seed.len() < 16 {
            return Err(VaultError::KeyDerivation(
                "Seed must be at least 16 bytes".to_string(),
            ));
        }
        let mut mac = HmacSha512::new_from_slice(b"ed25519 seed")
            .map_err(|e| VaultError::KeyDerivation(format!("HMAC init failed: {}", e)))?;
        mac.update(seed);
        let result = mac.finalize().into_bytes();
        Ok(Self::split(&result))
    }

    fn derive_child(&self, index: u32) -> Result<Self, VaultError> {
        if index < HARDENED {
            return Err(VaultError::KeyDerivation(
                "Ed25519 derivation requires hardened indices".to_string(),
            ));
        }
        // 0x00 || key || index
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| VaultError::KeyDerivation(format!("HMAC init failed: {}", e)))?;
        mac.update(&[0x00]);
        mac.update(self.key.as_slice());
        mac.update(&index.to_be_bytes());
        let result = mac.finalize().into_bytes();
        Ok(Self::split(&result))
    }

    fn split(bytes: &[u8]) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&bytes[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&bytes[32..]);
        Self { chain_code, key }
    }

    fn derive_path(seed: &[u8], path: &[u32]) -> Result<Self, VaultError> {
        let mut node = Self::from_seed(seed)?;
        for index in path {
            node = node.derive_child(*index)?;
        }
        Ok(node)
    }
}

/// Solana: SLIP-0010 m/44'/501'/0'/0' over Ed25519, base58 public key.
pub struct SolanaDeriver;

const SOLANA_PATH: [u32; 4] = [44 | HARDENED, 501 | HARDENED, HARDENED, HARDENED];

impl ChainDeriver for SolanaDeriver {
    fn chain_id(&self) -> &'static str {
        "solana"
    }

    fn derivation_path(&self) -> &'static str {
        "m/44'/501'/0'/0'"
    }

    fn derive(&self, seed: &[u8]) -> Result<DerivedKeyMaterial, VaultError> {
        let node = Slip10Ed25519::derive_path(seed, &SOLANA_PATH)?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&node.key);
        let public = signing_key.verifying_key().to_bytes();
        Ok(DerivedKeyMaterial {
            chain: self.chain_id().to_string(),
            public_identifier: bs58::encode(public).into_string(),
            private_key: Zeroizing::new(node.key.to_vec()),
            derivation_path: self.derivation_path().to_string(),
        })
    }

    fn public_from_private(&self, private_key: &[u8]) -> Result<String, VaultError> {
        let bytes: [u8; 32] = private_key
            .try_into()
            .map_err(|_| VaultError::KeyDerivation("Ed25519 key must be 32 bytes".to_string()))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        Ok(bs58::encode(signing_key.verifying_key().to_bytes()).into_string())
    }
}

/// Open map from chain id to derivation strategy.
pub struct ChainRegistry {
    derivers: BTreeMap<&'static str, Arc<dyn ChainDeriver>>,
}

impl ChainRegistry {
    pub fn empty() -> Self {
        Self { derivers: BTreeMap::new() }
    }

    /// Registry with the built-in chains.
    pub fn with_default_chains() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(EthereumDeriver));
        registry.register(Arc::new(SolanaDeriver));
        registry
    }

    pub fn register(&mut self, deriver: Arc<dyn ChainDeriver>) {
        self.derivers.insert(deriver.chain_id(), deriver);
    }

    pub fn get(&self, chain: &str) -> Result<&Arc<dyn ChainDeriver>, VaultError> {
        self.derivers
            .get(chain)
            .ok_or_else(|| VaultError::UnsupportedChain(chain.to_string()))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.derivers.keys().copied()
    }

    /// Fan a seed out to every registered chain. Fully deterministic.
    pub fn derive_all(
        &self,
        seed: &[u8],
    ) -> Result<BTreeMap<String, DerivedKeyMaterial>, VaultError> {
        let mut out = BTreeMap::new();
        for deriver in self.derivers.values() {
            let material = deriver.derive(seed)?;
            out.insert(material.chain.clone(), material);
        }
        Ok(out)
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::with_default_chains()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SLIP-0010 test vector 1 (Ed25519), seed 000102030405060708090a0b0c0d0e0f
    const SLIP10_SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn test_slip10_master_vector() {
        let seed = hex::decode(SLIP10_SEED).unwrap();
        let node = Slip10Ed25519::from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(node.key.as_slice()),
            "2b4be7f19ee27bbf30c667b642d5f4aa69fd169872f8fc3059c08ebae2eb19e7"
        );
        assert_eq!(
            hex::encode(node.chain_code),
            "90046a93de5380a72b5e45010748567d5ea02bbf6522f979e05c0d8d8ca9fffb"
        );
    }

    #[test]
    fn test_slip10_child_vector() {
        let seed = hex::decode(SLIP10_SEED).unwrap();
        let node = Slip10Ed25519::derive_path(&seed, &[HARDENED]).unwrap();
        assert_eq!(
            hex::encode(node.key.as_slice()),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    #[test]
    fn test_slip10_master_public_key_vector() {
        let seed = hex::decode(SLIP10_SEED).unwrap();
        let node = Slip10Ed25519::from_seed(&seed).unwrap();
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&node.key);
        assert_eq!(
            hex::encode(signing_key.verifying_key().to_bytes()),
            "a4b2856bfec510abab89753fac1ac0e1112364e7d250545963f135f2a33188ed"
        );
    }

    #[test]
    fn test_slip10_rejects_non_hardened() {
        let seed = hex::decode(SLIP10_SEED).unwrap();
        let node = Slip10Ed25519::from_seed(&seed).unwrap();
        assert!(node.derive_child(0).is_err());
    }

    #[test]
    fn test_ethereum_derivation_is_deterministic() {
        let seed = [0x11u8; 64];
        let a = EthereumDeriver.derive(&seed).unwrap();
        let b = EthereumDeriver.derive(&seed).unwrap();
        assert_eq!(a.public_identifier, b.public_identifier);
        assert_eq!(a.private_key.as_slice(), b.private_key.as_slice());
        assert_eq!(a.derivation_path, "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_ethereum_address_shape() {
        let seed = [0x22u8; 64];
        let material = EthereumDeriver.derive(&seed).unwrap();
        assert!(material.public_identifier.starts_with("0x"));
        assert_eq!(material.public_identifier.len(), 42);
    }

    #[test]
    fn test_ethereum_public_from_private_matches_derive() {
        let seed = [0x33u8; 64];
        let material = EthereumDeriver.derive(&seed).unwrap();
        let address = EthereumDeriver.public_from_private(&material.private_key).unwrap();
        assert_eq!(address, material.public_identifier);
    }

    #[test]
    fn test_solana_derivation_is_deterministic() {
        let seed = [0x44u8; 64];
        let a = SolanaDeriver.derive(&seed).unwrap();
        let b = SolanaDeriver.derive(&seed).unwrap();
        assert_eq!(a.public_identifier, b.public_identifier);
        assert_eq!(a.derivation_path, "m/44'/501'/0'/0'");
        let decoded = bs58::decode(&a.public_identifier).into_vec().unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_solana_public_from_private_matches_derive() {
        let seed = [0x55u8; 64];
        let material = SolanaDeriver.derive(&seed).unwrap();
        let public = SolanaDeriver.public_from_private(&material.private_key).unwrap();
        assert_eq!(public, material.public_identifier);
    }

    #[test]
    fn test_chains_produce_independent_keys() {
        let seed = [0x66u8; 64];
        let eth = EthereumDeriver.derive(&seed).unwrap();
        let sol = SolanaDeriver.derive(&seed).unwrap();
        assert_ne!(eth.private_key.as_slice(), sol.private_key.as_slice());
    }

    #[test]
    fn test_registry_fan_out() {
        let registry = ChainRegistry::with_default_chains();
        let seed = [0x77u8; 64];
        let keys = registry.derive_all(&seed).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains_key("ethereum"));
        assert!(keys.contains_key("solana"));
    }

    #[test]
    fn test_registry_unknown_chain() {
        let registry = ChainRegistry::with_default_chains();
        assert!(matches!(registry.get("dogecoin"), Err(VaultError::UnsupportedChain(_))));
    }

    #[test]
    fn test_public_from_private_rejects_malformed() {
        assert!(EthereumDeriver.public_from_private(&[0u8; 31]).is_err());
        assert!(SolanaDeriver.public_from_private(&[0u8; 31]).is_err());
    }
}
