//! Envelope decryption across master key rotation.
//!
//! Envelopes carry the id of the key that sealed them, so data written
//! before a rotation stays readable as long as the retired key is still in
//! the key set.

use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use custody_core::crypto::envelope::{self, KeyResolver};
use custody_core::crypto::master_key::{MasterKeyRegistry, StaticKeySource, StaticResolver};
use custody_core::VaultError;

const KEY_1: [u8; 32] = [0x11; 32];
const KEY_2: [u8; 32] = [0x22; 32];

#[test]
fn test_old_envelope_decrypts_after_rotation() {
    let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), KEY_1)]));
    let registry = MasterKeyRegistry::new(source.clone());

    let active = registry.active_key().unwrap();
    assert_eq!(active.key_id, "k1");
    let sealed_before = envelope::encrypt(b"pre-rotation secret", &active.key_id, &active.material).unwrap();

    // rotation job swaps the active key; k1 stays in the set
    source.rotate_to("k2", KEY_2);
    registry.refresh().unwrap();

    let active = registry.active_key().unwrap();
    assert_eq!(active.key_id, "k2");
    let sealed_after = envelope::encrypt(b"post-rotation secret", &active.key_id, &active.material).unwrap();
    assert_eq!(sealed_after.key_id, "k2");

    // both generations decrypt through the same registry
    let old = envelope::decrypt(&sealed_before, &registry).unwrap();
    assert_eq!(&*old, b"pre-rotation secret");
    let new = envelope::decrypt(&sealed_after, &registry).unwrap();
    assert_eq!(&*new, b"post-rotation secret");
}

#[test]
fn test_resolver_retries_source_after_external_rotation() {
    let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), KEY_1)]));
    let registry = MasterKeyRegistry::new(source.clone());
    registry.load().unwrap();

    // k2 appears in the source after the cache was filled
    source.rotate_to("k2", KEY_2);
    let sealed = envelope::encrypt(b"sealed elsewhere", "k2", &KEY_2).unwrap();

    // the stale cache misses, the registry re-reads the source once
    let plain = envelope::decrypt(&sealed, &registry).unwrap();
    assert_eq!(&*plain, b"sealed elsewhere");
}

#[test]
fn test_unknown_key_id_is_a_decryption_error() {
    let sealed = envelope::encrypt(b"secret", "retired-and-purged", &KEY_1).unwrap();
    let resolver = StaticResolver::new(vec![("k1".to_string(), KEY_1)]);
    let err = envelope::decrypt(&sealed, &resolver).unwrap_err();
    assert!(matches!(err, VaultError::Decryption(_)));
}

/// Resolver wrapper that records every key id it is asked for.
struct SpyResolver {
    inner: StaticResolver,
    requested: Mutex<Vec<String>>,
}

impl KeyResolver for SpyResolver {
    fn resolve_key(&self, key_id: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        self.requested.lock().push(key_id.to_string());
        self.inner.resolve_key(key_id)
    }
}

#[test]
fn test_decrypt_resolves_by_embedded_id_only() {
    let sealed = envelope::encrypt(b"secret", "k1", &KEY_1).unwrap();

    let spy = SpyResolver {
        inner: StaticResolver::new(vec![
            ("k1".to_string(), KEY_1),
            ("k2".to_string(), KEY_2),
        ]),
        requested: Mutex::new(Vec::new()),
    };
    envelope::decrypt(&sealed, &spy).unwrap();

    // exactly one lookup, for the id the envelope carries
    assert_eq!(*spy.requested.lock(), vec!["k1".to_string()]);
}

#[test]
fn test_wrong_key_material_fails_authentication() {
    let sealed = envelope::encrypt(b"secret", "k1", &KEY_1).unwrap();
    // same id, different material: the GCM tag must not verify
    let resolver = StaticResolver::new(vec![("k1".to_string(), KEY_2)]);
    let err = envelope::decrypt(&sealed, &resolver).unwrap_err();
    assert!(matches!(err, VaultError::Decryption(_)));
}
