//! Master key registry.
//!
//! Resolves the currently active envelope-encryption key and keeps retired
//! keys resolvable forever: the key id travels with each envelope, so
//! rotation never orphans old ciphertexts. The registry is an injected
//! resolver object, not a process-wide singleton; only the external rotation
//! job mutates which key is active, and readers tolerate briefly encrypting
//! under a stale active key.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::core::errors::VaultError;
use crate::crypto::envelope::KeyResolver;

/// Env var naming, mirroring the deployment convention:
/// `CUSTODY_MASTER_KEY` is the base64(32) material for key id "primary",
/// `CUSTODY_MASTER_KEY_<ID>` for any other id, and `CUSTODY_ACTIVE_KEY_ID`
/// selects which id encrypts new envelopes.
const ENV_KEY_PREFIX: &str = "CUSTODY_MASTER_KEY";
const ENV_ACTIVE_ID: &str = "CUSTODY_ACTIVE_KEY_ID";
const ENV_ROTATION_CADENCE: &str = "CUSTODY_ROTATION_CADENCE";
const DEFAULT_KEY_ID: &str = "primary";

/// One master key known to the registry.
#[derive(Clone)]
pub struct MasterKeyRecord {
    pub key_id: String,
    pub material: Zeroizing<Vec<u8>>,
    pub created: DateTime<Utc>,
}

impl std::fmt::Debug for MasterKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never hits logs.
        f.debug_struct("MasterKeyRecord")
            .field("key_id", &self.key_id)
            .field("created", &self.created)
            .finish()
    }
}

/// The key used for new envelopes.
#[derive(Clone)]
pub struct ActiveKeyInfo {
    pub key_id: String,
    pub material: Zeroizing<Vec<u8>>,
    pub created: DateTime<Utc>,
}

/// Rotation cadence metadata consumed by the external rotation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationCadence {
    Daily,
    Weekly,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationSchedule {
    pub cadence: RotationCadence,
    pub active_key_created: DateTime<Utc>,
    pub next_due: DateTime<Utc>,
}

/// A full key set description as read from a secure configuration source.
#[derive(Clone)]
pub struct KeySet {
    pub active_id: String,
    pub keys: Vec<MasterKeyRecord>,
    pub cadence: RotationCadence,
}

/// Read-only secure configuration collaborator.
pub trait MasterKeySource: Send + Sync {
    fn load(&self) -> Result<KeySet, VaultError>;
}

/// Environment-backed key source.
#[derive(Debug, Default)]
pub struct EnvKeySource;

impl EnvKeySource {
    fn decode_material(var: &str, b64: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|_| VaultError::Configuration(format!("{} must be base64", var)))?;
        if raw.len() != 32 {
            return Err(VaultError::Configuration(format!("{} must decode to 32 bytes", var)));
        }
        Ok(Zeroizing::new(raw))
    }
}

impl MasterKeySource for EnvKeySource {
    fn load(&self) -> Result<KeySet, VaultError> {
        let now = Utc::now();
        let mut keys = Vec::new();
        for (name, value) in std::env::vars() {
            if name == ENV_KEY_PREFIX {
                keys.push(MasterKeyRecord {
                    key_id: DEFAULT_KEY_ID.to_string(),
                    material: Self::decode_material(&name, &value)?,
                    created: now,
                });
            } else if let Some(id) = name.strip_prefix(&format!("{}_", ENV_KEY_PREFIX)) {
                keys.push(MasterKeyRecord {
                    key_id: id.to_string(),
                    material: Self::decode_material(&name, &value)?,
                    created: now,
                });
            }
        }
        if keys.is_empty() {
            return Err(VaultError::Configuration(format!("{} is not set", ENV_KEY_PREFIX)));
        }

        let active_id =
            std::env::var(ENV_ACTIVE_ID).unwrap_or_else(|_| DEFAULT_KEY_ID.to_string());
        if !keys.iter().any(|k| k.key_id == active_id) {
            return Err(VaultError::Configuration(format!(
                "Active key id '{}' has no key material",
                active_id
            )));
        }

        let cadence = match std::env::var(ENV_ROTATION_CADENCE).ok().as_deref() {
            Some("daily") => RotationCadence::Daily,
            Some("emergency") => RotationCadence::Emergency,
            _ => RotationCadence::Weekly,
        };

        Ok(KeySet { active_id, keys, cadence })
    }
}

/// In-memory key source for tests and embedded callers. Supports swapping
/// the active id to exercise rotation without process restarts.
pub struct StaticKeySource {
    inner: RwLock<KeySet>,
}

impl StaticKeySource {
    pub fn new(active_id: &str, keys: Vec<(String, [u8; 32])>) -> Self {
        let now = Utc::now();
        let keys = keys
            .into_iter()
            .map(|(key_id, material)| MasterKeyRecord {
                key_id,
                material: Zeroizing::new(material.to_vec()),
                created: now,
            })
            .collect();
        Self {
            inner: RwLock::new(KeySet {
                active_id: active_id.to_string(),
                keys,
                cadence: RotationCadence::Weekly,
            }),
        }
    }

    /// Rotation job entry point: add (or re-add) a key and make it active.
    pub fn rotate_to(&self, key_id: &str, material: [u8; 32]) {
        let mut set = self.inner.write();
        set.keys.retain(|k| k.key_id != key_id);
        set.keys.push(MasterKeyRecord {
            key_id: key_id.to_string(),
            material: Zeroizing::new(material.to_vec()),
            created: Utc::now(),
        });
        set.active_id = key_id.to_string();
    }
}

impl MasterKeySource for StaticKeySource {
    fn load(&self) -> Result<KeySet, VaultError> {
        Ok(self.inner.read().clone())
    }
}

/// Resolves the active envelope key and rotation metadata; also serves as
/// the [`KeyResolver`] for decryption, covering retired key ids.
pub struct MasterKeyRegistry {
    source: Arc<dyn MasterKeySource>,
    cached: RwLock<Option<KeySet>>,
}

impl MasterKeyRegistry {
    pub fn new(source: Arc<dyn MasterKeySource>) -> Self {
        Self { source, cached: RwLock::new(None) }
    }

    pub fn from_env() -> Self {
        Self::new(Arc::new(EnvKeySource))
    }

    /// Read the key set from the source, replacing the process cache.
    /// Failure here is fatal for encrypting callers.
    pub fn load(&self) -> Result<ActiveKeyInfo, VaultError> {
        let set = self.source.load()?;
        let active = Self::active_from(&set)?;
        debug!(key_id = %active.key_id, keys = set.keys.len(), "master key set loaded");
        *self.cached.write() = Some(set);
        Ok(active)
    }

    /// Process-cached active key; loads on first use.
    pub fn active_key(&self) -> Result<ActiveKeyInfo, VaultError> {
        if let Some(set) = self.cached.read().as_ref() {
            return Self::active_from(set);
        }
        self.load()
    }

    /// Re-read the source, picking up keys rotated in by the external job.
    pub fn refresh(&self) -> Result<(), VaultError> {
        self.load().map(|_| ())
    }

    /// Rotation metadata for the external rotation job.
    pub fn rotation_schedule(&self) -> Result<RotationSchedule, VaultError> {
        let active = self.active_key()?;
        let cadence = self
            .cached
            .read()
            .as_ref()
            .map(|s| s.cadence)
            .unwrap_or(RotationCadence::Weekly);
        let next_due = match cadence {
            RotationCadence::Daily => active.created + Duration::days(1),
            RotationCadence::Weekly => active.created + Duration::weeks(1),
            RotationCadence::Emergency => Utc::now(),
        };
        Ok(RotationSchedule { cadence, active_key_created: active.created, next_due })
    }

    fn active_from(set: &KeySet) -> Result<ActiveKeyInfo, VaultError> {
        set.keys
            .iter()
            .find(|k| k.key_id == set.active_id)
            .map(|k| ActiveKeyInfo {
                key_id: k.key_id.clone(),
                material: k.material.clone(),
                created: k.created,
            })
            .ok_or_else(|| {
                VaultError::Configuration(format!("No key material for active id '{}'", set.active_id))
            })
    }

    fn lookup(&self, key_id: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.cached
            .read()
            .as_ref()
            .and_then(|set| set.keys.iter().find(|k| k.key_id == key_id))
            .map(|k| k.material.clone())
    }
}

impl KeyResolver for MasterKeyRegistry {
    fn resolve_key(&self, key_id: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if let Some(material) = self.lookup(key_id) {
            return Ok(material);
        }
        // The set may have rotated since the cache was filled; retry once
        // against the source before declaring the id unknown.
        if let Err(e) = self.refresh() {
            warn!(key_id = %key_id, error = %e, "key source re-read failed during resolve");
        }
        self.lookup(key_id)
            .ok_or_else(|| VaultError::Decryption(format!("Unknown key id: {}", key_id)))
    }
}

/// Helper map used by tests and simple embedders: a resolver over a fixed
/// set of keys with no notion of "active".
pub struct StaticResolver {
    keys: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl StaticResolver {
    pub fn new(keys: Vec<(String, [u8; 32])>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(id, material)| (id, Zeroizing::new(material.to_vec())))
                .collect(),
        }
    }
}

impl KeyResolver for StaticResolver {
    fn resolve_key(&self, key_id: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| VaultError::Decryption(format!("Unknown key id: {}", key_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_active_key_from_static_source() {
        let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source);
        let active = registry.active_key().unwrap();
        assert_eq!(active.key_id, "k1");
        assert_eq!(active.material.len(), 32);
    }

    #[test]
    fn test_missing_active_material_is_configuration_error() {
        let source = Arc::new(StaticKeySource::new("k9", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source);
        assert!(matches!(registry.active_key(), Err(VaultError::Configuration(_))));
    }

    #[test]
    fn test_retired_key_still_resolves_after_rotation() {
        let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source.clone());
        registry.active_key().unwrap();

        source.rotate_to("k2", [2u8; 32]);
        registry.refresh().unwrap();
        assert_eq!(registry.active_key().unwrap().key_id, "k2");

        // k1 is retired but must remain resolvable
        let material = registry.resolve_key("k1").unwrap();
        assert_eq!(material.as_slice(), &[1u8; 32]);
    }

    #[test]
    fn test_resolve_refreshes_on_cache_miss() {
        let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source.clone());
        registry.active_key().unwrap();

        // Rotation happens behind the registry's back; resolve must still find
        // the new id via a source re-read.
        source.rotate_to("k2", [2u8; 32]);
        assert_eq!(registry.resolve_key("k2").unwrap().as_slice(), &[2u8; 32]);
    }

    #[test]
    fn test_unknown_id_is_decryption_error() {
        let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source);
        assert!(matches!(registry.resolve_key("ghost"), Err(VaultError::Decryption(_))));
    }

    #[test]
    fn test_rotation_schedule_next_due() {
        let source = Arc::new(StaticKeySource::new("k1", vec![("k1".to_string(), [1u8; 32])]));
        let registry = MasterKeyRegistry::new(source);
        let schedule = registry.rotation_schedule().unwrap();
        assert_eq!(schedule.cadence, RotationCadence::Weekly);
        assert!(schedule.next_due > schedule.active_key_created);
    }

    #[test]
    #[serial]
    fn test_env_source_loads_and_selects_active() {
        let b64 = base64::engine::general_purpose::STANDARD.encode([3u8; 32]);
        std::env::set_var("CUSTODY_MASTER_KEY", &b64);
        let b64_blue = base64::engine::general_purpose::STANDARD.encode([4u8; 32]);
        std::env::set_var("CUSTODY_MASTER_KEY_BLUE", &b64_blue);
        std::env::set_var("CUSTODY_ACTIVE_KEY_ID", "BLUE");

        let registry = MasterKeyRegistry::from_env();
        let active = registry.load().unwrap();
        assert_eq!(active.key_id, "BLUE");
        assert_eq!(registry.resolve_key("primary").unwrap().as_slice(), &[3u8; 32]);

        std::env::remove_var("CUSTODY_MASTER_KEY");
        std::env::remove_var("CUSTODY_MASTER_KEY_BLUE");
        std::env::remove_var("CUSTODY_ACTIVE_KEY_ID");
    }

    #[test]
    #[serial]
    fn test_env_source_rejects_bad_material() {
        std::env::set_var("CUSTODY_MASTER_KEY", "too-short");
        let registry = MasterKeyRegistry::from_env();
        assert!(matches!(registry.load(), Err(VaultError::Configuration(_))));
        std::env::remove_var("CUSTODY_MASTER_KEY");
    }

    #[test]
    #[serial]
    fn test_env_source_missing_is_configuration_error() {
        std::env::remove_var("CUSTODY_MASTER_KEY");
        let registry = MasterKeyRegistry::from_env();
        assert!(matches!(registry.load(), Err(VaultError::Configuration(_))));
    }
}
