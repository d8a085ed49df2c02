//! Wrapping keys (KEKs) and the key ring that tracks them.
//!
//! ## Security Model
//!
//! - DEKs are wrapped with AES-256-GCM under a 256-bit wrapping key
//! - Wrapped format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - The wrapping key id is authenticated as associated data, so a wrapped
//!   DEK cannot be replayed under a different id
//! - Wrapping key material lives in [`KeyBytes`] and is wiped on drop

use crate::error::{ContentError, ContentResult, UnwrapReason};
use crate::keys::{KeyBytes, WrappingKeyId};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Size of a wrapping key in bytes.
pub const WRAPPING_KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const WRAP_NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const WRAP_TAG_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"blobseal-wrapping-key-v1";

/// A key-encryption key used only to wrap and unwrap DEKs.
pub struct WrappingKey {
    id: WrappingKeyId,
    material: KeyBytes,
}

impl WrappingKey {
    /// Generates a new random wrapping key.
    #[must_use]
    pub fn generate(id: WrappingKeyId) -> Self {
        Self {
            id,
            material: KeyBytes::generate(WRAPPING_KEY_SIZE),
        }
    }

    /// Creates a wrapping key from existing material.
    ///
    /// # Errors
    ///
    /// Returns an error if the material is destroyed or not exactly
    /// [`WRAPPING_KEY_SIZE`] bytes.
    pub fn from_key_bytes(id: WrappingKeyId, material: KeyBytes) -> ContentResult<Self> {
        let len = material.key_len()?;
        if len != WRAPPING_KEY_SIZE {
            return Err(ContentError::config(format!(
                "invalid wrapping key size: expected {WRAPPING_KEY_SIZE}, got {len}"
            )));
        }
        Ok(Self { id, material })
    }

    /// Derives a wrapping key from high-entropy secret material using
    /// HKDF-SHA256. The key id is mixed into the derivation, so one secret
    /// yields distinct keys per id.
    ///
    /// # Security Note
    ///
    /// HKDF is not a password hash. Only feed it secrets that already have
    /// high entropy.
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn derive(id: WrappingKeyId, secret: &[u8], salt: &[u8]) -> ContentResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut bytes = vec![0u8; WRAPPING_KEY_SIZE];
        hk.expand_multi_info(&[HKDF_INFO, id.as_bytes()], &mut bytes)
            .map_err(|_| ContentError::encryption("HKDF expand failed"))?;

        Ok(Self {
            id,
            material: KeyBytes::adopt(bytes),
        })
    }

    /// The id of this key.
    #[must_use]
    pub fn id(&self) -> &WrappingKeyId {
        &self.id
    }

    fn cipher(&self) -> ContentResult<Aes256Gcm> {
        self.material
            .with_bytes(Aes256Gcm::new_from_slice)?
            .map_err(|_| ContentError::config("invalid wrapping key length"))
    }

    /// Wraps a DEK under this key.
    ///
    /// # Errors
    ///
    /// Returns an error if either key has been destroyed or encryption fails.
    pub fn wrap(&self, dek: &KeyBytes) -> ContentResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; WRAP_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = dek.with_bytes(|msg| {
            cipher.encrypt(
                nonce,
                Payload {
                    msg,
                    aad: self.id.as_bytes(),
                },
            )
        })?;
        let ciphertext =
            ciphertext.map_err(|_| ContentError::encryption("key wrap failed"))?;

        let mut wrapped = Vec::with_capacity(WRAP_NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend(ciphertext);
        Ok(wrapped)
    }

    /// Unwraps a DEK previously produced by [`wrap`](Self::wrap).
    ///
    /// # Errors
    ///
    /// Returns the reason the unwrap failed.
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<KeyBytes, UnwrapReason> {
        if wrapped.len() < WRAP_NONCE_SIZE + WRAP_TAG_SIZE {
            return Err(UnwrapReason::Rejected);
        }
        let cipher = self.cipher().map_err(|_| UnwrapReason::KeyUnavailable)?;

        let nonce = Nonce::from_slice(&wrapped[..WRAP_NONCE_SIZE]);
        let payload = Payload {
            msg: &wrapped[WRAP_NONCE_SIZE..],
            aad: self.id.as_bytes(),
        };
        cipher
            .decrypt(nonce, payload)
            .map(KeyBytes::adopt)
            .map_err(|_| UnwrapReason::Rejected)
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappingKey")
            .field("id", &self.id)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

#[derive(Default)]
struct RingState {
    keys: BTreeMap<WrappingKeyId, Arc<WrappingKey>>,
    active: Option<WrappingKeyId>,
}

/// The set of known wrapping keys and the one that is active.
///
/// Any known key may unwrap; only the active key wraps new DEKs. Rotation
/// adds a key and activates it; retiring a key is a separate step.
///
/// # Thread Safety
///
/// Keys are handed out as `Arc`s, so an unwrap in flight keeps working even
/// if its key is retired concurrently.
#[derive(Default)]
pub struct WrappingKeyRing {
    state: RwLock<RingState>,
}

impl WrappingKeyRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ring holding `key` as the active key.
    #[must_use]
    pub fn with_active(key: WrappingKey) -> Self {
        let id = key.id().clone();
        let mut keys = BTreeMap::new();
        keys.insert(id.clone(), Arc::new(key));
        Self {
            state: RwLock::new(RingState {
                keys,
                active: Some(id),
            }),
        }
    }

    /// Adds a key that may unwrap but is not active.
    ///
    /// # Errors
    ///
    /// Returns an error if a key with the same id is already known.
    pub fn insert(&self, key: WrappingKey) -> ContentResult<()> {
        let mut state = self.state.write();
        if state.keys.contains_key(key.id()) {
            return Err(ContentError::invalid_operation(format!(
                "wrapping key {} is already known",
                key.id()
            )));
        }
        info!(key_id = %key.id(), "added wrapping key");
        state.keys.insert(key.id().clone(), Arc::new(key));
        Ok(())
    }

    /// Adds `key` and makes it the active key. The previous active key
    /// stays known.
    ///
    /// # Errors
    ///
    /// Returns an error if a key with the same id is already known.
    pub fn rotate_to(&self, key: WrappingKey) -> ContentResult<()> {
        let mut state = self.state.write();
        let id = key.id().clone();
        if state.keys.contains_key(&id) {
            return Err(ContentError::invalid_operation(format!(
                "wrapping key {id} is already known"
            )));
        }
        info!(
            key_id = %id,
            previous = ?state.active.as_ref().map(WrappingKeyId::as_str),
            "rotated active wrapping key"
        );
        state.keys.insert(id.clone(), Arc::new(key));
        state.active = Some(id);
        Ok(())
    }

    /// Makes an already known key active.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown.
    pub fn activate(&self, id: &WrappingKeyId) -> ContentResult<()> {
        let mut state = self.state.write();
        if !state.keys.contains_key(id) {
            return Err(ContentError::invalid_operation(format!(
                "cannot activate unknown wrapping key {id}"
            )));
        }
        info!(key_id = %id, "activated wrapping key");
        state.active = Some(id.clone());
        Ok(())
    }

    /// Forgets a key. Records wrapped only under it become unreadable.
    ///
    /// Returns `false` if the key was not known.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is the active key.
    pub fn retire(&self, id: &WrappingKeyId) -> ContentResult<bool> {
        let mut state = self.state.write();
        if state.active.as_ref() == Some(id) {
            return Err(ContentError::invalid_operation(format!(
                "cannot retire active wrapping key {id}"
            )));
        }
        let removed = state.keys.remove(id).is_some();
        if removed {
            info!(key_id = %id, "retired wrapping key");
        }
        Ok(removed)
    }

    /// Id of the active key, if any.
    #[must_use]
    pub fn active_id(&self) -> Option<WrappingKeyId> {
        self.state.read().active.clone()
    }

    /// The active key.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is active.
    pub fn active(&self) -> ContentResult<Arc<WrappingKey>> {
        let state = self.state.read();
        state
            .active
            .as_ref()
            .and_then(|id| state.keys.get(id))
            .cloned()
            .ok_or_else(|| ContentError::invalid_operation("no active wrapping key"))
    }

    /// Looks up a known key.
    #[must_use]
    pub fn get(&self, id: &WrappingKeyId) -> Option<Arc<WrappingKey>> {
        self.state.read().keys.get(id).cloned()
    }

    /// Returns true if the key is known.
    #[must_use]
    pub fn contains(&self, id: &WrappingKeyId) -> bool {
        self.state.read().keys.contains_key(id)
    }

    /// Ids of all known keys, in id order.
    #[must_use]
    pub fn known_ids(&self) -> Vec<WrappingKeyId> {
        self.state.read().keys.keys().cloned().collect()
    }
}

impl fmt::Debug for WrappingKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("WrappingKeyRing")
            .field("known", &state.keys.keys().collect::<Vec<_>>())
            .field("active", &state.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> WrappingKeyId {
        WrappingKeyId::new(name).unwrap()
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = WrappingKey::generate(id("k1"));
        let dek = KeyBytes::copy(&[0x42; 32]);

        let wrapped = kek.wrap(&dek).unwrap();
        assert_eq!(wrapped.len(), WRAP_NONCE_SIZE + 32 + WRAP_TAG_SIZE);

        let unwrapped = kek.unwrap(&wrapped).unwrap();
        assert_eq!(&*unwrapped.get_bytes().unwrap().lock(), &[0x42; 32]);
    }

    #[test]
    fn wrap_produces_different_ciphertext() {
        let kek = WrappingKey::generate(id("k1"));
        let dek = KeyBytes::generate(32);
        assert_ne!(kek.wrap(&dek).unwrap(), kek.wrap(&dek).unwrap());
    }

    #[test]
    fn unwrap_with_wrong_key_is_rejected() {
        let k1 = WrappingKey::generate(id("k1"));
        let k2 = WrappingKey::generate(id("k2"));
        let wrapped = k1.wrap(&KeyBytes::generate(32)).unwrap();
        assert_eq!(k2.unwrap(&wrapped).unwrap_err(), UnwrapReason::Rejected);
    }

    #[test]
    fn key_id_is_authenticated() {
        let material = [9u8; WRAPPING_KEY_SIZE];
        let a = WrappingKey::from_key_bytes(id("a"), KeyBytes::copy(&material)).unwrap();
        let b = WrappingKey::from_key_bytes(id("b"), KeyBytes::copy(&material)).unwrap();
        let wrapped = a.wrap(&KeyBytes::generate(32)).unwrap();
        assert!(b.unwrap(&wrapped).is_err());
    }

    #[test]
    fn truncated_wrapped_key_is_rejected() {
        let kek = WrappingKey::generate(id("k1"));
        assert_eq!(kek.unwrap(&[0u8; 10]).unwrap_err(), UnwrapReason::Rejected);
    }

    #[test]
    fn from_key_bytes_checks_size() {
        assert!(WrappingKey::from_key_bytes(id("k"), KeyBytes::copy(&[0u8; 16])).is_err());
    }

    #[test]
    fn derive_is_deterministic_per_id() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let a1 = WrappingKey::derive(id("a"), secret, b"salt").unwrap();
        let a2 = WrappingKey::derive(id("a"), secret, b"salt").unwrap();
        let b = WrappingKey::derive(id("b"), secret, b"salt").unwrap();

        let wrapped = a1.wrap(&KeyBytes::generate(32)).unwrap();
        assert!(a2.unwrap(&wrapped).is_ok());
        assert_ne!(
            a1.material.get_bytes_copy().unwrap().lock().to_vec(),
            b.material.get_bytes_copy().unwrap().lock().to_vec()
        );
    }

    #[test]
    fn ring_rotation_keeps_old_keys() {
        let ring = WrappingKeyRing::with_active(WrappingKey::generate(id("k1")));
        ring.rotate_to(WrappingKey::generate(id("k2"))).unwrap();

        assert_eq!(ring.active_id(), Some(id("k2")));
        assert!(ring.contains(&id("k1")));
        assert_eq!(ring.known_ids(), vec![id("k1"), id("k2")]);
    }

    #[test]
    fn ring_refuses_to_retire_active() {
        let ring = WrappingKeyRing::with_active(WrappingKey::generate(id("k1")));
        assert!(ring.retire(&id("k1")).is_err());
    }

    #[test]
    fn ring_retire_and_reactivate() {
        let ring = WrappingKeyRing::with_active(WrappingKey::generate(id("k1")));
        ring.insert(WrappingKey::generate(id("k2"))).unwrap();
        ring.activate(&id("k2")).unwrap();

        assert!(ring.retire(&id("k1")).unwrap());
        assert!(!ring.retire(&id("k1")).unwrap());
        assert!(ring.activate(&id("k1")).is_err());
    }

    #[test]
    fn ring_rejects_duplicate_ids() {
        let ring = WrappingKeyRing::with_active(WrappingKey::generate(id("k1")));
        assert!(ring.insert(WrappingKey::generate(id("k1"))).is_err());
        assert!(ring.rotate_to(WrappingKey::generate(id("k1"))).is_err());
    }

    #[test]
    fn retired_key_stays_usable_by_holders() {
        let ring = WrappingKeyRing::with_active(WrappingKey::generate(id("k1")));
        ring.insert(WrappingKey::generate(id("old"))).unwrap();
        let held = ring.get(&id("old")).unwrap();
        let wrapped = held.wrap(&KeyBytes::generate(32)).unwrap();

        ring.retire(&id("old")).unwrap();
        assert!(held.unwrap(&wrapped).is_ok());
        assert!(ring.get(&id("old")).is_none());
    }

    #[test]
    fn empty_ring_has_no_active_key() {
        let ring = WrappingKeyRing::new();
        assert!(ring.active().is_err());
        assert!(ring.active_id().is_none());
    }
}
