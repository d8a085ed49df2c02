//! Secure containers for raw key material.
//!
//! [`KeyBytes`] makes destruction an explicit, observable operation: once
//! [`KeyBytes::destroy`] runs, the owned buffer and every buffer the
//! container handed out are zero-filled and all further access fails.

use crate::error::{ContentError, ContentResult};
use parking_lot::{Mutex, MutexGuard};
use rand::RngCore;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// A lock-protected byte buffer holding secret material.
///
/// Handles are cheap to clone and share the same storage, so zeroing the
/// buffer through one handle is visible through all of them. The storage is
/// wiped when the last handle is dropped.
#[derive(Clone)]
pub struct SecretBuffer {
    bytes: Arc<Mutex<Zeroizing<Vec<u8>>>>,
}

impl SecretBuffer {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(Zeroizing::new(bytes))),
        }
    }

    /// Locks the buffer for reading or in-place mutation.
    ///
    /// # Deadlocks
    ///
    /// The lock is not reentrant. Drop the guard before destroying the
    /// [`KeyBytes`] this buffer came from, since destruction locks it to
    /// zero-fill it.
    pub fn lock(&self) -> SecretGuard<'_> {
        SecretGuard {
            guard: self.bytes.lock(),
        }
    }

    /// Length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if every byte is zero.
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.bytes.lock().iter().all(|b| *b == 0)
    }

    /// Zero-fills the buffer, keeping its length.
    fn wipe(&self) {
        self.bytes.lock().as_mut_slice().zeroize();
    }

    /// Returns true if a handle other than this one is still alive.
    fn is_shared(&self) -> bool {
        Arc::strong_count(&self.bytes) > 1
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Exclusive access to the contents of a [`SecretBuffer`].
pub struct SecretGuard<'a> {
    guard: MutexGuard<'a, Zeroizing<Vec<u8>>>,
}

impl Deref for SecretGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

impl DerefMut for SecretGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.as_mut_slice()
    }
}

enum KeyState {
    Live {
        owned: SecretBuffer,
        /// Snapshots handed out by `get_bytes_copy`.
        issued: Vec<SecretBuffer>,
    },
    Destroyed,
}

/// Raw key material with explicit ownership and zero-on-destroy semantics.
///
/// A `KeyBytes` is either live or destroyed. Destroying it zero-fills the
/// owned buffer and every buffer obtained through [`get_bytes`](Self::get_bytes)
/// or [`get_bytes_copy`](Self::get_bytes_copy). Clones are fully independent
/// and survive the destruction of their source.
///
/// Dropping a live `KeyBytes` destroys it.
pub struct KeyBytes {
    state: Mutex<KeyState>,
}

impl KeyBytes {
    /// Takes exclusive ownership of `buffer`.
    #[must_use]
    pub fn adopt(buffer: Vec<u8>) -> Self {
        Self::live(SecretBuffer::new(buffer))
    }

    /// Copies `bytes` into a new, independently owned buffer.
    #[must_use]
    pub fn copy(bytes: &[u8]) -> Self {
        Self::live(SecretBuffer::new(bytes.to_vec()))
    }

    /// Generates `len` random bytes from the OS RNG.
    #[must_use]
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::adopt(bytes)
    }

    fn live(owned: SecretBuffer) -> Self {
        Self {
            state: Mutex::new(KeyState::Live {
                owned,
                issued: Vec::new(),
            }),
        }
    }

    /// Returns a handle to the owned buffer.
    ///
    /// Mutations made through the handle are visible to later accesses.
    /// Guards from [`SecretBuffer::lock`] must be dropped before
    /// [`destroy`](Self::destroy) runs.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::KeyDestroyed`] after [`destroy`](Self::destroy).
    pub fn get_bytes(&self) -> ContentResult<SecretBuffer> {
        match &*self.state.lock() {
            KeyState::Live { owned, .. } => Ok(owned.clone()),
            KeyState::Destroyed => Err(ContentError::KeyDestroyed),
        }
    }

    /// Returns an independent snapshot of the current bytes.
    ///
    /// The snapshot is tracked and will be zero-filled when this key is
    /// destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::KeyDestroyed`] after [`destroy`](Self::destroy).
    pub fn get_bytes_copy(&self) -> ContentResult<SecretBuffer> {
        match &mut *self.state.lock() {
            KeyState::Live { owned, issued } => {
                // Snapshots nobody holds any more are wiped on drop.
                issued.retain(SecretBuffer::is_shared);
                let snapshot = SecretBuffer::new(owned.lock().to_vec());
                issued.push(snapshot.clone());
                Ok(snapshot)
            }
            KeyState::Destroyed => Err(ContentError::KeyDestroyed),
        }
    }

    /// Runs `f` over the current bytes without handing out a buffer.
    ///
    /// `f` sees a private copy and runs with no lock held, so it may call
    /// back into this key, including [`destroy`](Self::destroy). The copy is
    /// wiped when `f` returns.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::KeyDestroyed`] after [`destroy`](Self::destroy).
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> ContentResult<R> {
        let snapshot = match &*self.state.lock() {
            KeyState::Live { owned, .. } => Zeroizing::new(owned.lock().to_vec()),
            KeyState::Destroyed => return Err(ContentError::KeyDestroyed),
        };
        Ok(f(&snapshot))
    }

    /// Length of the key material in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::KeyDestroyed`] after [`destroy`](Self::destroy).
    pub fn key_len(&self) -> ContentResult<usize> {
        self.with_bytes(<[u8]>::len)
    }

    /// Zero-fills the owned buffer and every buffer handed out.
    ///
    /// Idempotent.
    ///
    /// # Deadlocks
    ///
    /// Blocks until every [`SecretGuard`] on those buffers is dropped, so
    /// calling it while the same thread holds one never returns.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), KeyState::Destroyed);
        if let KeyState::Live { owned, issued } = previous {
            owned.wipe();
            for buffer in &issued {
                buffer.wipe();
            }
        }
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(*self.state.lock(), KeyState::Destroyed)
    }
}

impl Clone for KeyBytes {
    /// Creates an independent key with its own copy of the bytes.
    ///
    /// Cloning a destroyed key yields a destroyed key.
    fn clone(&self) -> Self {
        match &*self.state.lock() {
            KeyState::Live { owned, .. } => Self::copy(&owned.lock()),
            KeyState::Destroyed => Self {
                state: Mutex::new(KeyState::Destroyed),
            },
        }
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBytes")
            .field("bytes", &"[REDACTED]")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
