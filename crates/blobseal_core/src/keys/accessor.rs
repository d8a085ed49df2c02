//! Data-encryption key lifecycle: generation, wrapping, lookup and rotation.

use crate::config::{RecordPolicy, StoreConfig};
use crate::content::ContentReference;
use crate::error::{ContentError, ContentResult, UnwrapError, UnwrapReason};
use crate::keys::{KeyBytes, WrappedDek, WrappedKeyStore, WrappingKeyId, WrappingKeyRing};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves content references to usable DEKs.
///
/// The accessor owns the durable mapping from references to wrapped DEK
/// records and knows which wrapping keys exist. DEKs it hands out are owned
/// by the caller, who must destroy them when the operation ends.
#[derive(Clone)]
pub struct DataEncryptionKeyAccessor {
    ring: Arc<WrappingKeyRing>,
    records: Arc<dyn WrappedKeyStore>,
    dek_len: usize,
    policy: RecordPolicy,
}

impl DataEncryptionKeyAccessor {
    /// Creates an accessor with the default configuration.
    pub fn new(ring: Arc<WrappingKeyRing>, records: Arc<dyn WrappedKeyStore>) -> Self {
        Self::with_config(ring, records, &StoreConfig::default())
    }

    /// Creates an accessor using the DEK length and record policy of `config`.
    pub fn with_config(
        ring: Arc<WrappingKeyRing>,
        records: Arc<dyn WrappedKeyStore>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            ring,
            records,
            dek_len: config.dek_len,
            policy: config.record_policy,
        }
    }

    /// Sets the length of generated DEKs.
    #[must_use]
    pub fn with_dek_len(mut self, dek_len: usize) -> Self {
        self.dek_len = dek_len;
        self
    }

    /// Sets the rewrap record policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The key ring used for wrapping and unwrapping.
    #[must_use]
    pub fn ring(&self) -> &Arc<WrappingKeyRing> {
        &self.ring
    }

    /// Length of generated DEKs.
    #[must_use]
    pub fn dek_len(&self) -> usize {
        self.dek_len
    }

    /// The record policy applied on rewrap.
    #[must_use]
    pub fn policy(&self) -> RecordPolicy {
        self.policy
    }

    /// Id of the active wrapping key.
    ///
    /// # Errors
    ///
    /// Returns an error if the ring has no active key.
    pub fn active_key_id(&self) -> ContentResult<WrappingKeyId> {
        self.ring
            .active_id()
            .ok_or_else(|| ContentError::invalid_operation("no active wrapping key"))
    }

    /// Generates a fresh DEK and wraps it under `key_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or wrapping fails.
    pub fn generate_and_wrap(&self, key_id: &WrappingKeyId) -> ContentResult<(KeyBytes, WrappedDek)> {
        let dek = KeyBytes::generate(self.dek_len);
        let record = self.wrap(&dek, key_id)?;
        Ok((dek, record))
    }

    /// Wraps an existing DEK under `key_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or wrapping fails.
    pub fn wrap(&self, dek: &KeyBytes, key_id: &WrappingKeyId) -> ContentResult<WrappedDek> {
        let key = self
            .ring
            .get(key_id)
            .ok_or_else(|| UnwrapError::key(key_id.clone(), UnwrapReason::UnknownKey))?;
        Ok(WrappedDek::new(key_id.clone(), key.wrap(dek)?))
    }

    /// Unwraps `record` with the key it names.
    ///
    /// # Errors
    ///
    /// Returns [`UnwrapError::Key`] tagged with the record's key id if that
    /// key is unknown, rejects the record, or yields a DEK of the wrong length.
    pub fn unwrap(&self, record: &WrappedDek) -> Result<KeyBytes, UnwrapError> {
        let key_id = record.key_id();
        let fail = |reason| UnwrapError::key(key_id.clone(), reason);

        let key = self
            .ring
            .get(key_id)
            .ok_or_else(|| fail(UnwrapReason::UnknownKey))?;
        let dek = key.unwrap(record.ciphertext()).map_err(fail)?;
        match dek.key_len() {
            Ok(len) if len == self.dek_len => Ok(dek),
            Ok(len) => Err(fail(UnwrapReason::InvalidLength {
                expected: self.dek_len,
                actual: len,
            })),
            Err(_) => Err(fail(UnwrapReason::KeyUnavailable)),
        }
    }

    /// Tries every record until one unwraps.
    ///
    /// Records wrapped under the active key are tried first, then the rest
    /// newest first.
    ///
    /// # Errors
    ///
    /// With a single candidate, returns that candidate's own failure.
    /// Otherwise returns [`UnwrapError::Aggregate`] holding every failure in
    /// attempt order.
    pub fn unwrap_any(&self, records: &[WrappedDek]) -> Result<KeyBytes, UnwrapError> {
        let mut failures = Vec::new();
        for record in self.attempt_order(records) {
            match self.unwrap(record) {
                Ok(dek) => {
                    if !failures.is_empty() {
                        debug!(
                            key_id = %record.key_id(),
                            failed = failures.len(),
                            "unwrapped data key after earlier failures"
                        );
                    }
                    return Ok(dek);
                }
                Err(e) => {
                    warn!(key_id = %record.key_id(), error = %e, "data key unwrap attempt failed");
                    failures.push(e);
                }
            }
        }

        if failures.len() == 1 {
            if let Some(only) = failures.pop() {
                return Err(only);
            }
        }
        Err(UnwrapError::Aggregate { failures })
    }

    fn attempt_order<'a>(&self, records: &'a [WrappedDek]) -> Vec<&'a WrappedDek> {
        let active = self.ring.active_id();
        let (mut ordered, rest): (Vec<_>, Vec<_>) = records
            .iter()
            .rev()
            .partition(|record| Some(record.key_id()) == active.as_ref());
        ordered.extend(rest);
        ordered
    }

    /// Records a wrapped DEK for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store fails.
    pub fn persist(&self, reference: &ContentReference, record: WrappedDek) -> ContentResult<()> {
        self.records.put(reference, record)
    }

    /// All records for `reference`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store fails.
    pub fn records_for(&self, reference: &ContentReference) -> ContentResult<Vec<WrappedDek>> {
        self.records.get(reference)
    }

    /// Loads and unwraps the DEK of `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Unreadable`] if no record exists, or
    /// [`ContentError::Unwrap`] if none of the records unwraps.
    pub fn unwrap_for(&self, reference: &ContentReference) -> ContentResult<KeyBytes> {
        let records = self.records_for(reference)?;
        if records.is_empty() {
            return Err(ContentError::unreadable(
                reference,
                "no wrapped data key recorded",
            ));
        }
        Ok(self.unwrap_any(&records)?)
    }

    /// Wraps the DEK of `reference` under the active key without touching
    /// the content. Returns `false` if a record under the active key
    /// already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the DEK cannot be unwrapped or the new record
    /// cannot be persisted.
    pub fn rewrap(&self, reference: &ContentReference) -> ContentResult<bool> {
        let active = self.ring.active()?;
        let records = self.records_for(reference)?;
        if records.is_empty() {
            return Err(ContentError::unreadable(
                reference,
                "no wrapped data key recorded",
            ));
        }
        if records.iter().any(|record| record.key_id() == active.id()) {
            return Ok(false);
        }

        let dek = self.unwrap_any(&records)?;
        let wrapped = active.wrap(&dek);
        dek.destroy();
        let record = WrappedDek::new(active.id().clone(), wrapped?);

        match self.policy {
            RecordPolicy::Accumulate => self.records.put(reference, record)?,
            RecordPolicy::Replace => self.records.replace(reference, vec![record])?,
        }
        info!(%reference, key_id = %active.id(), policy = ?self.policy, "rewrapped data key");
        Ok(true)
    }

    /// Drops the records of `reference` wrapped under `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::InvalidOperation`] if that would leave the
    /// reference without any record.
    pub fn prune(&self, reference: &ContentReference, key_id: &WrappingKeyId) -> ContentResult<bool> {
        let records = self.records_for(reference)?;
        let matching = records.iter().filter(|r| r.key_id() == key_id).count();
        if matching == 0 {
            return Ok(false);
        }
        if matching == records.len() {
            return Err(ContentError::invalid_operation(format!(
                "pruning {key_id} would leave {reference} without a data key"
            )));
        }
        self.records.prune(reference, key_id)
    }

    /// Forgets every record of `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store fails.
    pub fn forget(&self, reference: &ContentReference) -> ContentResult<bool> {
        self.records.remove(reference)
    }
}

impl fmt::Debug for DataEncryptionKeyAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEncryptionKeyAccessor")
            .field("ring", &self.ring)
            .field("dek_len", &self.dek_len)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{MemoryWrappedKeyStore, WrappingKey};

    fn id(name: &str) -> WrappingKeyId {
        WrappingKeyId::new(name).unwrap()
    }

    fn accessor(active: &str) -> DataEncryptionKeyAccessor {
        let ring = Arc::new(WrappingKeyRing::with_active(WrappingKey::generate(id(active))));
        DataEncryptionKeyAccessor::new(ring, Arc::new(MemoryWrappedKeyStore::new()))
    }

    fn bytes(key: &KeyBytes) -> Vec<u8> {
        key.get_bytes_copy().unwrap().lock().to_vec()
    }

    #[test]
    fn generate_and_wrap_roundtrip() {
        let keys = accessor("k1");
        let (dek, record) = keys.generate_and_wrap(&id("k1")).unwrap();
        assert_eq!(dek.key_len().unwrap(), 32);
        assert_eq!(record.key_id(), &id("k1"));

        let unwrapped = keys.unwrap(&record).unwrap();
        assert_eq!(bytes(&unwrapped), bytes(&dek));
    }

    #[test]
    fn unknown_key_is_tagged() {
        let keys = accessor("k1");
        let record = WrappedDek::new(id("ghost"), vec![0; 60]);
        assert_eq!(
            keys.unwrap(&record).unwrap_err(),
            UnwrapError::key(id("ghost"), UnwrapReason::UnknownKey)
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        let keys = accessor("k1").with_dek_len(16);
        let record = keys.wrap(&KeyBytes::generate(32), &id("k1")).unwrap();
        assert!(matches!(
            keys.unwrap(&record).unwrap_err(),
            UnwrapError::Key {
                reason: UnwrapReason::InvalidLength { expected: 16, actual: 32 },
                ..
            }
        ));
    }

    #[test]
    fn unwrap_any_prefers_active_then_newest() {
        let keys = accessor("k1");
        keys.ring().insert(WrappingKey::generate(id("k2"))).unwrap();
        keys.ring().insert(WrappingKey::generate(id("k3"))).unwrap();

        let records = vec![
            WrappedDek::new(id("k2"), vec![1]),
            WrappedDek::new(id("k1"), vec![2]),
            WrappedDek::new(id("k3"), vec![3]),
        ];
        let order: Vec<_> = keys
            .attempt_order(&records)
            .into_iter()
            .map(|r| r.key_id().clone())
            .collect();
        assert_eq!(order, vec![id("k1"), id("k3"), id("k2")]);
    }

    #[test]
    fn unwrap_any_single_failure_is_not_aggregated() {
        let keys = accessor("k1");
        let err = keys
            .unwrap_any(&[WrappedDek::new(id("k1"), vec![0; 60])])
            .unwrap_err();
        assert_eq!(err, UnwrapError::key(id("k1"), UnwrapReason::Rejected));
    }

    #[test]
    fn unwrap_any_skips_bad_records() {
        let keys = accessor("k1");
        let (dek, good) = keys.generate_and_wrap(&id("k1")).unwrap();
        let records = vec![good, WrappedDek::new(id("gone"), vec![1, 2, 3])];
        assert_eq!(bytes(&keys.unwrap_any(&records).unwrap()), bytes(&dek));
    }

    #[test]
    fn unwrap_any_of_nothing_is_empty_aggregate() {
        let keys = accessor("k1");
        assert_eq!(
            keys.unwrap_any(&[]).unwrap_err(),
            UnwrapError::Aggregate { failures: vec![] }
        );
    }

    #[test]
    fn rewrap_respects_policy() {
        for policy in [RecordPolicy::Accumulate, RecordPolicy::Replace] {
            let keys = accessor("k1").with_policy(policy);
            let reference = ContentReference::new("blob");
            let (dek, record) = keys.generate_and_wrap(&id("k1")).unwrap();
            keys.persist(&reference, record).unwrap();

            keys.ring().rotate_to(WrappingKey::generate(id("k2"))).unwrap();
            assert!(keys.rewrap(&reference).unwrap());
            assert!(!keys.rewrap(&reference).unwrap());

            let ids: Vec<_> = keys
                .records_for(&reference)
                .unwrap()
                .iter()
                .map(|r| r.key_id().clone())
                .collect();
            match policy {
                RecordPolicy::Accumulate => assert_eq!(ids, vec![id("k1"), id("k2")]),
                RecordPolicy::Replace => assert_eq!(ids, vec![id("k2")]),
            }

            keys.ring().retire(&id("k1")).unwrap();
            assert_eq!(bytes(&keys.unwrap_for(&reference).unwrap()), bytes(&dek));
        }
    }

    #[test]
    fn prune_keeps_last_record() {
        let keys = accessor("k1");
        let reference = ContentReference::new("blob");
        let (_dek, record) = keys.generate_and_wrap(&id("k1")).unwrap();
        keys.persist(&reference, record).unwrap();

        assert!(keys.prune(&reference, &id("k1")).is_err());
        assert!(!keys.prune(&reference, &id("other")).unwrap());

        keys.ring().rotate_to(WrappingKey::generate(id("k2"))).unwrap();
        keys.rewrap(&reference).unwrap();
        assert!(keys.prune(&reference, &id("k1")).unwrap());
        assert_eq!(keys.records_for(&reference).unwrap().len(), 1);
    }

    #[test]
    fn unwrap_for_without_records_is_unreadable() {
        let keys = accessor("k1");
        let err = keys.unwrap_for(&ContentReference::new("missing")).unwrap_err();
        assert!(err.is_unreadable());
    }

    #[test]
    fn forget_removes_records() {
        let keys = accessor("k1");
        let reference = ContentReference::new("blob");
        let (_dek, record) = keys.generate_and_wrap(&id("k1")).unwrap();
        keys.persist(&reference, record).unwrap();
        assert!(keys.forget(&reference).unwrap());
        assert!(keys.records_for(&reference).unwrap().is_empty());
    }
}
