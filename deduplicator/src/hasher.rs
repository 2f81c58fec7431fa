use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::storage::types::datum::Datum;
use sha2::{Digest, Sha256};

use crate::error::DeduplicatorError;

/// Content-identity hashing over ordered identity fields.
#[derive(Debug, Clone)]
pub struct IdentityHasher {
    separator: String,
}

impl IdentityHasher {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// SHA-256 over the fields joined in the given order, base64 encoded.
    ///
    /// Each field is prefixed with its byte length, so a separator inside a
    /// field cannot make two different field lists hash alike.
    /// Fails on an empty list or any empty field.
    pub fn generate_identity_hash(&self, fields: &[String]) -> Result<String, DeduplicatorError> {
        if fields.is_empty() || fields.iter().any(String::is_empty) {
            return Err(DeduplicatorError::EmptyIdentity);
        }

        let encoded: Vec<String> = fields
            .iter()
            .map(|field| format!("{}:{}", field.len(), field))
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(encoded.join(self.separator.as_str()).as_bytes());
        Ok(STANDARD.encode(hasher.finalize()))
    }

    /// Hashes every datum and stores the hash on its descriptor.
    ///
    /// Stops at the first datum whose identity cannot be gathered or hashed;
    /// data before it keep the hash they were given.
    pub fn assign_identity_hashes(
        &self,
        data: &mut [Datum],
    ) -> Result<Vec<String>, DeduplicatorError> {
        let mut hashes = Vec::with_capacity(data.len());
        for datum in data.iter_mut() {
            let fields = datum
                .identity_fields()
                .map_err(|err| DeduplicatorError::InvalidDatum(err.to_string()))?;
            let hash = self.generate_identity_hash(&fields)?;
            datum.deduplicator.get_or_insert_with(Default::default).hash = Some(hash.clone());
            hashes.push(hash);
        }
        Ok(hashes)
    }
}

impl Default for IdentityHasher {
    fn default() -> Self {
        Self::new("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::storage::types::datum::Measurement;

    fn fields(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn reading(device_id: Option<&str>) -> Datum {
        let time = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .expect("valid time");
        let mut datum = Datum::new(
            time,
            Measurement::Cbg {
                value: 7.2,
                units: "mmol/L".into(),
            },
        );
        datum.user_id = Some("user-1".into());
        datum.device_id = device_id.map(str::to_string);
        datum
    }

    #[test]
    fn hashing_is_deterministic() {
        let hasher = IdentityHasher::default();
        let input = fields(&["user", "device", "2024-01-02T03:04:05.000Z", "cbg"]);

        let first = hasher.generate_identity_hash(&input).expect("hash");
        let second = hasher.generate_identity_hash(&input).expect("hash");
        assert_eq!(first, second);
        assert_eq!(STANDARD.decode(&first).expect("base64").len(), 32);
    }

    #[test]
    fn field_order_is_significant() {
        let hasher = IdentityHasher::default();
        let forward = hasher
            .generate_identity_hash(&fields(&["a", "b"]))
            .expect("hash");
        let reversed = hasher
            .generate_identity_hash(&fields(&["b", "a"]))
            .expect("hash");
        assert_ne!(forward, reversed);
    }

    #[test]
    fn separator_inside_a_field_does_not_collide() {
        let hasher = IdentityHasher::default();
        let left = hasher
            .generate_identity_hash(&fields(&["a|b", "c"]))
            .expect("hash");
        let right = hasher
            .generate_identity_hash(&fields(&["a", "b|c"]))
            .expect("hash");
        assert_ne!(left, right);

        let joined = hasher
            .generate_identity_hash(&fields(&["a|b|c"]))
            .expect("hash");
        assert_ne!(left, joined);
    }

    #[test]
    fn separator_changes_the_hash() {
        let input = fields(&["a", "b"]);
        let pipe = IdentityHasher::new("|")
            .generate_identity_hash(&input)
            .expect("hash");
        let colon = IdentityHasher::new(":")
            .generate_identity_hash(&input)
            .expect("hash");
        assert_ne!(pipe, colon);
    }

    #[test]
    fn empty_identity_is_rejected() {
        let hasher = IdentityHasher::default();
        assert!(matches!(
            hasher.generate_identity_hash(&[]),
            Err(DeduplicatorError::EmptyIdentity)
        ));
        assert!(matches!(
            hasher.generate_identity_hash(&fields(&["a", "", "c"])),
            Err(DeduplicatorError::EmptyIdentity)
        ));
    }

    #[test]
    fn assigns_hashes_to_every_datum() {
        let hasher = IdentityHasher::default();
        let mut data = vec![reading(Some("device-1")), reading(Some("device-2"))];

        let hashes = hasher.assign_identity_hashes(&mut data).expect("hashes");
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
        assert_eq!(data[0].identity_hash(), Some(hashes[0].as_str()));
        assert_eq!(data[1].identity_hash(), Some(hashes[1].as_str()));
    }

    #[test]
    fn assignment_short_circuits_on_missing_identity() {
        let hasher = IdentityHasher::default();
        let mut data = vec![
            reading(Some("device-1")),
            reading(None),
            reading(Some("device-3")),
        ];

        let result = hasher.assign_identity_hashes(&mut data);
        assert!(matches!(result, Err(DeduplicatorError::InvalidDatum(_))));
        assert!(data[0].identity_hash().is_some());
        assert!(data[2].identity_hash().is_none());
    }

    #[test]
    fn empty_batch_yields_no_hashes() {
        let hasher = IdentityHasher::default();
        assert!(hasher
            .assign_identity_hashes(&mut [])
            .expect("empty batch")
            .is_empty());
    }
}
