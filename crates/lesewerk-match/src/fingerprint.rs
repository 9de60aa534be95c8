// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Template fingerprint blob — the persisted form of a template's ORB
// features.
//
// Layout:
//
//   bytes 0..4    magic "LWFP"
//   bytes 4..6    format version (u16, little endian)
//   bytes 6..38   SHA-256 of the payload
//   bytes 38..    bincode-encoded `FeatureSet`

use lesewerk_core::LesewerkError;
use lesewerk_core::error::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::features::FeatureSet;

pub const FINGERPRINT_MAGIC: [u8; 4] = *b"LWFP";
pub const FINGERPRINT_VERSION: u16 = 1;

const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = FINGERPRINT_MAGIC.len() + 2 + DIGEST_LEN;

fn digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encode keypoints and descriptors into an opaque blob.
pub fn serialize_fingerprint(features: &FeatureSet) -> Result<Vec<u8>> {
    let payload = bincode::serialize(features)
        .map_err(|err| LesewerkError::Fingerprint(format!("failed to encode features: {}", err)))?;

    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
    blob.extend_from_slice(&FINGERPRINT_MAGIC);
    blob.extend_from_slice(&FINGERPRINT_VERSION.to_le_bytes());
    blob.extend_from_slice(&digest(&payload));
    blob.extend_from_slice(&payload);

    debug!(keypoints = features.len(), bytes = blob.len(), "Fingerprint serialized");
    Ok(blob)
}

/// Decode a blob produced by [`serialize_fingerprint`].
///
/// # Errors
///
/// [`LesewerkError::Fingerprint`] for a truncated blob, foreign magic,
/// unknown version, undecodable payload, or misaligned descriptors;
/// [`LesewerkError::IntegrityMismatch`] when the payload checksum differs.
pub fn deserialize_fingerprint(blob: &[u8]) -> Result<FeatureSet> {
    if blob.len() < HEADER_LEN {
        return Err(LesewerkError::Fingerprint(format!(
            "blob is {} bytes, shorter than the {}-byte header",
            blob.len(),
            HEADER_LEN
        )));
    }

    let (magic, rest) = blob.split_at(FINGERPRINT_MAGIC.len());
    if magic != &FINGERPRINT_MAGIC[..] {
        return Err(LesewerkError::Fingerprint("unrecognised blob magic".into()));
    }

    let (version, rest) = rest.split_at(2);
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != FINGERPRINT_VERSION {
        return Err(LesewerkError::Fingerprint(format!(
            "unsupported fingerprint version {}",
            version
        )));
    }

    let (expected, payload) = rest.split_at(DIGEST_LEN);
    let actual = digest(payload);
    if expected != actual.as_slice() {
        return Err(LesewerkError::IntegrityMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }

    let features: FeatureSet = bincode::deserialize(payload)
        .map_err(|err| LesewerkError::Fingerprint(format!("failed to decode features: {}", err)))?;
    if features.keypoints.len() != features.descriptors.len() {
        return Err(LesewerkError::Fingerprint(format!(
            "{} keypoints but {} descriptors",
            features.keypoints.len(),
            features.descriptors.len()
        )));
    }

    debug!(keypoints = features.len(), "Fingerprint deserialized");
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{DESCRIPTOR_BYTES, KeyPoint};

    fn sample() -> FeatureSet {
        FeatureSet {
            keypoints: vec![
                KeyPoint {
                    x: 12.5,
                    y: 40.0,
                    size: 31.0,
                    angle: 271.25,
                    response: 1.5e9,
                    octave: 0,
                    class_id: -1,
                },
                KeyPoint {
                    x: 300.0,
                    y: 7.2,
                    size: 44.64,
                    angle: 0.0,
                    response: -3.0,
                    octave: 2,
                    class_id: -1,
                },
            ],
            descriptors: vec![[0xA5; DESCRIPTOR_BYTES], [0x0F; DESCRIPTOR_BYTES]],
        }
    }

    #[test]
    fn round_trip_is_exact() {
        let blob = serialize_fingerprint(&sample()).unwrap();
        assert_eq!(&blob[..4], b"LWFP");
        assert_eq!(deserialize_fingerprint(&blob).unwrap(), sample());
    }

    #[test]
    fn tampered_payload_fails_integrity() {
        let mut blob = serialize_fingerprint(&sample()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(
            deserialize_fingerprint(&blob),
            Err(LesewerkError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn foreign_and_truncated_blobs_are_rejected() {
        assert!(matches!(
            deserialize_fingerprint(b"LWFP"),
            Err(LesewerkError::Fingerprint(_))
        ));

        let mut blob = serialize_fingerprint(&sample()).unwrap();
        blob[0] = b'X';
        assert!(matches!(
            deserialize_fingerprint(&blob),
            Err(LesewerkError::Fingerprint(_))
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut blob = serialize_fingerprint(&sample()).unwrap();
        blob[4] = 9;
        let err = deserialize_fingerprint(&blob).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn empty_feature_set_round_trips() {
        let blob = serialize_fingerprint(&FeatureSet::default()).unwrap();
        assert!(deserialize_fingerprint(&blob).unwrap().is_empty());
    }
}
