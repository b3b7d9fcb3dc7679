//! Golden test vectors for deterministic canonicalization.
//!
//! The canonical bytes are the hashing input, so any change to them changes
//! every entry hash. These vectors pin the encoding down byte for byte.

use chainlog_core::{canonical_entry_bytes, canonical_json, compute_hash, Blake3Hash};

/// A golden entry-encoding vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub stream: &'static str,
    pub sequence: u64,
    pub payload: &'static [u8],
    /// Previous hash (hex).
    pub prev_hash: &'static str,
    /// Expected canonical CBOR (hex).
    pub expected_canonical: &'static str,
}

impl GoldenVector {
    pub fn prev_hash(&self) -> Blake3Hash {
        Blake3Hash::from_hex(self.prev_hash).expect("golden prev_hash is valid hex")
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_entry_bytes(self.stream, self.sequence, self.payload, &self.prev_hash())
            .expect("golden vector encodes")
    }

    pub fn hash(&self) -> Blake3Hash {
        compute_hash(self.stream, self.sequence, self.payload, &self.prev_hash())
            .expect("golden vector hashes")
    }
}

const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Get all golden entry vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "genesis entry",
            stream: "orders",
            sequence: 0,
            payload: b"A",
            prev_hash: ZERO_HASH,
            expected_canonical: "a5000001666f7264657273020003414104582000000000000000000000000000\
                                 00000000000000000000000000000000000000",
        },
        GoldenVector {
            name: "empty payload, two-byte sequence",
            stream: "audit.log:v1",
            sequence: 1000,
            payload: b"",
            prev_hash: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            expected_canonical: "a50000016c61756469742e6c6f673a7631021903e80340045820aaaaaaaaaaaa\
                                 aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        },
        GoldenVector {
            name: "sequence above u32",
            stream: "s",
            sequence: 1 << 32,
            payload: b"hello world",
            prev_hash: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
            expected_canonical: "a50000016173021b0000000100000000034b68656c6c6f20776f726c64045820\
                                 000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        },
    ]
}

/// JSON documents and their canonical form.
pub fn json_vectors() -> Vec<(&'static str, &'static str)> {
    vec![
        (r#"{"b": 1, "a": [true, null, "x"]}"#, r#"{"a":[true,null,"x"],"b":1}"#),
        (r#"{"z": {"y": -5, "x": ""}}"#, r#"{"z":{"x":"","y":-5}}"#),
        (r#"[{"b": 2, "a": 1}]"#, r#"[{"a":1,"b":2}]"#),
    ]
}

/// Check every vector; returns `(name, matches, actual_hex)`.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = hex::encode(v.canonical_bytes());
            (v.name.to_string(), hex == v.expected_canonical, hex)
        })
        .collect()
}

/// Canonicalize a JSON text.
pub fn canonical_json_text(json: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(json).expect("vector is valid JSON");
    let bytes = canonical_json(&value).expect("vector canonicalizes");
    String::from_utf8(bytes).expect("canonical JSON is UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bytes_match_golden() {
        for (name, matches, actual) in verify_all_vectors() {
            assert!(matches, "vector '{}' encoded as {}", name, actual);
        }
    }

    #[test]
    fn test_vectors_are_deterministic() {
        for vector in all_vectors() {
            assert_eq!(
                vector.hash(),
                vector.hash(),
                "vector '{}' hashed differently on regeneration",
                vector.name
            );
        }
    }

    #[test]
    fn test_vector_hashes_are_distinct() {
        let hashes: Vec<_> = all_vectors().iter().map(GoldenVector::hash).collect();
        assert_ne!(hashes[0], hashes[1]);
        assert_ne!(hashes[1], hashes[2]);
        assert_ne!(hashes[0], hashes[2]);
    }

    #[test]
    fn test_json_vectors() {
        for (input, expected) in json_vectors() {
            assert_eq!(canonical_json_text(input), expected);
        }
    }
}
