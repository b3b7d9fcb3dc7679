//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use chainlog_core::{Blake3Hash, Entry, KeyId, Keypair, Record, UnsignedEntry};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate a valid stream name.
pub fn stream_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9._:-]{0,31}".prop_map(String::from)
}

/// Generate a valid entry id.
pub fn entry_id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,31}".prop_map(String::from)
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a JSON object with integer, string, bool and null leaves.
pub fn json_object() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(serde_json::Value::String),
    ];
    prop::collection::btree_map("[a-z]{1,8}", leaf, 0..8)
        .prop_map(|fields| serde_json::Value::Object(fields.into_iter().collect()))
}

/// Generate records with distinct ids.
pub fn records(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(payload(64), 1..=max).prop_map(|payloads| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Record::new(format!("r-{}", i), payload))
            .collect()
    })
}

/// Parameters for building a signed chain without a ledger.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub seed: [u8; 32],
    pub stream: String,
    pub payloads: Vec<Vec<u8>>,
    pub timestamp: i64,
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            stream_name(),
            prop::collection::vec(payload(256), 1..16),
            0i64..=1_700_000_000_000i64,
        )
            .prop_map(|(seed, stream, payloads, timestamp)| ChainParams {
                seed,
                stream,
                payloads,
                timestamp,
            })
            .boxed()
    }
}

/// Link and sign the payloads into a chain, all signed by key `k1`.
pub fn chain_from_params(params: &ChainParams) -> Vec<Entry> {
    let keypair = Keypair::from_seed(&params.seed);
    let key_id = KeyId::new("k1").expect("valid key id");

    let mut entries: Vec<Entry> = Vec::with_capacity(params.payloads.len());
    for (i, payload) in params.payloads.iter().enumerate() {
        let tip = entries.last().map(Entry::tip);
        let record = Record::new(format!("e-{}", i), Bytes::from(payload.clone())).at(params.timestamp);
        let unsigned = UnsignedEntry::link(&params.stream, record, tip.as_ref(), params.timestamp)
            .expect("generated record links");
        entries.push(unsigned.sign_with(&keypair, key_id.clone()));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlog_core::{canonical_entry_bytes, canonical_json, compute_hash, verify_entries};

    proptest! {
        #[test]
        fn test_hash_deterministic(
            stream in stream_name(),
            sequence in any::<u64>(),
            body in payload(512),
            prev in blake3_hash(),
        ) {
            let h1 = compute_hash(&stream, sequence, &body, &prev).unwrap();
            let h2 = compute_hash(&stream, sequence, &body, &prev).unwrap();
            prop_assert_eq!(h1, h2);

            let b1 = canonical_entry_bytes(&stream, sequence, &body, &prev).unwrap();
            prop_assert_eq!(Blake3Hash::hash(&b1), h1);
        }

        #[test]
        fn test_hash_changes_with_payload(
            stream in stream_name(),
            p1 in payload(100),
            p2 in payload(100),
        ) {
            prop_assume!(p1 != p2);
            let h1 = compute_hash(&stream, 0, &p1, &Blake3Hash::ZERO).unwrap();
            let h2 = compute_hash(&stream, 0, &p2, &Blake3Hash::ZERO).unwrap();
            prop_assert_ne!(h1, h2);
        }

        #[test]
        fn test_generated_chain_verifies(params: ChainParams) {
            let entries = chain_from_params(&params);
            let public = Keypair::from_seed(&params.seed).public_key();

            let report = verify_entries(&params.stream, &entries, |_| Some(public));
            prop_assert!(report.is_valid());
            prop_assert_eq!(report.valid_through, Some(entries.len() as u64 - 1));
        }

        #[test]
        fn test_json_canonical_is_stable(value in json_object()) {
            let once = canonical_json(&value).unwrap();
            let reparsed: serde_json::Value = serde_json::from_slice(&once).unwrap();
            prop_assert_eq!(canonical_json(&reparsed).unwrap(), once);
        }
    }
}
