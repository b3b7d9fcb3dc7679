//! Canonical CBOR encoding for deterministic hashing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! The hash of an entry is Blake3 over the canonical bytes of
//! `(version, stream, sequence, payload, prev_hash)`. The entry id, the
//! timestamp, and the signature are not part of the hashed content.
//!
//! JSON payloads get their own canonical form (sorted keys, compact, no
//! floats) in [`canonical_json`], so structurally equal documents hash
//! identically.

use ciborium::value::Value;

use crate::crypto::Blake3Hash;
use crate::error::CoreError;

/// The current canonical layout version.
pub const CANONICAL_VERSION: u8 = 0;

/// Field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const VERSION: u64 = 0;
    pub const STREAM: u64 = 1;
    pub const SEQUENCE: u64 = 2;
    pub const PAYLOAD: u64 = 3;
    pub const PREV_HASH: u64 = 4;
}

/// Encode the hashed content of an entry to canonical CBOR bytes.
pub fn canonical_entry_bytes(
    stream: &str,
    sequence: u64,
    payload: &[u8],
    prev_hash: &Blake3Hash,
) -> Result<Vec<u8>, CoreError> {
    let value = Value::Map(vec![
        (
            Value::Integer(keys::VERSION.into()),
            Value::Integer(CANONICAL_VERSION.into()),
        ),
        (Value::Integer(keys::STREAM.into()), Value::Text(stream.to_string())),
        (Value::Integer(keys::SEQUENCE.into()), Value::Integer(sequence.into())),
        (Value::Integer(keys::PAYLOAD.into()), Value::Bytes(payload.to_vec())),
        (
            Value::Integer(keys::PREV_HASH.into()),
            Value::Bytes(prev_hash.0.to_vec()),
        ),
    ]);
    encode_cbor_value_canonical(&value)
}

/// Compute the chain hash of an entry from its hashed content.
pub fn compute_hash(
    stream: &str,
    sequence: u64,
    payload: &[u8],
    prev_hash: &Blake3Hash,
) -> Result<Blake3Hash, CoreError> {
    let bytes = canonical_entry_bytes(stream, sequence, payload, prev_hash)?;
    Ok(Blake3Hash::hash(&bytes))
}

/// Encode a CBOR Value to canonical bytes.
pub fn encode_cbor_value_canonical(value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr)?,
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::EncodingError(
                "floats not supported in canonical encoding".into(),
            ))
        }
        _ => {
            return Err(CoreError::EncodingError(
                "unsupported CBOR value type".into(),
            ))
        }
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<(), CoreError> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison. Duplicate keys are
/// rejected since they have no deterministic meaning.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        key_value_pairs.push((key_buf, v));
    }

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if key_value_pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(CoreError::EncodingError("duplicate map key".into()));
    }

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}

/// Produce the canonical byte form of a JSON document.
///
/// Object keys are sorted by their UTF-8 bytes, output is compact, and
/// only integers are accepted as numbers. The top level must be an object
/// or an array.
pub fn canonical_json(value: &serde_json::Value) -> Result<Vec<u8>, CoreError> {
    if !(value.is_object() || value.is_array()) {
        return Err(CoreError::InvalidPayload(
            "JSON payload must be an object or array".into(),
        ));
    }
    let mut buf = Vec::new();
    write_json(&mut buf, value)?;
    Ok(buf)
}

fn write_json(buf: &mut Vec<u8>, value: &serde_json::Value) -> Result<(), CoreError> {
    use serde_json::Value as Json;

    match value {
        Json::Null => buf.extend_from_slice(b"null"),
        Json::Bool(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
        Json::Number(n) => {
            if n.is_f64() {
                return Err(CoreError::InvalidPayload(format!(
                    "floating-point number {} is not canonicalizable",
                    n
                )));
            }
            buf.extend_from_slice(n.to_string().as_bytes());
        }
        Json::String(s) => write_json_string(buf, s)?,
        Json::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_json(buf, item)?;
            }
            buf.push(b']');
        }
        Json::Object(map) => {
            let mut fields: Vec<(&String, &Json)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            buf.push(b'{');
            for (i, (key, item)) in fields.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_json_string(buf, key)?;
                buf.push(b':');
                write_json(buf, item)?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_json_string(buf: &mut Vec<u8>, s: &str) -> Result<(), CoreError> {
    let quoted = serde_json::to_string(s).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    buf.extend_from_slice(quoted.as_bytes());
    Ok(())
}
