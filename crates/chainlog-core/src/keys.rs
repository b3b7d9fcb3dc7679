//! Key ring: the signing keys of one ledger, addressed by [`KeyId`].
//!
//! Exactly one key is active for signing. Rotation adds a new active key
//! and keeps the previous ones for verification, so entries signed before
//! the rotation keep verifying.

use std::collections::BTreeMap;

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::CoreError;
use crate::types::KeyId;

struct KeySlot {
    public: Ed25519PublicKey,
    /// `None` once the signing half has been retired.
    signing: Option<Keypair>,
}

/// In-memory registry of signing and verify-only keys.
pub struct KeyRing {
    keys: BTreeMap<KeyId, KeySlot>,
    active: KeyId,
}

impl KeyRing {
    /// Create a ring whose only key is active.
    pub fn new(key_id: KeyId, keypair: Keypair) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(
            key_id.clone(),
            KeySlot {
                public: keypair.public_key(),
                signing: Some(keypair),
            },
        );
        Self {
            keys,
            active: key_id,
        }
    }

    /// Create a ring with a freshly generated key.
    pub fn generate(key_id: KeyId) -> Self {
        Self::new(key_id, Keypair::generate())
    }

    /// The key new entries are signed with.
    pub fn active_key_id(&self) -> &KeyId {
        &self.active
    }

    /// Add a new signing key and make it active.
    ///
    /// The previously active key stays available for verification and
    /// signing by explicit id until it is retired.
    pub fn rotate(&mut self, key_id: KeyId, keypair: Keypair) -> Result<(), CoreError> {
        if self.keys.contains_key(&key_id) {
            return Err(CoreError::InvalidKeyId(format!("{} already registered", key_id)));
        }
        self.keys.insert(
            key_id.clone(),
            KeySlot {
                public: keypair.public_key(),
                signing: Some(keypair),
            },
        );
        self.active = key_id;
        Ok(())
    }

    /// Register a public key that can verify but never sign.
    pub fn add_verifying_key(
        &mut self,
        key_id: KeyId,
        public: Ed25519PublicKey,
    ) -> Result<(), CoreError> {
        if self.keys.contains_key(&key_id) {
            return Err(CoreError::InvalidKeyId(format!("{} already registered", key_id)));
        }
        self.keys.insert(
            key_id,
            KeySlot {
                public,
                signing: None,
            },
        );
        Ok(())
    }

    /// Drop the secret half of a key, keeping the public half for verification.
    ///
    /// Retiring the active key leaves the ring unable to sign until the next
    /// rotation.
    pub fn retire_signing(&mut self, key_id: &KeyId) -> Result<(), CoreError> {
        let slot = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| CoreError::UnknownKey(key_id.to_string()))?;
        slot.signing = None;
        Ok(())
    }

    /// Sign a message with the given key.
    pub fn sign(&self, key_id: &KeyId, message: &[u8]) -> Result<Ed25519Signature, CoreError> {
        let slot = self
            .keys
            .get(key_id)
            .ok_or_else(|| CoreError::UnknownKey(key_id.to_string()))?;
        let keypair = slot
            .signing
            .as_ref()
            .ok_or_else(|| CoreError::KeyNotSigning(key_id.to_string()))?;
        Ok(keypair.sign(message))
    }

    /// Verify a signature under the given key. Unknown keys never verify.
    pub fn verify(&self, key_id: &KeyId, message: &[u8], signature: &Ed25519Signature) -> bool {
        self.public_key(key_id)
            .map_or(false, |public| public.verify(message, signature))
    }

    /// Resolve the public key registered under an id.
    pub fn public_key(&self, key_id: &KeyId) -> Option<Ed25519PublicKey> {
        self.keys.get(key_id).map(|slot| slot.public)
    }

    /// Whether the key can still produce signatures.
    pub fn can_sign(&self, key_id: &KeyId) -> bool {
        self.keys
            .get(key_id)
            .map_or(false, |slot| slot.signing.is_some())
    }

    /// All registered key ids, in order.
    pub fn key_ids(&self) -> impl Iterator<Item = &KeyId> {
        self.keys.keys()
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("active", &self.active)
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}
