//! Signature/key provider port.
//!
//! The ledger never holds key material itself. It asks a [`KeyProvider`] to
//! sign entry hashes with the active key and to resolve the public key named
//! by an entry's `signer_key_id` during verification.

use std::sync::Arc;

use async_trait::async_trait;
use chainlog_core::{Blake3Hash, CoreError, Ed25519PublicKey, Ed25519Signature, KeyId, KeyRing, Keypair};
use tokio::sync::RwLock;
use tracing::info;

/// Source of signatures and verifying keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// The key new entries are signed with.
    async fn active_key_id(&self) -> KeyId;

    /// Sign an entry hash with the given key.
    async fn sign(&self, hash: &Blake3Hash, key_id: &KeyId) -> Result<Ed25519Signature, CoreError>;

    /// Check a signature over an entry hash. Unknown keys never verify.
    async fn verify(&self, hash: &Blake3Hash, signature: &Ed25519Signature, key_id: &KeyId) -> bool {
        match self.resolve_public_key(key_id).await {
            Some(public) => public.verify(hash.as_bytes(), signature),
            None => false,
        }
    }

    async fn resolve_public_key(&self, key_id: &KeyId) -> Option<Ed25519PublicKey>;

    /// Sign with whichever key is active, returning the id used.
    async fn sign_active(&self, hash: &Blake3Hash) -> Result<(KeyId, Ed25519Signature), CoreError> {
        let key_id = self.active_key_id().await;
        let signature = self.sign(hash, &key_id).await?;
        Ok((key_id, signature))
    }
}

#[async_trait]
impl KeyProvider for KeyRing {
    async fn active_key_id(&self) -> KeyId {
        KeyRing::active_key_id(self).clone()
    }

    async fn sign(&self, hash: &Blake3Hash, key_id: &KeyId) -> Result<Ed25519Signature, CoreError> {
        KeyRing::sign(self, key_id, hash.as_bytes())
    }

    async fn resolve_public_key(&self, key_id: &KeyId) -> Option<Ed25519PublicKey> {
        self.public_key(key_id)
    }
}

#[async_trait]
impl<K: KeyProvider + ?Sized> KeyProvider for Arc<K> {
    async fn active_key_id(&self) -> KeyId {
        (**self).active_key_id().await
    }

    async fn sign(&self, hash: &Blake3Hash, key_id: &KeyId) -> Result<Ed25519Signature, CoreError> {
        (**self).sign(hash, key_id).await
    }

    async fn verify(&self, hash: &Blake3Hash, signature: &Ed25519Signature, key_id: &KeyId) -> bool {
        (**self).verify(hash, signature, key_id).await
    }

    async fn resolve_public_key(&self, key_id: &KeyId) -> Option<Ed25519PublicKey> {
        (**self).resolve_public_key(key_id).await
    }

    async fn sign_active(&self, hash: &Blake3Hash) -> Result<(KeyId, Ed25519Signature), CoreError> {
        (**self).sign_active(hash).await
    }
}

/// A [`KeyRing`] that can be rotated while a ledger is using it.
///
/// Clones share the same ring.
#[derive(Clone)]
pub struct SharedKeyRing {
    ring: Arc<RwLock<KeyRing>>,
}

impl SharedKeyRing {
    pub fn new(ring: KeyRing) -> Self {
        Self {
            ring: Arc::new(RwLock::new(ring)),
        }
    }

    /// Add a new key and make it the active one.
    ///
    /// Entries signed by earlier keys keep verifying.
    pub async fn rotate(&self, key_id: KeyId, keypair: Keypair) -> Result<(), CoreError> {
        let mut ring = self.ring.write().await;
        let previous = ring.active_key_id().clone();
        ring.rotate(key_id.clone(), keypair)?;
        info!(key_id = %key_id, previous = %previous, "rotated signing key");
        Ok(())
    }

    /// Drop the secret half of a key.
    pub async fn retire_signing(&self, key_id: &KeyId) -> Result<(), CoreError> {
        self.ring.write().await.retire_signing(key_id)?;
        info!(key_id = %key_id, "retired signing key");
        Ok(())
    }

    pub async fn add_verifying_key(
        &self,
        key_id: KeyId,
        public: Ed25519PublicKey,
    ) -> Result<(), CoreError> {
        self.ring.write().await.add_verifying_key(key_id, public)
    }
}

impl std::fmt::Debug for SharedKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyRing").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyProvider for SharedKeyRing {
    async fn active_key_id(&self) -> KeyId {
        self.ring.read().await.active_key_id().clone()
    }

    async fn sign(&self, hash: &Blake3Hash, key_id: &KeyId) -> Result<Ed25519Signature, CoreError> {
        self.ring.read().await.sign(key_id, hash.as_bytes())
    }

    async fn resolve_public_key(&self, key_id: &KeyId) -> Option<Ed25519PublicKey> {
        self.ring.read().await.public_key(key_id)
    }

    async fn sign_active(&self, hash: &Blake3Hash) -> Result<(KeyId, Ed25519Signature), CoreError> {
        // One guard, so a concurrent rotation cannot split id and signature.
        let ring = self.ring.read().await;
        let key_id = ring.active_key_id().clone();
        let signature = ring.sign(&key_id, hash.as_bytes())?;
        Ok((key_id, signature))
    }
}
