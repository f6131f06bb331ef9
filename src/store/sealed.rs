use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::{PersistentStorage, StoreError};

const NONCE_LEN: usize = 12;

/// Wraps another backend and seals the whole database with AES-256-GCM.
///
/// On-medium layout is `nonce (12 bytes) || ciphertext+tag`.
pub struct EncryptedStorage<S> {
    key: Zeroizing<[u8; 32]>,
    inner: S,
}

impl<S: PersistentStorage> EncryptedStorage<S> {
    pub fn new(key: [u8; 32], inner: S) -> Self {
        Self { key: Zeroizing::new(key), inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Corrupt("encrypted database too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| StoreError::Encryption(e.to_string()))
    }

    /// Move a plaintext database into this encrypted one and delete the plaintext.
    ///
    /// Returns `false` when `plain` holds nothing to migrate.
    pub fn adopt_plaintext(&self, plain: &dyn PersistentStorage) -> Result<bool, StoreError> {
        let bytes = match plain.load()? {
            Some(bytes) if !bytes.is_empty() => Zeroizing::new(bytes),
            _ => return Ok(false),
        };
        self.store(&bytes)?;
        plain.remove()?;
        tracing::info!(len = bytes.len(), "Plaintext SVR database encrypted");
        Ok(true)
    }
}

impl<S: PersistentStorage> PersistentStorage for EncryptedStorage<S> {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match self.inner.load()? {
            Some(sealed) if !sealed.is_empty() => self.open(&sealed).map(Some),
            Some(_) => Ok(Some(Vec::new())),
            None => Ok(None),
        }
    }

    fn store(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let sealed = self.seal(bytes)?;
        self.inner.store(&sealed)
    }

    fn remove(&self) -> Result<(), StoreError> {
        self.inner.remove()
    }

    fn with_write_lock(
        &self,
        op: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.inner.with_write_lock(op)
    }
}
