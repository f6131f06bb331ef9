//! Boundary to the transport security stack. PSK derivation and cipher suite
//! selection live in the (D)TLS layer; the SVR core only calls into it.

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::handler::Peer;

/// `TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256`, the suite used once an owner PSK exists.
pub const TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256: u16 = 0xC037;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("cipher suite {0:#06x} could not be selected")]
    CipherSuite(u16),
    #[error("PSK lookup registration failed")]
    PskRegistration,
}

pub trait CryptoProvider {
    /// Derive the owner (or sub-owner) PSK for the session with `peer`.
    fn derive_owner_psk(
        &self,
        peer: &Peer,
        oxm_label: &[u8],
        owner: &Uuid,
        device: &Uuid,
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Stretch a PIN into `len` bytes of key material.
    fn derive_key_from_pin(
        &self,
        pin: &[u8],
        salt: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    fn enable_anon_ecdh(&self, enabled: bool) -> Result<(), CryptoError>;

    fn select_cipher_suite(&self, suite: u16, peer: &Peer) -> Result<(), CryptoError>;

    /// Point the TLS stack's PSK callback back at the credential store.
    fn register_psk_lookup(&self) -> Result<(), CryptoError>;
}
