pub mod codec;
pub mod manager;

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cbor::{CodecError, WILDCARD_RESOURCE_URI};
use crate::crypto::CryptoError;
use crate::store::StoreError;

pub use codec::{cred_list_from_cbor, cred_list_to_cbor, is_valid_access_for_sub_owner};
pub use manager::CredentialManager;

pub const OIC_SEC_ENCODING_RAW: &str = "oic.sec.encoding.raw";
pub const OIC_SEC_ENCODING_BASE64: &str = "oic.sec.encoding.base64";
pub const OIC_SEC_ENCODING_DER: &str = "oic.sec.encoding.der";
pub const OIC_SEC_ENCODING_PEM: &str = "oic.sec.encoding.pem";

#[derive(Debug, thiserror::Error)]
pub enum CredError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid credential: {0}")]
    Invalid(String),
    #[error("credential ids exhausted")]
    IdsExhausted,
    #[error("credential {0} has no comparable key material")]
    Incomparable(u16),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Wire values are the OCF credential type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredType {
    SymmetricPairWiseKey,
    SymmetricGroupKey,
    AsymmetricKey,
    SignedAsymmetricKey,
    PinPassword,
    AsymmetricEncryptionKey,
}

impl CredType {
    pub fn bits(self) -> u64 {
        match self {
            Self::SymmetricPairWiseKey    => 1,
            Self::SymmetricGroupKey       => 2,
            Self::AsymmetricKey           => 4,
            Self::SignedAsymmetricKey     => 8,
            Self::PinPassword             => 16,
            Self::AsymmetricEncryptionKey => 32,
        }
    }
}

impl TryFrom<u64> for CredType {
    type Error = CodecError;

    fn try_from(bits: u64) -> Result<Self, Self::Error> {
        Ok(match bits {
            1  => Self::SymmetricPairWiseKey,
            2  => Self::SymmetricGroupKey,
            4  => Self::AsymmetricKey,
            8  => Self::SignedAsymmetricKey,
            16 => Self::PinPassword,
            32 => Self::AsymmetricEncryptionKey,
            other => return Err(CodecError::UnknownCredType(other)),
        })
    }
}

/// Who a credential belongs to. `Wildcard` matches any peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Wildcard,
    Id(Uuid),
}

impl Subject {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Id(id) if id.is_nil())
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Wildcard => None,
        }
    }
}

impl From<Uuid> for Subject {
    fn from(id: Uuid) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str(WILDCARD_RESOURCE_URI),
            Self::Id(id) => write!(f, "{}", id.hyphenated()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    Raw,
    Base64,
    Der,
    Pem,
}

impl KeyEncoding {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Raw    => OIC_SEC_ENCODING_RAW,
            Self::Base64 => OIC_SEC_ENCODING_BASE64,
            Self::Der    => OIC_SEC_ENCODING_DER,
            Self::Pem    => OIC_SEC_ENCODING_PEM,
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            OIC_SEC_ENCODING_RAW    => Some(Self::Raw),
            OIC_SEC_ENCODING_BASE64 => Some(Self::Base64),
            OIC_SEC_ENCODING_DER    => Some(Self::Der),
            OIC_SEC_ENCODING_PEM    => Some(Self::Pem),
            _ => None,
        }
    }

    /// Base64 and PEM ride as CBOR text strings, raw and DER as byte strings.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Base64 | Self::Pem)
    }
}

/// Key material tagged with its encoding. Base64/PEM hold the encoded text bytes.
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub enum KeyData {
    Raw(Vec<u8>),
    Base64(Vec<u8>),
    Der(Vec<u8>),
    Pem(Vec<u8>),
}

impl KeyData {
    pub fn new(encoding: KeyEncoding, bytes: Vec<u8>) -> Self {
        match encoding {
            KeyEncoding::Raw    => Self::Raw(bytes),
            KeyEncoding::Base64 => Self::Base64(bytes),
            KeyEncoding::Der    => Self::Der(bytes),
            KeyEncoding::Pem    => Self::Pem(bytes),
        }
    }

    pub fn encoding(&self) -> KeyEncoding {
        match self {
            Self::Raw(_)    => KeyEncoding::Raw,
            Self::Base64(_) => KeyEncoding::Base64,
            Self::Der(_)    => KeyEncoding::Der,
            Self::Pem(_)    => KeyEncoding::Pem,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Raw(b) | Self::Base64(b) | Self::Der(b) | Self::Pem(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Binary key bytes: base64 is decoded, every other encoding is returned as stored.
    pub fn decoded(&self) -> Result<Zeroizing<Vec<u8>>, base64::DecodeError> {
        match self {
            Self::Base64(b) => STANDARD.decode(b).map(Zeroizing::new),
            other => Ok(Zeroizing::new(other.as_bytes().to_vec())),
        }
    }
}

impl fmt::Debug for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({} bytes)", self.encoding(), self.len())
    }
}

/// Private key material. Wiped when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(KeyData);

impl PrivateKey {
    pub fn new(data: KeyData) -> Self {
        Self(data)
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Self(KeyData::Raw(bytes.to_vec()))
    }

    pub fn data(&self) -> &KeyData {
        &self.0
    }

    pub fn encoding(&self) -> KeyEncoding {
        self.0.encoding()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({:?}, <redacted>)", self.encoding())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalData {
    pub data: KeyData,
    pub revstat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub cred_id: u16,
    pub subject: Subject,
    pub cred_type: CredType,
    pub private_data: Option<PrivateKey>,
    pub public_data: Option<KeyData>,
    pub optional_data: Option<OptionalData>,
    pub cred_usage: Option<String>,
    pub period: Option<String>,
    pub eowner_id: Option<Uuid>,
}

impl Credential {
    /// A credential with no key material and no id; the manager assigns the id.
    pub fn new(subject: impl Into<Subject>, cred_type: CredType) -> Self {
        Self {
            cred_id: 0,
            subject: subject.into(),
            cred_type,
            private_data: None,
            public_data: None,
            optional_data: None,
            cred_usage: None,
            period: None,
            eowner_id: None,
        }
    }

    pub fn with_private_data(mut self, key: PrivateKey) -> Self {
        self.private_data = Some(key);
        self
    }

    pub fn with_public_data(mut self, data: KeyData) -> Self {
        self.public_data = Some(data);
        self
    }

    pub fn with_optional_data(mut self, data: KeyData, revstat: bool) -> Self {
        self.optional_data = Some(OptionalData { data, revstat });
        self
    }

    pub fn with_cred_usage(mut self, usage: impl Into<String>) -> Self {
        self.cred_usage = Some(usage.into());
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn with_eowner(mut self, eowner: Uuid) -> Self {
        self.eowner_id = Some(eowner);
        self
    }

    fn has_private(&self) -> bool {
        self.private_data.as_ref().is_some_and(|k| !k.is_empty())
    }

    fn has_public(&self) -> bool {
        self.public_data.as_ref().is_some_and(|k| !k.is_empty())
    }

    fn has_optional(&self) -> bool {
        self.optional_data.as_ref().is_some_and(|o| !o.data.is_empty())
    }

    /// True when none of private, public or optional data carries bytes.
    pub fn has_no_key_material(&self) -> bool {
        !self.has_private() && !self.has_public() && !self.has_optional()
    }

    /// Why this credential cannot be stored, if it cannot.
    pub fn validate(&self) -> Result<(), String> {
        if self.cred_id == 0 {
            return Err("credential id is 0".into());
        }
        if self.subject.is_nil() {
            return Err("subject is the nil uuid".into());
        }
        match self.cred_type {
            CredType::SymmetricPairWiseKey | CredType::SymmetricGroupKey | CredType::PinPassword => {
                match &self.private_data {
                    Some(key) if !key.is_empty()
                        && matches!(key.encoding(), KeyEncoding::Raw | KeyEncoding::Base64) => Ok(()),
                    Some(key) if !key.is_empty() => {
                        Err(format!("{:?} private data must be raw or base64", self.cred_type))
                    }
                    _ => Err(format!("{:?} requires private data", self.cred_type)),
                }
            }
            CredType::AsymmetricKey if self.has_public() => Ok(()),
            CredType::AsymmetricKey => Err("asymmetric key requires public data".into()),
            CredType::SignedAsymmetricKey if self.has_public() || self.has_optional() => Ok(()),
            CredType::SignedAsymmetricKey => {
                Err("certificate requires public or optional data".into())
            }
            CredType::AsymmetricEncryptionKey if self.has_private() => Ok(()),
            CredType::AsymmetricEncryptionKey => {
                Err("asymmetric encryption key requires private data".into())
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// The whole `cred` resource: credentials plus the list's resource owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredList {
    pub creds: Vec<Credential>,
    pub rowner: Uuid,
}
