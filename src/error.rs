use crate::amacl::AmaclError;
use crate::cred::CredError;
use crate::pstat::PstatError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Decode: {0}")]
    Decode(#[from] crate::cbor::CodecError),
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Storage: {0}")]
    Storage(#[from] crate::store::StoreError),
    #[error("Crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
}

impl From<CredError> for Error {
    fn from(e: CredError) -> Self {
        match e {
            CredError::InvalidParameter(msg) => Error::InvalidParameter(msg.to_string()),
            CredError::Invalid(msg) => Error::Validation(msg),
            other @ (CredError::IdsExhausted | CredError::Incomparable(_)) => {
                Error::Validation(other.to_string())
            }
            CredError::Codec(e) => Error::Decode(e),
            CredError::Store(e) => Error::Storage(e),
            CredError::Crypto(e) => Error::Crypto(e),
        }
    }
}

impl From<PstatError> for Error {
    fn from(e: PstatError) -> Self {
        match e {
            other @ (PstatError::UnsupportedMode(_) | PstatError::IllegalTransition { .. }) => {
                Error::Validation(other.to_string())
            }
            PstatError::Codec(e) => Error::Decode(e),
            PstatError::Store(e) => Error::Storage(e),
        }
    }
}

impl From<AmaclError> for Error {
    fn from(e: AmaclError) -> Self {
        match e {
            AmaclError::Codec(e) => Error::Decode(e),
            AmaclError::Store(e) => Error::Storage(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
