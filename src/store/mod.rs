pub mod database;
pub mod disk;
pub mod memory;
pub mod sealed;

pub use database::{PsStatus, SvrDatabase};
pub use disk::FileStorage;
pub use memory::MemoryStorage;
pub use sealed::EncryptedStorage;

pub const OIC_JSON_ACL_NAME: &str = "acl";
pub const OIC_JSON_PSTAT_NAME: &str = "pstat";
pub const OIC_JSON_DOXM_NAME: &str = "doxm";
pub const OIC_JSON_AMACL_NAME: &str = "amacl";
pub const OIC_JSON_SVC_NAME: &str = "svc";
pub const OIC_JSON_CRED_NAME: &str = "cred";
pub const OIC_JSON_PCONF_NAME: &str = "pconf";
pub const OIC_JSON_RESET_PF_NAME: &str = "resetpf";
pub const OIC_JSON_CRL_NAME: &str = "crl";

/// Every resource name the database is known to carry.
pub const SVR_RESOURCE_NAMES: [&str; 9] = [
    OIC_JSON_ACL_NAME,
    OIC_JSON_PSTAT_NAME,
    OIC_JSON_DOXM_NAME,
    OIC_JSON_AMACL_NAME,
    OIC_JSON_SVC_NAME,
    OIC_JSON_CRED_NAME,
    OIC_JSON_PCONF_NAME,
    OIC_JSON_RESET_PF_NAME,
    OIC_JSON_CRL_NAME,
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Reset profile already exists")]
    ResetProfileExists,
    #[error("Not found")]
    NotFound,
}

/// Backing medium for the SVR database file.
///
/// The database is always handled as one blob: backends never see individual
/// resources. `store` must replace the whole contents so that a concurrent
/// reader observes either the previous or the new bytes.
pub trait PersistentStorage {
    /// Current contents, or `None` when nothing was ever written.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    fn store(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete the database. Deleting a missing database is not an error.
    fn remove(&self) -> Result<(), StoreError>;

    /// Run `op` while holding the single-writer lock for this database.
    fn with_write_lock(
        &self,
        op: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}
