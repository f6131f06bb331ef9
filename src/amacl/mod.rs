pub mod codec;

use uuid::Uuid;

use crate::cbor::CodecError;
use crate::store::{StoreError, SvrDatabase, OIC_JSON_AMACL_NAME};

pub use codec::{amacl_from_cbor, amacl_to_cbor};

/// Resources an access-manager service may enforce ACLs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmaclEntry {
    pub resources: Vec<String>,
    pub amss: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmaclList {
    pub entries: Vec<AmaclEntry>,
    pub rowner: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum AmaclError {
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Append-only list of access-manager ACLs. The list is persisted whole.
#[derive(Debug, Default)]
pub struct AmaclManager {
    list: AmaclList,
}

impl AmaclManager {
    pub fn init(db: &SvrDatabase) -> Self {
        let list = match db.read_resource(OIC_JSON_AMACL_NAME) {
            Ok(bytes) => amacl_from_cbor(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored amacl is unreadable, starting empty");
                AmaclList::default()
            }),
            Err(StoreError::NotFound) => AmaclList::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Reading amacl failed, starting empty");
                AmaclList::default()
            }
        };
        tracing::debug!(entries = list.entries.len(), "Amacl ready");
        Self { list }
    }

    pub fn load(db: &SvrDatabase) -> Result<Self, AmaclError> {
        let list = match db.read_resource(OIC_JSON_AMACL_NAME) {
            Ok(bytes) => amacl_from_cbor(&bytes)?,
            Err(StoreError::NotFound) => AmaclList::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { list })
    }

    pub fn list(&self) -> &AmaclList {
        &self.list
    }

    pub fn entries(&self) -> &[AmaclEntry] {
        &self.list.entries
    }

    /// Append `incoming`'s entries; its rowner replaces ours when set.
    pub fn add(&mut self, db: &SvrDatabase, incoming: AmaclList) -> Result<(), AmaclError> {
        let mut working = self.list.clone();
        working.entries.extend(incoming.entries);
        if !incoming.rowner.is_nil() {
            working.rowner = incoming.rowner;
        }
        let payload = amacl_to_cbor(&working)?;
        db.write_resource(OIC_JSON_AMACL_NAME, &payload)?;
        self.list = working;
        Ok(())
    }

    /// First AMS of the first entry with a resource href that `uri` starts with.
    pub fn lookup_ams_for_resource(&self, uri: &str) -> Option<Uuid> {
        self.list
            .entries
            .iter()
            .find(|entry| entry.resources.iter().any(|href| uri.starts_with(href.as_str())))
            .and_then(|entry| entry.amss.first().copied())
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        amacl_to_cbor(&self.list)
    }
}
