use ciborium::value::Value;

use super::{
    FileStorage, PersistentStorage, StoreError, OIC_JSON_ACL_NAME, OIC_JSON_CRED_NAME,
    OIC_JSON_DOXM_NAME, OIC_JSON_PSTAT_NAME, OIC_JSON_RESET_PF_NAME,
};

const CBOR_MAP_INDEFINITE: u8 = 0xBF;
const CBOR_BREAK: u8 = 0xFF;

/// Resources captured by a reset profile, in write order.
const RESET_PROFILE_MEMBERS: [&str; 4] = [
    OIC_JSON_ACL_NAME,
    OIC_JSON_CRED_NAME,
    OIC_JSON_PSTAT_NAME,
    OIC_JSON_DOXM_NAME,
];

/// Health of the backing database as seen by the last `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsStatus {
    Normal,
    OpenFail,
    ParseFail,
    NoExternalDbSet,
}

type Entries = Vec<(String, Vec<u8>)>;

/// The single-file SVR database: a top-level CBOR map of
/// `resource name -> byte string`, each value an independent CBOR document.
pub struct SvrDatabase {
    storage: Box<dyn PersistentStorage>,
}

impl SvrDatabase {
    pub fn new(storage: impl PersistentStorage + 'static) -> Self {
        Self { storage: Box::new(storage) }
    }

    pub fn open_file(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(FileStorage::new(path))
    }

    /// Raw bytes of the whole database file.
    pub fn read_all(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.storage.load()
    }

    /// The byte-string value stored under `name`.
    pub fn read_resource(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let entries = self.load_entries()?;
        entries
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes)
            .ok_or(StoreError::NotFound)
    }

    /// Names and payload sizes of every resource currently stored.
    pub fn resources(&self) -> Result<Vec<(String, usize)>, StoreError> {
        Ok(self
            .load_entries()?
            .into_iter()
            .map(|(name, bytes)| (name, bytes.len()))
            .collect())
    }

    /// Replace the blob stored under `name`, keeping every other entry as-is.
    ///
    /// An empty `payload` deletes the entry. The whole read-merge-write runs
    /// under the storage's write lock, and an unparseable existing database
    /// aborts the write rather than dropping its entries.
    pub fn write_resource(&self, name: &str, payload: &[u8]) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::Corrupt("empty resource name".into()));
        }
        self.storage.with_write_lock(&mut || {
            let existing = self.storage.load()?;
            let had_database = existing.as_ref().is_some_and(|b| !b.is_empty());
            let mut entries = match existing {
                Some(bytes) if !bytes.is_empty() => decode_entries(&bytes)?,
                _ => Vec::new(),
            };

            merge_entry(&mut entries, name, payload);
            if entries.is_empty() && !had_database {
                tracing::debug!(resource = name, "Nothing to write to empty database");
                return Ok(());
            }
            let out = encode_entries(&entries)?;
            self.storage.store(&out)?;
            tracing::debug!(resource = name, len = payload.len(), total = out.len(), "SVR resource updated");
            Ok(())
        })
    }

    /// Parse the database and report whether it is usable.
    pub fn check(&self) -> PsStatus {
        match self.storage.load() {
            Ok(None) => PsStatus::NoExternalDbSet,
            Ok(Some(bytes)) if bytes.is_empty() => PsStatus::NoExternalDbSet,
            Ok(Some(bytes)) => match decode_entries(&bytes) {
                Ok(_) => PsStatus::Normal,
                Err(e) => {
                    tracing::warn!(error = %e, "SVR database failed to parse");
                    PsStatus::ParseFail
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "SVR database could not be opened");
                PsStatus::OpenFail
            }
        }
    }

    /// Snapshot acl/cred/pstat/doxm into the `resetpf` entry.
    pub fn create_reset_profile(&self) -> Result<(), StoreError> {
        let entries = self.load_entries()?;
        if entries.iter().any(|(n, _)| n == OIC_JSON_RESET_PF_NAME) {
            tracing::debug!("Reset profile already exists");
            return Err(StoreError::ResetProfileExists);
        }
        let profile: Entries = RESET_PROFILE_MEMBERS
            .iter()
            .filter_map(|member| entries.iter().find(|(n, _)| n == member).cloned())
            .collect();
        let payload = encode_entries(&profile)?;
        self.write_resource(OIC_JSON_RESET_PF_NAME, &payload)?;
        tracing::info!(members = profile.len(), "Reset profile created");
        Ok(())
    }

    /// Rebuild the database from the reset profile. Entries outside the
    /// profile are dropped; the profile itself is kept.
    pub fn reset_to_profile(&self) -> Result<(), StoreError> {
        self.storage.with_write_lock(&mut || {
            let entries = match self.storage.load()? {
                Some(bytes) if !bytes.is_empty() => decode_entries(&bytes)?,
                _ => return Err(StoreError::NotFound),
            };
            let profile_bytes = entries
                .iter()
                .find(|(n, _)| n == OIC_JSON_RESET_PF_NAME)
                .map(|(_, b)| b.clone())
                .ok_or(StoreError::NotFound)?;
            let profile = decode_entries(&profile_bytes)?;

            let mut rebuilt: Entries = RESET_PROFILE_MEMBERS
                .iter()
                .filter_map(|member| profile.iter().find(|(n, _)| n == member).cloned())
                .filter(|(_, bytes)| !bytes.is_empty())
                .collect();
            rebuilt.push((OIC_JSON_RESET_PF_NAME.to_string(), profile_bytes));

            self.storage.store(&encode_entries(&rebuilt)?)?;
            tracing::info!(resources = rebuilt.len(), "SVR database reset to profile");
            Ok(())
        })
    }

    fn load_entries(&self) -> Result<Entries, StoreError> {
        match self.storage.load()? {
            Some(bytes) if !bytes.is_empty() => decode_entries(&bytes),
            _ => Ok(Vec::new()),
        }
    }
}

fn merge_entry(entries: &mut Entries, name: &str, payload: &[u8]) {
    let pos = entries.iter().position(|(n, _)| n == name);
    match (pos, payload.is_empty()) {
        (Some(i), true) => {
            entries.remove(i);
        }
        (Some(i), false) => entries[i].1 = payload.to_vec(),
        (None, true) => {}
        (None, false) => entries.push((name.to_string(), payload.to_vec())),
    }
}

fn decode_entries(bytes: &[u8]) -> Result<Entries, StoreError> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let map = match value {
        Value::Map(map) => map,
        _ => return Err(StoreError::Corrupt("top level is not a map".into())),
    };
    map.into_iter()
        .map(|(k, v)| match (k, v) {
            (Value::Text(name), Value::Bytes(blob)) => Ok((name, blob)),
            (Value::Text(name), _) => {
                Err(StoreError::Corrupt(format!("entry {name:?} is not a byte string")))
            }
            _ => Err(StoreError::Corrupt("non-text resource name".into())),
        })
        .collect()
}

fn encode_entries(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, StoreError> {
    let mut out = vec![CBOR_MAP_INDEFINITE];
    for (name, blob) in entries {
        ciborium::into_writer(&Value::Text(name.clone()), &mut out)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        ciborium::into_writer(&Value::Bytes(blob.clone()), &mut out)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
    }
    out.push(CBOR_BREAK);
    Ok(out)
}
