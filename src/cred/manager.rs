use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cbor::CodecError;
use crate::config::{OWNER_PSK_LENGTH_128, PRECONF_PIN_MIN_SIZE};
use crate::crypto::CryptoProvider;
use crate::store::{StoreError, SvrDatabase, OIC_JSON_CRED_NAME};

use super::codec::{cred_list_from_cbor, cred_list_to_cbor};
use super::{CredError, CredList, CredType, Credential, PrivateKey, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredCompare {
    Equal,
    NotEqual,
    /// Same type and subject, but no key material both sides carry.
    Incomparable,
}

/// A credential queued for `commit`. With `replace_subject` set, every stored
/// credential for the same subject is dropped first.
#[derive(Debug, Clone)]
pub struct PendingCred {
    pub cred: Credential,
    pub replace_subject: bool,
}

/// Owns the device's credential list. Every mutation is applied to a copy,
/// persisted, and only then swapped in, so a failed write leaves both the
/// database and memory on the previous list.
#[derive(Debug, Default)]
pub struct CredentialManager {
    list: CredList,
}

impl CredentialManager {
    /// Load the `cred` resource, falling back to an empty list when it is
    /// missing or unreadable. Never fails: a device must boot with a broken
    /// database so it can be provisioned again.
    pub fn init(db: &SvrDatabase, device_id: Uuid) -> Self {
        let mut list = match db.read_resource(OIC_JSON_CRED_NAME) {
            Ok(bytes) => cred_list_from_cbor(&bytes, device_id).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored cred resource is unreadable, starting empty");
                CredList::default()
            }),
            Err(StoreError::NotFound) => {
                tracing::debug!("No cred resource stored");
                CredList::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reading cred resource failed, starting empty");
                CredList::default()
            }
        };

        for cred in list.creds.iter_mut() {
            if cred.cred_type == CredType::SignedAsymmetricKey
                && (cred.subject == Subject::Wildcard || cred.subject.is_nil())
            {
                tracing::warn!(cred_id = cred.cred_id, "Certificate has no subject, assigning device id");
                cred.subject = Subject::Id(device_id);
            }
            if let Err(reason) = cred.validate() {
                tracing::warn!(cred_id = cred.cred_id, reason = %reason, "Invalid credential in database");
            }
        }
        if list.rowner.is_nil() {
            list.rowner = device_id;
        }

        let manager = Self { list };
        if !manager.list.creds.is_empty() {
            if let Err(e) = persist(db, &manager.list) {
                tracing::warn!(error = %e, "Could not write back cred resource");
            }
        }
        tracing::info!(count = manager.list.creds.len(), "Credential manager ready");
        manager
    }

    /// Strict load for tooling: a missing resource is an empty list, anything
    /// unreadable is an error.
    pub fn load(db: &SvrDatabase) -> Result<Self, CredError> {
        let list = match db.read_resource(OIC_JSON_CRED_NAME) {
            Ok(bytes) => cred_list_from_cbor(&bytes, Uuid::nil())?,
            Err(StoreError::NotFound) => CredList::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { list })
    }

    pub fn list(&self) -> &CredList {
        &self.list
    }

    pub fn creds(&self) -> &[Credential] {
        &self.list.creds
    }

    pub fn rowner(&self) -> Uuid {
        self.list.rowner
    }

    /// Smallest id not in use, starting from 1.
    pub fn next_cred_id(&self) -> Result<u16, CredError> {
        next_cred_id(&self.list)
    }

    /// Assign an id, validate, collapse duplicates and persist.
    ///
    /// Returns the id the credential ended up under; for a duplicate that is
    /// the existing entry's id and the list does not grow.
    pub fn add(&mut self, db: &SvrDatabase, cred: Credential) -> Result<u16, CredError> {
        self.mutate(db, |list| insert(list, cred))
    }

    /// Apply several credentials and an optional rowner change as one write.
    pub fn commit(
        &mut self,
        db: &SvrDatabase,
        pending: Vec<PendingCred>,
        rowner: Uuid,
    ) -> Result<Vec<u16>, CredError> {
        self.mutate(db, |list| {
            let mut ids = Vec::with_capacity(pending.len());
            for PendingCred { cred, replace_subject } in pending {
                if replace_subject {
                    let subject = cred.subject;
                    list.creds.retain(|c| c.subject != subject);
                }
                ids.push(insert(list, cred)?);
            }
            if !rowner.is_nil() {
                list.rowner = rowner;
            }
            Ok(ids)
        })
    }

    /// Drop every credential for `subject`. `Ok(false)` means none matched.
    pub fn remove_by_subject(&mut self, db: &SvrDatabase, subject: &Subject) -> Result<bool, CredError> {
        if !self.list.creds.iter().any(|c| c.subject == *subject) {
            return Ok(false);
        }
        self.mutate(db, |list| {
            list.creds.retain(|c| c.subject != *subject);
            Ok(())
        })?;
        tracing::info!(%subject, "Credentials removed");
        Ok(true)
    }

    pub fn remove_by_id(&mut self, db: &SvrDatabase, cred_id: u16) -> Result<bool, CredError> {
        if cred_id == 0 {
            return Err(CredError::InvalidParameter("credential id 0"));
        }
        if !self.list.creds.iter().any(|c| c.cred_id == cred_id) {
            return Ok(false);
        }
        self.mutate(db, |list| {
            list.creds.retain(|c| c.cred_id != cred_id);
            Ok(())
        })?;
        tracing::info!(cred_id, "Credential removed");
        Ok(true)
    }

    /// Drop every credential whose id is listed, as one write. Returns how
    /// many were removed.
    pub fn remove_by_ids(&mut self, db: &SvrDatabase, cred_ids: &[u16]) -> Result<usize, CredError> {
        let count = self.list.creds.iter().filter(|c| cred_ids.contains(&c.cred_id)).count();
        if count == 0 {
            return Ok(0);
        }
        self.mutate(db, |list| {
            list.creds.retain(|c| !cred_ids.contains(&c.cred_id));
            Ok(())
        })?;
        tracing::info!(?cred_ids, count, "Credentials removed");
        Ok(count)
    }

    pub fn remove_all(&mut self, db: &SvrDatabase) -> Result<(), CredError> {
        self.mutate(db, |list| {
            list.creds.clear();
            Ok(())
        })?;
        tracing::info!("All credentials removed");
        Ok(())
    }

    /// First credential for `subject`, in list order.
    pub fn lookup(&self, subject: &Subject) -> Option<&Credential> {
        self.list.creds.iter().find(|c| c.subject == *subject)
    }

    /// A detached copy of the credential with `cred_id`.
    pub fn get_by_cred_id(&self, cred_id: u16) -> Option<Credential> {
        self.list.creds.iter().find(|c| c.cred_id == cred_id).cloned()
    }

    pub fn set_rowner(&mut self, db: &SvrDatabase, rowner: Uuid) -> Result<(), CredError> {
        self.mutate(db, |list| {
            list.rowner = rowner;
            Ok(())
        })
    }

    /// Pairwise key for a TLS PSK handshake with `subject`.
    pub fn psk_for_subject(&self, subject: &Uuid) -> Option<Zeroizing<Vec<u8>>> {
        let cred = self.list.creds.iter().find(|c| {
            c.cred_type == CredType::SymmetricPairWiseKey && c.subject == Subject::Id(*subject)
        })?;
        let key = cred.private_data.as_ref()?;
        match key.data().decoded() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(cred_id = cred.cred_id, error = %e, "Stored PSK is not valid base64");
                None
            }
        }
    }

    /// Install a wildcard-subject PIN credential, replacing any earlier one.
    pub fn add_preconfigured_pin(&mut self, db: &SvrDatabase, pin: &str) -> Result<u16, CredError> {
        if pin.len() < PRECONF_PIN_MIN_SIZE {
            return Err(CredError::InvalidParameter("preconfigured PIN too short"));
        }
        let cred = Credential::new(Subject::Wildcard, CredType::PinPassword)
            .with_private_data(PrivateKey::raw(pin.as_bytes()));
        let ids = self.commit(db, vec![PendingCred { cred, replace_subject: true }], Uuid::nil())?;
        tracing::info!("Preconfigured PIN installed");
        ids.first().copied().ok_or(CredError::InvalidParameter("no credential committed"))
    }

    /// Derive a temporary PSK for `subject` from `pin`, salted with `rowner`.
    pub fn add_temp_psk_with_pin(
        &mut self,
        db: &SvrDatabase,
        crypto: &dyn CryptoProvider,
        subject: &Uuid,
        cred_type: CredType,
        pin: &str,
        rowner: &Uuid,
    ) -> Result<u16, CredError> {
        if pin.is_empty() || subject.is_nil() {
            return Err(CredError::InvalidParameter("temporary PSK needs a subject and a PIN"));
        }
        let key = crypto.derive_key_from_pin(pin.as_bytes(), rowner.as_bytes(), OWNER_PSK_LENGTH_128)?;
        let cred = Credential::new(*subject, cred_type).with_private_data(PrivateKey::raw(&key));
        let ids = self.commit(db, vec![PendingCred { cred, replace_subject: false }], *rowner)?;
        ids.first().copied().ok_or(CredError::InvalidParameter("no credential committed"))
    }

    pub fn to_cbor(&self, secure: bool) -> Result<Zeroizing<Vec<u8>>, CodecError> {
        cred_list_to_cbor(&self.list, secure)
    }

    fn mutate<T>(
        &mut self,
        db: &SvrDatabase,
        op: impl FnOnce(&mut CredList) -> Result<T, CredError>,
    ) -> Result<T, CredError> {
        let mut working = self.list.clone();
        let out = op(&mut working)?;
        persist(db, &working)?;
        self.list = working;
        Ok(out)
    }
}

/// An empty list is still written while it carries a rowner; only a list
/// with neither drops the entry.
fn persist(db: &SvrDatabase, list: &CredList) -> Result<(), CredError> {
    if list.creds.is_empty() && list.rowner.is_nil() {
        db.write_resource(OIC_JSON_CRED_NAME, &[])?;
        return Ok(());
    }
    let payload = cred_list_to_cbor(list, false)?;
    db.write_resource(OIC_JSON_CRED_NAME, &payload)?;
    Ok(())
}

fn next_cred_id(list: &CredList) -> Result<u16, CredError> {
    let mut ids: Vec<u16> = list.creds.iter().map(|c| c.cred_id).collect();
    ids.sort_unstable();
    let mut candidate: u16 = 1;
    for id in ids {
        if id == candidate {
            candidate = candidate.checked_add(1).ok_or(CredError::IdsExhausted)?;
        } else if id > candidate {
            break;
        }
    }
    if candidate == u16::MAX {
        return Err(CredError::IdsExhausted);
    }
    Ok(candidate)
}

fn insert(list: &mut CredList, mut cred: Credential) -> Result<u16, CredError> {
    list.creds.sort_by_key(|c| c.cred_id);
    cred.cred_id = next_cred_id(list)?;
    cred.validate().map_err(CredError::Invalid)?;

    for existing in &list.creds {
        match compare(existing, &cred) {
            CredCompare::Equal => {
                tracing::warn!(cred_id = existing.cred_id, "Duplicate credential, keeping existing id");
                return Ok(existing.cred_id);
            }
            CredCompare::Incomparable => return Err(CredError::Incomparable(existing.cred_id)),
            CredCompare::NotEqual => {}
        }
    }
    let id = cred.cred_id;
    list.creds.push(cred);
    tracing::debug!(cred_id = id, "Credential added");
    Ok(id)
}

fn compare(l: &Credential, r: &Credential) -> CredCompare {
    if l.cred_type != r.cred_type || l.subject != r.subject {
        return CredCompare::NotEqual;
    }
    let mut compared = false;
    let mut check = |pair: Option<bool>| -> bool {
        match pair {
            Some(same) => {
                compared = true;
                same
            }
            None => true,
        }
    };

    let private = both(&l.private_data, &r.private_data, |a, b| a.data() == b.data());
    let public = both(&l.public_data, &r.public_data, |a, b| a == b);
    let optional = both(&l.optional_data, &r.optional_data, |a, b| a == b);
    let usage = both(&l.cred_usage, &r.cred_usage, |a, b| a == b);

    let same = match l.cred_type {
        CredType::SymmetricPairWiseKey | CredType::SymmetricGroupKey | CredType::PinPassword => {
            check(private)
        }
        CredType::AsymmetricKey | CredType::SignedAsymmetricKey => {
            check(public) && check(optional) && check(usage)
        }
        CredType::AsymmetricEncryptionKey => check(private) && check(public) && check(optional),
    };

    if !same {
        CredCompare::NotEqual
    } else if compared {
        CredCompare::Equal
    } else {
        CredCompare::Incomparable
    }
}

/// `Some(eq(a, b))` when both sides carry the field.
fn both<T>(l: &Option<T>, r: &Option<T>, eq: impl Fn(&T, &T) -> bool) -> Option<bool> {
    match (l, r) {
        (Some(a), Some(b)) => Some(eq(a, b)),
        _ => None,
    }
}
