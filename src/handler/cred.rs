use base64::{engine::general_purpose::STANDARD, Engine};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cbor::{uuid_from_wire, WILDCARD_RESOURCE_URI};
use crate::config::OWNER_PSK_LENGTH_128;
use crate::context::SvrContext;
use crate::cred::manager::PendingCred;
use crate::cred::{
    cred_list_from_cbor, is_valid_access_for_sub_owner, CredList, CredType, Credential, KeyData,
    KeyEncoding, PrivateKey, Subject,
};
use crate::crypto::{CryptoProvider, TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256};
use crate::doxm::Doxm;
use crate::error::{Error, Result};

use super::{is_retransmission, Adapter, EhResult, Method, Request, Response};

const SUBJECT_QUERY_KEY: &str = "subjectuuid";
const CREDID_QUERY_KEY: &str = "credid";

/// What a DELETE query selects.
#[derive(Debug, PartialEq, Eq)]
enum DeleteTarget {
    Ids(Vec<u16>),
    Subject(Subject),
    All,
}

impl<D: Doxm, C: CryptoProvider> SvrContext<D, C> {
    pub(crate) fn handle_cred(&mut self, req: &Request) -> Response {
        match req.method {
            Method::Get => self.handle_cred_get(),
            Method::Post | Method::Put => self.handle_cred_post(req),
            Method::Delete => self.handle_cred_delete(req),
        }
    }

    fn handle_cred_get(&self) -> Response {
        match self.creds.to_cbor(true) {
            Ok(payload) => Response::with_payload(EhResult::Ok, payload.to_vec()),
            Err(e) => {
                tracing::warn!(error = %e, "Encoding cred for GET failed");
                Response::status(EhResult::Error)
            }
        }
    }

    fn handle_cred_post(&mut self, req: &Request) -> Response {
        let list = match cred_list_from_cbor(&req.payload, Uuid::nil()) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed cred POST payload");
                return Response::status(EhResult::Error);
            }
        };
        let is_dup = is_retransmission(req, self.last_cred_message_id);
        let owner = self.doxm.owner();
        // an owner PSK only exists while a transfer to `owner` is in flight
        let transfer_owner = (!self.doxm.is_owned() && !owner.is_nil()).then_some(owner);
        let carries_owner_psk = transfer_owner
            .is_some_and(|owner| list.creds.iter().any(|c| c.subject == Subject::Id(owner)));

        let result = if list.creds.is_empty() {
            if list.rowner.is_nil() {
                Err(Error::InvalidParameter("cred POST without credentials or rowner".into()))
            } else {
                self.creds.set_rowner(&self.db, list.rowner).map_err(Error::from)
            }
        } else {
            if let Some(id) = req.peer.identity.filter(|id| self.doxm.is_sub_owner(id)) {
                if !is_valid_access_for_sub_owner(&id, &req.payload) {
                    tracing::warn!(sub_owner = %id, "Sub-owner tried to write a credential it does not own");
                    return Response::status(EhResult::NotAcceptable);
                }
            }
            self.post_creds(req, list, transfer_owner)
        };

        match result {
            Ok(()) => {
                if req.peer.adapter == Adapter::Ip {
                    self.last_cred_message_id = Some(req.message_id);
                }
                Response::status(EhResult::Changed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cred POST failed");
                if carries_owner_psk && (req.peer.adapter == Adapter::Tcp || !is_dup) {
                    self.compensate_failed_transfer();
                }
                Response::status(EhResult::Error)
            }
        }
    }

    /// Store every credential of a POST in one write, so a failure leaves
    /// none of them behind. Owner and sub-owner PSKs are derived locally;
    /// anything else is stored as sent.
    fn post_creds(&mut self, req: &Request, list: CredList, transfer_owner: Option<Uuid>) -> Result<()> {
        let multiple_owner = self.doxm.is_owned() && self.doxm.multiple_owner_enabled();
        let mut installed_owner = None;
        let mut pending = Vec::with_capacity(list.creds.len());

        for cred in list.creds {
            match transfer_owner {
                Some(owner) if cred.subject == Subject::Id(owner) => {
                    pending.push(self.owner_psk(req, cred, owner)?);
                    installed_owner = Some(owner);
                }
                _ if multiple_owner && cred.has_no_key_material() => {
                    pending.push(self.sub_owner_psk(req, cred)?);
                }
                _ => pending.push(PendingCred { cred, replace_subject: false }),
            }
        }
        self.creds.commit(&self.db, pending, list.rowner)?;

        if let Some(owner) = installed_owner {
            // switch the transport from anonymous ECDH to the new owner PSK
            self.crypto.register_psk_lookup()?;
            self.crypto.enable_anon_ecdh(false)?;
            self.crypto
                .select_cipher_suite(TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256, &req.peer)?;
            tracing::info!(%owner, "Owner PSK installed");
        }
        Ok(())
    }

    /// Ownership transfer: derive the owner PSK locally. It replaces any
    /// earlier credential for the owner.
    fn owner_psk(&self, req: &Request, mut cred: Credential, owner: Uuid) -> Result<PendingCred> {
        if cred.cred_type != CredType::SymmetricPairWiseKey {
            return Err(Error::Validation(format!(
                "{:?} credential not accepted for the owner during ownership transfer",
                cred.cred_type
            )));
        }
        let psk = self.crypto.derive_owner_psk(
            &req.peer,
            self.doxm.oxm_label(),
            &owner,
            &self.doxm.device_id(),
            OWNER_PSK_LENGTH_128,
        )?;
        let encoding = cred.private_data.as_ref().map(|k| k.encoding());
        cred.private_data = Some(fill_psk(&psk, encoding, false)?);
        Ok(PendingCred { cred, replace_subject: true })
    }

    /// Multiple-owner extension: same as the owner path, keyed off the
    /// sub-owner's UUID.
    fn sub_owner_psk(&self, req: &Request, mut cred: Credential) -> Result<PendingCred> {
        if cred.cred_type != CredType::SymmetricPairWiseKey {
            return Err(Error::Validation(format!(
                "{:?} credential not accepted for a sub-owner",
                cred.cred_type
            )));
        }
        let sub_owner = cred
            .subject
            .id()
            .filter(|id| self.doxm.is_sub_owner(id))
            .ok_or_else(|| Error::Validation("subject is not a registered sub-owner".into()))?;

        let psk = self.crypto.derive_owner_psk(
            &req.peer,
            self.doxm.oxm_label(),
            &sub_owner,
            &self.doxm.device_id(),
            OWNER_PSK_LENGTH_128,
        )?;
        let encoding = cred.private_data.as_ref().map(|k| k.encoding());
        cred.private_data = Some(fill_psk(&psk, encoding, true)?);
        tracing::info!(%sub_owner, "Sub-owner PSK derived");
        Ok(PendingCred { cred, replace_subject: true })
    }

    fn handle_cred_delete(&mut self, req: &Request) -> Response {
        let Some(query) = req.query.as_deref().filter(|q| !q.trim().is_empty()) else {
            tracing::debug!("cred DELETE without query");
            return Response::status(EhResult::Error);
        };
        let Some(target) = delete_target(query) else {
            tracing::debug!(query, "cred DELETE with unusable credid or subjectuuid");
            return Response::status(EhResult::BadRequest);
        };

        let removed = match &target {
            DeleteTarget::Ids(ids) => self.creds.remove_by_ids(&self.db, ids).map(|n| n > 0),
            DeleteTarget::Subject(subject) => self.creds.remove_by_subject(&self.db, subject),
            DeleteTarget::All => self.creds.remove_all(&self.db).map(|()| true),
        };
        match removed {
            Ok(true) => Response::status(EhResult::ResourceDeleted),
            Ok(false) => Response::status(EhResult::ResourceNotFound),
            Err(e) => {
                tracing::warn!(error = %e, ?target, "cred DELETE failed");
                Response::status(EhResult::Error)
            }
        }
    }
}

/// Store a derived PSK in the encoding the client asked for.
fn fill_psk(psk: &[u8], requested: Option<KeyEncoding>, raw_by_default: bool) -> Result<PrivateKey> {
    match requested {
        Some(KeyEncoding::Raw) => Ok(PrivateKey::raw(psk)),
        None if raw_by_default => Ok(PrivateKey::raw(psk)),
        Some(KeyEncoding::Base64) => {
            let encoded = Zeroizing::new(STANDARD.encode(psk));
            Ok(PrivateKey::new(KeyData::Base64(encoded.as_bytes().to_vec())))
        }
        other => Err(Error::Validation(format!("PSK cannot be stored with encoding {other:?}"))),
    }
}

/// Parse a `&`/`;` separated DELETE query. `credid` may repeat and carry a
/// comma separated list; it wins over `subjectuuid` (a UUID or `*`). A query
/// naming neither selects every credential. `None` when a named key has an
/// unusable value.
fn delete_target(query: &str) -> Option<DeleteTarget> {
    let mut ids = Vec::new();
    let mut subject = None;
    for pair in query.split(['&', ';']) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case(CREDID_QUERY_KEY) {
            for token in value.split(',') {
                match token.trim().parse::<u16>() {
                    Ok(id) if id != 0 => ids.push(id),
                    _ => return None,
                }
            }
        } else if subject.is_none() && key.eq_ignore_ascii_case(SUBJECT_QUERY_KEY) {
            subject = Some(match value.trim() {
                WILDCARD_RESOURCE_URI => Subject::Wildcard,
                v => Subject::Id(uuid_from_wire(v).ok()?),
            });
        }
    }

    Some(match subject {
        _ if !ids.is_empty() => DeleteTarget::Ids(ids),
        Some(subject) => DeleteTarget::Subject(subject),
        None => DeleteTarget::All,
    })
}
