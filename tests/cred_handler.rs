use std::cell::RefCell;

use ciborium::value::Value;
use uuid::Uuid;
use zeroize::Zeroizing;

use svrdb::cred::{cred_list_from_cbor, CredType, CredentialManager, KeyEncoding, Subject};
use svrdb::crypto::{CryptoError, CryptoProvider};
use svrdb::doxm::DoxmState;
use svrdb::handler::{Adapter, EhResult, Method, Peer, Request, OIC_RSRC_CRED_URI};
use svrdb::pstat::{Dpm, Pstat};
use svrdb::store::{MemoryStorage, SvrDatabase};
use svrdb::SvrContext;

const OWNER: Uuid = Uuid::from_bytes([0x0A; 16]);
const DEVICE: Uuid = Uuid::from_bytes([0xDE; 16]);
const SUB_OWNER: Uuid = Uuid::from_bytes([0x5B; 16]);

#[derive(Default)]
struct FakeCrypto {
    calls: RefCell<Vec<String>>,
    fail_derive: bool,
}

impl FakeCrypto {
    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CryptoProvider for FakeCrypto {
    fn derive_owner_psk(
        &self,
        _peer: &Peer,
        _oxm_label: &[u8],
        owner: &Uuid,
        _device: &Uuid,
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.calls.borrow_mut().push(format!("derive:{owner}"));
        if self.fail_derive {
            return Err(CryptoError::Derivation("test".into()));
        }
        Ok(Zeroizing::new(vec![0x42; len]))
    }

    fn derive_key_from_pin(&self, pin: &[u8], _salt: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        Ok(Zeroizing::new(vec![pin.first().copied().unwrap_or(0); len]))
    }

    fn enable_anon_ecdh(&self, enabled: bool) -> Result<(), CryptoError> {
        self.calls.borrow_mut().push(format!("anon:{enabled}"));
        Ok(())
    }

    fn select_cipher_suite(&self, suite: u16, _peer: &Peer) -> Result<(), CryptoError> {
        self.calls.borrow_mut().push(format!("suite:{suite:#06x}"));
        Ok(())
    }

    fn register_psk_lookup(&self) -> Result<(), CryptoError> {
        self.calls.borrow_mut().push("psk-lookup".into());
        Ok(())
    }
}

fn tv(s: &str) -> Value { Value::Text(s.to_string()) }
fn iv(n: u64) -> Value { Value::Integer(n.into()) }
fn mv(pairs: Vec<(&str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (tv(k), v)).collect())
}

fn to_bytes(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(v, &mut out).unwrap();
    out
}

/// One `creds` entry, optionally with a `privatedata` sub-map.
fn cred_entry(subject: &Uuid, cred_type: u64, private: Option<(Value, &str)>) -> Value {
    let mut cred = vec![("subjectuuid", tv(&subject.to_string())), ("credtype", iv(cred_type))];
    if let Some((data, encoding)) = private {
        cred.push(("privatedata", mv(vec![("data", data), ("encoding", tv(encoding))])));
    }
    mv(cred)
}

fn creds_payload(creds: Vec<Value>) -> Vec<u8> {
    to_bytes(&mv(vec![("creds", Value::Array(creds)), ("rowneruuid", tv(&OWNER.to_string()))]))
}

fn cred_payload(subject: &Uuid, cred_type: u64, private: Option<(Value, &str)>) -> Vec<u8> {
    creds_payload(vec![cred_entry(subject, cred_type, private)])
}

fn raw(bytes: Vec<u8>) -> Option<(Value, &'static str)> {
    Some((Value::Bytes(bytes), "oic.sec.encoding.raw"))
}

fn request(method: Method, payload: Vec<u8>, message_id: u16) -> Request {
    Request {
        method,
        payload,
        query: None,
        peer: Peer { address: "192.168.1.20:5684".into(), adapter: Adapter::Ip, identity: None },
        message_id,
    }
}

fn unowned_context(crypto: FakeCrypto) -> SvrContext<DoxmState, FakeCrypto> {
    let doxm = DoxmState {
        device_id: DEVICE,
        owner: OWNER,
        owned: false,
        oxm_label: b"oic.sec.doxm.jw".to_vec(),
        ..Default::default()
    };
    SvrContext::init(SvrDatabase::new(MemoryStorage::new()), doxm, crypto)
}

fn owned_context() -> SvrContext<DoxmState, FakeCrypto> {
    let doxm = DoxmState {
        device_id: DEVICE,
        owner: OWNER,
        owned: true,
        mom_enabled: true,
        sub_owners: vec![SUB_OWNER],
        ..Default::default()
    };
    SvrContext::init(SvrDatabase::new(MemoryStorage::new()), doxm, FakeCrypto::default())
}

/// Move pstat off its initial state so a compensating restore is visible.
fn enter_provisioning(ctx: &mut SvrContext<DoxmState, FakeCrypto>) {
    let update = Pstat { cm: Dpm::NORMAL, is_op: false, ..ctx.pstat.pstat().clone() };
    ctx.pstat.apply_update(&ctx.db, &update).unwrap();
    assert!(!ctx.pstat.cm().contains(Dpm::TAKE_OWNER));
}

// ---- owner PSK ----

#[test]
fn test_owner_psk_raw() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let payload = cred_payload(&OWNER, 1, Some((Value::Bytes(vec![]), "oic.sec.encoding.raw")));

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Changed);

    let cred = ctx.creds.lookup(&Subject::Id(OWNER)).unwrap();
    assert_eq!(cred.cred_type, CredType::SymmetricPairWiseKey);
    assert_eq!(cred.private_data.as_ref().unwrap().as_bytes(), &[0x42; 16]);
    assert_eq!(
        ctx.crypto.calls(),
        vec![
            format!("derive:{OWNER}"),
            "psk-lookup".to_string(),
            "anon:false".to_string(),
            "suite:0xc037".to_string(),
        ]
    );
    assert_eq!(ctx.creds.psk_for_subject(&OWNER).unwrap().as_slice(), &[0x42; 16]);
}

#[test]
fn test_owner_psk_base64() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let payload = cred_payload(&OWNER, 1, Some((tv(""), "oic.sec.encoding.base64")));

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Changed);

    let key = ctx.creds.lookup(&Subject::Id(OWNER)).unwrap().private_data.clone().unwrap();
    assert_eq!(key.encoding(), KeyEncoding::Base64);
    assert_eq!(ctx.creds.psk_for_subject(&OWNER).unwrap().as_slice(), &[0x42; 16]);
}

#[test]
fn test_owner_psk_replaces_previous_owner_credential() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let payload = cred_payload(&OWNER, 1, Some((Value::Bytes(vec![]), "oic.sec.encoding.raw")));
    ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload.clone(), 1));
    ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 2));
    assert_eq!(ctx.creds.creds().len(), 1);
}

#[test]
fn test_owner_psk_wrong_type_compensates() {
    let mut ctx = unowned_context(FakeCrypto::default());
    enter_provisioning(&mut ctx);

    let payload = cred_payload(&OWNER, 2, Some((Value::Bytes(vec![1; 16]), "oic.sec.encoding.raw")));
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Error);

    assert!(ctx.creds.creds().is_empty());
    assert!(ctx.doxm.owner.is_nil());
    assert!(ctx.pstat.cm().contains(Dpm::TAKE_OWNER));
}

#[test]
fn test_non_owner_credential_during_transfer_is_stored_as_sent() {
    let mut ctx = unowned_context(FakeCrypto::default());
    enter_provisioning(&mut ctx);
    let peer = Uuid::from_bytes([0x77; 16]);
    let payload = cred_payload(&peer, 1, raw(vec![0x77; 16]));

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Changed);
    assert_eq!(ctx.creds.psk_for_subject(&peer).unwrap().as_slice(), &[0x77; 16]);
    // no derivation, no transport switch, no restore
    assert!(ctx.crypto.calls().is_empty());
    assert_eq!(ctx.doxm.owner, OWNER);
    assert!(!ctx.pstat.cm().contains(Dpm::TAKE_OWNER));
}

#[test]
fn test_trust_anchor_during_transfer_is_stored() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let ca = Uuid::from_bytes([0xCA; 16]);
    let mut cert = cred_entry(&ca, 8, None);
    if let Value::Map(fields) = &mut cert {
        fields.push((
            tv("publicdata"),
            mv(vec![("data", Value::Bytes(vec![0x30, 0x82, 0x01])), ("encoding", tv("oic.sec.encoding.der"))]),
        ));
    }

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, creds_payload(vec![cert]), 1));
    assert_eq!(resp.result, EhResult::Changed);
    assert_eq!(ctx.creds.lookup(&Subject::Id(ca)).unwrap().cred_type, CredType::SignedAsymmetricKey);
    assert_eq!(ctx.doxm.owner, OWNER);
}

#[test]
fn test_owner_psk_and_peer_psk_in_one_post() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let peer = Uuid::from_bytes([0x31; 16]);
    let payload = creds_payload(vec![
        cred_entry(&OWNER, 1, raw(vec![])),
        cred_entry(&peer, 1, raw(vec![0xC3; 16])),
    ]);

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Changed);
    assert_eq!(ctx.creds.creds().len(), 2);
    assert_eq!(ctx.creds.psk_for_subject(&OWNER).unwrap().as_slice(), &[0x42; 16]);
    assert_eq!(ctx.creds.psk_for_subject(&peer).unwrap().as_slice(), &[0xC3; 16]);
    assert_eq!(ctx.crypto.calls().last().unwrap(), "suite:0xc037");
}

#[test]
fn test_failing_second_credential_discards_owner_psk() {
    let mut ctx = unowned_context(FakeCrypto::default());
    enter_provisioning(&mut ctx);
    let peer = Uuid::from_bytes([0x31; 16]);
    // pairwise key without key material cannot be stored
    let payload = creds_payload(vec![cred_entry(&OWNER, 1, raw(vec![])), cred_entry(&peer, 1, None)]);

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Error);
    assert!(ctx.creds.creds().is_empty());
    assert!(CredentialManager::load(&ctx.db).unwrap().creds().is_empty());
    assert!(ctx.doxm.owner.is_nil());
    assert!(ctx.pstat.cm().contains(Dpm::TAKE_OWNER));
}

#[test]
fn test_owner_psk_derivation_failure_compensates() {
    let mut ctx = unowned_context(FakeCrypto { fail_derive: true, ..Default::default() });
    enter_provisioning(&mut ctx);

    let payload = cred_payload(&OWNER, 1, Some((Value::Bytes(vec![]), "oic.sec.encoding.raw")));
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Error);
    assert!(ctx.pstat.cm().contains(Dpm::TAKE_OWNER));
    // transport untouched
    assert_eq!(ctx.crypto.calls(), vec![format!("derive:{OWNER}")]);
}

#[test]
fn test_owner_psk_without_private_encoding_fails() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let payload = cred_payload(&OWNER, 1, None);
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Error);
}

// ---- retransmission ----

#[test]
fn test_retransmitted_owner_psk_reapplies_transport() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let payload = cred_payload(&OWNER, 1, Some((Value::Bytes(vec![]), "oic.sec.encoding.raw")));

    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload.clone(), 7)).result, EhResult::Changed);
    let first = ctx.crypto.calls();
    assert_eq!(first.len(), 4);
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 7)).result, EhResult::Changed);

    let calls = ctx.crypto.calls();
    assert_eq!(calls[4..], first[..]);
    assert_eq!(ctx.creds.creds().len(), 1);
}

#[test]
fn test_retransmitted_failure_skips_compensation() {
    let mut ctx = unowned_context(FakeCrypto::default());
    let good = cred_payload(&OWNER, 1, Some((Value::Bytes(vec![]), "oic.sec.encoding.raw")));
    ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, good, 7));

    let bad = cred_payload(&OWNER, 2, Some((Value::Bytes(vec![1; 16]), "oic.sec.encoding.raw")));
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, bad.clone(), 7)).result, EhResult::Error);
    assert_eq!(ctx.doxm.owner, OWNER);

    // over TCP there are no message ids, so the restore always runs
    let mut tcp = request(Method::Post, bad, 7);
    tcp.peer.adapter = Adapter::Tcp;
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &tcp).result, EhResult::Error);
    assert!(ctx.doxm.owner.is_nil());
}

// ---- sub-owner ----

#[test]
fn test_sub_owner_psk_defaults_to_raw() {
    let mut ctx = owned_context();
    let payload = cred_payload(&SUB_OWNER, 1, None);

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Changed);

    let key = ctx.creds.lookup(&Subject::Id(SUB_OWNER)).unwrap().private_data.clone().unwrap();
    assert_eq!(key.encoding(), KeyEncoding::Raw);
    assert_eq!(key.as_bytes(), &[0x42; 16]);
    assert_eq!(ctx.crypto.calls(), vec![format!("derive:{SUB_OWNER}")]);
}

#[test]
fn test_sub_owner_psk_rejects_unknown_subject() {
    let mut ctx = owned_context();
    let payload = cred_payload(&Uuid::from_bytes([0x99; 16]), 1, None);
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::Error);
    assert!(ctx.creds.creds().is_empty());
}

// ---- plain CRUD ----

#[test]
fn test_owned_post_adds_and_get_redacts() {
    let mut ctx = owned_context();
    let peer = Uuid::from_bytes([0x31; 16]);
    let secret = vec![0xC3; 16];
    let payload = cred_payload(&peer, 1, Some((Value::Bytes(secret.clone()), "oic.sec.encoding.raw")));

    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1)).result, EhResult::Changed);
    assert_eq!(ctx.creds.rowner(), OWNER);

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Get, vec![], 2));
    assert_eq!(resp.result, EhResult::Ok);
    assert!(!resp.payload.windows(secret.len()).any(|w| w == secret.as_slice()));
    let listed = cred_list_from_cbor(&resp.payload, Uuid::nil()).unwrap();
    assert_eq!(listed.creds.len(), 1);
    assert!(listed.creds[0].private_data.is_none());
}

#[test]
fn test_post_malformed_payload_is_error() {
    let mut ctx = owned_context();
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, vec![0xA1, 0x65], 1));
    assert_eq!(resp.result, EhResult::Error);
}

#[test]
fn test_post_empty_list_updates_rowner_only() {
    let mut ctx = owned_context();
    let new_rowner = Uuid::from_bytes([0x12; 16]);
    let payload = to_bytes(&mv(vec![
        ("creds", Value::Array(vec![])),
        ("rowneruuid", tv(&new_rowner.to_string())),
    ]));
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, payload, 1)).result, EhResult::Changed);
    assert_eq!(ctx.creds.rowner(), new_rowner);
    ctx.reload();
    assert_eq!(ctx.creds.rowner(), new_rowner);
    assert!(ctx.creds.creds().is_empty());

    let no_rowner = to_bytes(&mv(vec![("creds", Value::Array(vec![]))]));
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, no_rowner, 2)).result, EhResult::Error);
}

#[test]
fn test_sub_owner_cannot_write_foreign_credential() {
    let mut ctx = owned_context();
    let payload = cred_payload(&Uuid::from_bytes([0x31; 16]), 1, Some((Value::Bytes(vec![1; 16]), "oic.sec.encoding.raw")));
    let mut req = request(Method::Post, payload, 1);
    req.peer.identity = Some(SUB_OWNER);
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &req).result, EhResult::NotAcceptable);
}

/// Owned context holding pairwise keys for subjects 0x31, 0x32 and 0x33,
/// under cred ids 1, 2 and 3.
fn context_with_three_peers() -> SvrContext<DoxmState, FakeCrypto> {
    let mut ctx = owned_context();
    let creds = (0x31..=0x33u8)
        .map(|n| cred_entry(&Uuid::from_bytes([n; 16]), 1, raw(vec![n; 16])))
        .collect();
    assert_eq!(
        ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Post, creds_payload(creds), 1)).result,
        EhResult::Changed
    );
    assert_eq!(ctx.creds.creds().len(), 3);
    ctx
}

fn delete(query: Option<&str>) -> Request {
    let mut del = request(Method::Delete, vec![], 2);
    del.query = query.map(str::to_string);
    del
}

#[test]
fn test_delete_by_subject_query() {
    let mut ctx = context_with_three_peers();
    let peer = Uuid::from_bytes([0x31; 16]);

    let query = format!("subjectuuid={peer}");
    let del = delete(Some(query.as_str()));
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &del).result, EhResult::ResourceDeleted);
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &del).result, EhResult::ResourceNotFound);
    assert_eq!(ctx.creds.creds().len(), 2);

    let bad = delete(Some("subjectuuid=not-a-uuid"));
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &bad).result, EhResult::BadRequest);
    assert_eq!(ctx.creds.creds().len(), 2);
}

#[test]
fn test_delete_by_cred_ids() {
    let mut ctx = context_with_three_peers();

    let resp = ctx.handle(OIC_RSRC_CRED_URI, &delete(Some("credid=1&credid=3")));
    assert_eq!(resp.result, EhResult::ResourceDeleted);
    let left: Vec<u16> = ctx.creds.creds().iter().map(|c| c.cred_id).collect();
    assert_eq!(left, vec![2]);

    assert_eq!(
        ctx.handle(OIC_RSRC_CRED_URI, &delete(Some("credid=1,3"))).result,
        EhResult::ResourceNotFound
    );
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &delete(Some("credid=x"))).result, EhResult::BadRequest);
    assert_eq!(ctx.creds.creds().len(), 1);
}

#[test]
fn test_delete_without_query_is_error() {
    let mut ctx = context_with_three_peers();
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &delete(None)).result, EhResult::Error);
    assert_eq!(ctx.handle(OIC_RSRC_CRED_URI, &delete(Some(""))).result, EhResult::Error);
    assert_eq!(ctx.creds.creds().len(), 3);
}

#[test]
fn test_delete_with_unrelated_query_removes_all() {
    let mut ctx = context_with_three_peers();
    let resp = ctx.handle(OIC_RSRC_CRED_URI, &delete(Some("if=oic.if.baseline")));
    assert_eq!(resp.result, EhResult::ResourceDeleted);
    assert!(ctx.creds.creds().is_empty());

    ctx.reload();
    assert!(ctx.creds.creds().is_empty());
    assert_eq!(ctx.creds.rowner(), OWNER);
}

#[test]
fn test_put_is_handled_as_post() {
    let mut ctx = owned_context();
    let peer = Uuid::from_bytes([0x31; 16]);
    let payload = cred_payload(&peer, 1, raw(vec![0xC3; 16]));
    assert_eq!(
        ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Put, payload, 1)).result,
        EhResult::Changed
    );
    assert!(ctx.creds.lookup(&Subject::Id(peer)).is_some());
    assert_eq!(
        ctx.handle(OIC_RSRC_CRED_URI, &request(Method::Put, vec![], 2)).result,
        EhResult::Error
    );
    assert_eq!(
        ctx.handle("/oic/sec/nope", &request(Method::Get, vec![], 1)).result,
        EhResult::ResourceNotFound
    );
}

#[test]
fn test_temp_psk_with_pin() {
    let mut ctx = owned_context();
    let peer = Uuid::from_bytes([0x44; 16]);
    let id = ctx
        .creds
        .add_temp_psk_with_pin(&ctx.db, &ctx.crypto, &peer, CredType::SymmetricPairWiseKey, "98765432", &OWNER)
        .unwrap();
    let cred = ctx.creds.get_by_cred_id(id).unwrap();
    assert_eq!(cred.private_data.unwrap().as_bytes(), &[b'9'; 16]);
}

// ---- amacl ----

#[test]
fn test_amacl_post_then_get() {
    use svrdb::amacl::{amacl_from_cbor, amacl_to_cbor, AmaclEntry, AmaclList};
    use svrdb::handler::OIC_RSRC_AMACL_URI;

    let mut ctx = owned_context();
    let ams = Uuid::from_bytes([0x40; 16]);
    let payload = amacl_to_cbor(&AmaclList {
        entries: vec![AmaclEntry { resources: vec!["/oic/sh/light".into()], amss: vec![ams] }],
        rowner: OWNER,
    })
    .unwrap();

    let resp = ctx.handle(OIC_RSRC_AMACL_URI, &request(Method::Post, payload, 1));
    assert_eq!(resp.result, EhResult::ResourceCreated);
    assert_eq!(ctx.amacl.lookup_ams_for_resource("/oic/sh/light/1"), Some(ams));

    let resp = ctx.handle(OIC_RSRC_AMACL_URI, &request(Method::Get, vec![], 2));
    assert_eq!(resp.result, EhResult::Ok);
    assert_eq!(amacl_from_cbor(&resp.payload).unwrap().entries.len(), 1);

    assert_eq!(
        ctx.handle(OIC_RSRC_AMACL_URI, &request(Method::Post, vec![0xA0], 3)).result,
        EhResult::Error
    );
    assert_eq!(
        ctx.handle(OIC_RSRC_AMACL_URI, &request(Method::Delete, vec![], 4)).result,
        EhResult::MethodNotAllowed
    );
}
