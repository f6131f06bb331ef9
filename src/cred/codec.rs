use ciborium::value::Value;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cbor::{
    cbor_bool, cbor_get_str, encode_bounded, expect_array, expect_map, expect_text, expect_uint,
    expect_uuid, parse_cbor_map, require, resource_header, scrub, text, uint, uuid_from_wire,
    uuid_value, CodecError, OIC_JSON_ROWNERID_NAME, WILDCARD_RESOURCE_URI,
};
use crate::config::CRED_ENCODE_BUDGET;

use super::{CredList, CredType, Credential, KeyData, KeyEncoding, OptionalData, PrivateKey, Subject};

pub const OIC_RSRC_TYPE_SEC_CRED: &str = "oic.r.cred";

const OIC_JSON_CREDS_NAME: &str = "creds";
const OIC_JSON_CREDID_NAME: &str = "credid";
const OIC_JSON_SUBJECTID_NAME: &str = "subjectuuid";
const OIC_JSON_CREDTYPE_NAME: &str = "credtype";
const OIC_JSON_PRIVATEDATA_NAME: &str = "privatedata";
const OIC_JSON_PUBLICDATA_NAME: &str = "publicdata";
const OIC_JSON_OPTDATA_NAME: &str = "optionaldata";
const OIC_JSON_CREDUSAGE_NAME: &str = "credusage";
const OIC_JSON_PERIOD_NAME: &str = "period";
const OIC_JSON_EOWNERID_NAME: &str = "eowneruuid";
const OIC_JSON_DATA_NAME: &str = "data";
const OIC_JSON_ENCODING_NAME: &str = "encoding";
const OIC_JSON_REVOCATION_STATUS_NAME: &str = "revstat";

// ---- encode ----

/// Serialize the credential list. With `secure` set, private data is left out.
///
/// The returned buffer is wiped on drop; the intermediate `Value` tree is
/// scrubbed before this returns.
pub fn cred_list_to_cbor(list: &CredList, secure: bool) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    let mut root = build_root(list, secure)?;
    let encoded = encode_bounded(&root, CRED_ENCODE_BUDGET);
    scrub(&mut root);
    encoded.map(Zeroizing::new)
}

fn build_root(list: &CredList, secure: bool) -> Result<Value, CodecError> {
    let creds = list
        .creds
        .iter()
        .map(|cred| encode_cred(cred, secure))
        .collect::<Result<Vec<_>, _>>()?;

    let mut root = vec![
        (text(OIC_JSON_CREDS_NAME), Value::Array(creds)),
        (text(OIC_JSON_ROWNERID_NAME), uuid_value(&list.rowner)),
    ];
    root.extend(resource_header(OIC_RSRC_TYPE_SEC_CRED));
    Ok(Value::Map(root))
}

fn encode_cred(cred: &Credential, secure: bool) -> Result<Value, CodecError> {
    let subject = match cred.subject {
        Subject::Wildcard => text(WILDCARD_RESOURCE_URI),
        Subject::Id(id) => uuid_value(&id),
    };
    let mut map = vec![
        (text(OIC_JSON_CREDID_NAME), uint(cred.cred_id.into())),
        (text(OIC_JSON_SUBJECTID_NAME), subject),
        (text(OIC_JSON_CREDTYPE_NAME), uint(cred.cred_type.bits())),
    ];

    if !secure {
        if let Some(key) = cred.private_data.as_ref().filter(|k| !k.is_empty()) {
            map.push((text(OIC_JSON_PRIVATEDATA_NAME), key_data_map(key.data(), None)?));
        }
    }
    if let Some(public) = cred.public_data.as_ref().filter(|k| !k.is_empty()) {
        map.push((text(OIC_JSON_PUBLICDATA_NAME), key_data_map(public, None)?));
    }
    if let Some(opt) = cred.optional_data.as_ref().filter(|o| !o.data.is_empty()) {
        map.push((text(OIC_JSON_OPTDATA_NAME), key_data_map(&opt.data, Some(opt.revstat))?));
    }
    if let Some(usage) = cred.cred_usage.as_deref().filter(|s| !s.is_empty()) {
        map.push((text(OIC_JSON_CREDUSAGE_NAME), text(usage)));
    }
    if let Some(period) = cred.period.as_deref().filter(|s| !s.is_empty()) {
        map.push((text(OIC_JSON_PERIOD_NAME), text(period)));
    }
    if let Some(eowner) = cred.eowner_id {
        map.push((text(OIC_JSON_EOWNERID_NAME), uuid_value(&eowner)));
    }
    Ok(Value::Map(map))
}

/// `{"data": .., "encoding": ..}`, plus `revstat` for optional data.
fn key_data_map(key: &KeyData, revstat: Option<bool>) -> Result<Value, CodecError> {
    let data = if key.encoding().is_text() {
        let s = std::str::from_utf8(key.as_bytes())
            .map_err(|_| CodecError::WrongType(OIC_JSON_DATA_NAME))?;
        text(s)
    } else {
        Value::Bytes(key.as_bytes().to_vec())
    };
    let mut map = vec![
        (text(OIC_JSON_DATA_NAME), data),
        (text(OIC_JSON_ENCODING_NAME), text(key.encoding().as_wire())),
    ];
    if let Some(revstat) = revstat {
        map.push((text(OIC_JSON_REVOCATION_STATUS_NAME), Value::Bool(revstat)));
    }
    Ok(Value::Map(map))
}

// ---- decode ----

/// Parse a cred document. `fallback_rowner` is used when the payload has no
/// `rowneruuid`.
///
/// Any malformed credential fails the whole list.
pub fn cred_list_from_cbor(data: &[u8], fallback_rowner: Uuid) -> Result<CredList, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    let mut root = Value::Map(parse_cbor_map(data)?);
    let result = decode_root(&root, fallback_rowner);
    scrub(&mut root);
    result
}

fn decode_root(root: &Value, fallback_rowner: Uuid) -> Result<CredList, CodecError> {
    let map = expect_map(root, "cred")?;

    let creds = match cbor_get_str(map, OIC_JSON_CREDS_NAME) {
        Some(v) => expect_array(v, OIC_JSON_CREDS_NAME)?
            .iter()
            .map(decode_cred)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let rowner = match cbor_get_str(map, OIC_JSON_ROWNERID_NAME) {
        Some(v) => expect_uuid(v, OIC_JSON_ROWNERID_NAME)?,
        None => fallback_rowner,
    };
    Ok(CredList { creds, rowner })
}

fn decode_cred(v: &Value) -> Result<Credential, CodecError> {
    let map = expect_map(v, OIC_JSON_CREDS_NAME)?;

    let cred_id = match cbor_get_str(map, OIC_JSON_CREDID_NAME) {
        Some(v) => u16::try_from(expect_uint(v, OIC_JSON_CREDID_NAME)?)
            .map_err(|_| CodecError::OutOfRange(OIC_JSON_CREDID_NAME))?,
        None => 0,
    };

    let subject = match expect_text(require(map, OIC_JSON_SUBJECTID_NAME)?, OIC_JSON_SUBJECTID_NAME)? {
        WILDCARD_RESOURCE_URI => Subject::Wildcard,
        s => Subject::Id(uuid_from_wire(s)?),
    };
    let cred_type = CredType::try_from(expect_uint(
        require(map, OIC_JSON_CREDTYPE_NAME)?,
        OIC_JSON_CREDTYPE_NAME,
    )?)?;

    let mut cred = Credential::new(subject, cred_type);
    cred.cred_id = cred_id;

    if let Some(v) = cbor_get_str(map, OIC_JSON_PRIVATEDATA_NAME) {
        let key = decode_key_data(expect_map(v, OIC_JSON_PRIVATEDATA_NAME)?, OIC_JSON_PRIVATEDATA_NAME)?;
        let key = match key {
            KeyData::Der(bytes) | KeyData::Pem(bytes) => {
                tracing::warn!(cred_id, "Private data must be raw or base64, storing as raw");
                KeyData::Raw(bytes)
            }
            other => other,
        };
        cred.private_data = Some(PrivateKey::new(key));
    }
    if let Some(v) = cbor_get_str(map, OIC_JSON_PUBLICDATA_NAME) {
        cred.public_data = Some(decode_key_data(
            expect_map(v, OIC_JSON_PUBLICDATA_NAME)?,
            OIC_JSON_PUBLICDATA_NAME,
        )?);
    }
    if let Some(v) = cbor_get_str(map, OIC_JSON_OPTDATA_NAME) {
        let opt = expect_map(v, OIC_JSON_OPTDATA_NAME)?;
        let data = decode_key_data(opt, OIC_JSON_OPTDATA_NAME)?;
        let revstat = cbor_get_str(opt, OIC_JSON_REVOCATION_STATUS_NAME)
            .and_then(cbor_bool)
            .unwrap_or(false);
        cred.optional_data = Some(OptionalData { data, revstat });
    }
    if let Some(v) = cbor_get_str(map, OIC_JSON_CREDUSAGE_NAME) {
        cred.cred_usage = Some(expect_text(v, OIC_JSON_CREDUSAGE_NAME)?.to_string());
    }
    if let Some(v) = cbor_get_str(map, OIC_JSON_PERIOD_NAME) {
        cred.period = Some(expect_text(v, OIC_JSON_PERIOD_NAME)?.to_string());
    }
    match cbor_get_str(map, OIC_JSON_EOWNERID_NAME) {
        Some(Value::Text(s)) => cred.eowner_id = Some(uuid_from_wire(s)?),
        Some(_) => tracing::warn!(cred_id, "Ignoring non-text eowneruuid"),
        None => {}
    }
    Ok(cred)
}

/// Decode a `{data, encoding}` sub-map. Unknown or missing encoding tags fall
/// back to raw; the data may arrive as either a byte or a text string.
fn decode_key_data(map: &[(Value, Value)], field: &'static str) -> Result<KeyData, CodecError> {
    let encoding = match cbor_get_str(map, OIC_JSON_ENCODING_NAME) {
        Some(v) => {
            let tag = expect_text(v, OIC_JSON_ENCODING_NAME)?;
            KeyEncoding::from_wire(tag).unwrap_or_else(|| {
                tracing::warn!(field, encoding = tag, "Unknown key encoding, treating as raw");
                KeyEncoding::Raw
            })
        }
        None => {
            tracing::warn!(field, "Key encoding missing, treating as raw");
            KeyEncoding::Raw
        }
    };
    let bytes = match cbor_get_str(map, OIC_JSON_DATA_NAME) {
        Some(Value::Bytes(b)) => b.clone(),
        Some(Value::Text(s)) => s.as_bytes().to_vec(),
        Some(_) => return Err(CodecError::WrongType(OIC_JSON_DATA_NAME)),
        None => Vec::new(),
    };
    Ok(KeyData::new(encoding, bytes))
}

/// A sub-owner may only touch credentials it is the `eowneruuid` of: the
/// first credential in `payload` must name `uuid`.
pub fn is_valid_access_for_sub_owner(uuid: &Uuid, payload: &[u8]) -> bool {
    match cred_list_from_cbor(payload, Uuid::nil()) {
        Ok(list) => list
            .creds
            .first()
            .and_then(|c| c.eowner_id)
            .is_some_and(|eowner| eowner == *uuid),
        Err(e) => {
            tracing::debug!(error = %e, "Sub-owner access check could not decode payload");
            false
        }
    }
}
