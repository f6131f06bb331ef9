use ciborium::value::Value;

use crate::cbor::{
    cbor_bool, cbor_get_str, encode_bounded, expect_uint, expect_uuid, parse_cbor_map,
    resource_header, text, uint, uuid_value, CodecError, OIC_JSON_ROWNERID_NAME,
};
use crate::config::PSTAT_ENCODE_BUDGET;

use super::{Dpm, Dpom, Pstat};

pub const OIC_RSRC_TYPE_SEC_PSTAT: &str = "oic.r.pstat";

const OIC_JSON_ISOP_NAME: &str = "isop";
const OIC_JSON_CM_NAME: &str = "cm";
const OIC_JSON_TM_NAME: &str = "tm";
const OIC_JSON_OM_NAME: &str = "om";
const OIC_JSON_SM_NAME: &str = "sm";
const OIC_JSON_DEVICE_ID_NAME: &str = "deviceuuid";

pub fn pstat_to_cbor(pstat: &Pstat) -> Result<Vec<u8>, CodecError> {
    let mut map = vec![
        (text(OIC_JSON_ISOP_NAME), Value::Bool(pstat.is_op)),
        (text(OIC_JSON_DEVICE_ID_NAME), uuid_value(&pstat.device_id)),
        (text(OIC_JSON_CM_NAME), uint(pstat.cm.bits().into())),
        (text(OIC_JSON_TM_NAME), uint(pstat.tm.bits().into())),
        (text(OIC_JSON_OM_NAME), uint(pstat.om as u64)),
        (
            text(OIC_JSON_SM_NAME),
            Value::Array(pstat.sm.iter().map(|m| uint(*m as u64)).collect()),
        ),
        (text(OIC_JSON_ROWNERID_NAME), uuid_value(&pstat.rowner)),
    ];
    map.extend(resource_header(OIC_RSRC_TYPE_SEC_PSTAT));
    encode_bounded(&Value::Map(map), PSTAT_ENCODE_BUDGET)
}

/// Decode a pstat document on top of `current`: any key the payload lacks
/// keeps its current value, so partial updates decode cleanly.
pub fn pstat_from_cbor(data: &[u8], current: &Pstat) -> Result<Pstat, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    let map = parse_cbor_map(data)?;
    let mut pstat = current.clone();

    if let Some(v) = cbor_get_str(&map, OIC_JSON_ISOP_NAME) {
        pstat.is_op = cbor_bool(v).ok_or(CodecError::WrongType(OIC_JSON_ISOP_NAME))?;
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_CM_NAME) {
        pstat.cm = decode_dpm(v, OIC_JSON_CM_NAME)?;
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_TM_NAME) {
        pstat.tm = decode_dpm(v, OIC_JSON_TM_NAME)?;
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_OM_NAME) {
        pstat.om = Dpom::try_from(expect_uint(v, OIC_JSON_OM_NAME)?)?;
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_SM_NAME) {
        pstat.sm = match v {
            Value::Array(items) => items
                .iter()
                .map(|item| Dpom::try_from(expect_uint(item, OIC_JSON_SM_NAME)?))
                .collect::<Result<Vec<_>, _>>()?,
            // older writers stored a single mode
            single => vec![Dpom::try_from(expect_uint(single, OIC_JSON_SM_NAME)?)?],
        };
        if pstat.sm.is_empty() {
            return Err(CodecError::EmptyList(OIC_JSON_SM_NAME));
        }
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_DEVICE_ID_NAME) {
        pstat.device_id = expect_uuid(v, OIC_JSON_DEVICE_ID_NAME)?;
    }
    if let Some(v) = cbor_get_str(&map, OIC_JSON_ROWNERID_NAME) {
        pstat.rowner = expect_uuid(v, OIC_JSON_ROWNERID_NAME)?;
    }
    Ok(pstat)
}

fn decode_dpm(v: &Value, key: &'static str) -> Result<Dpm, CodecError> {
    let bits = u8::try_from(expect_uint(v, key)?).map_err(|_| CodecError::OutOfRange(key))?;
    Ok(Dpm(bits))
}
