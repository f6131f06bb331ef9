use ciborium::value::Value;
use uuid::Uuid;

use crate::cbor::{
    cbor_get_str, encode_bounded, expect_array, expect_map, expect_text, expect_uuid,
    parse_cbor_map, require, resource_header, text, uuid_value, CodecError,
    OIC_JSON_ROWNERID_NAME,
};
use crate::config::AMACL_ENCODE_BUDGET;

use super::{AmaclEntry, AmaclList};

pub const OIC_RSRC_TYPE_SEC_AMACL: &str = "oic.r.amacl";

const OIC_JSON_AMACLS_NAME: &str = "amacls";
const OIC_JSON_RESOURCES_NAME: &str = "resources";
const OIC_JSON_RLIST_NAME: &str = "rlist";
const OIC_JSON_HREF_NAME: &str = "href";
const OIC_JSON_AMS_NAME: &str = "ams";

pub fn amacl_to_cbor(list: &AmaclList) -> Result<Vec<u8>, CodecError> {
    let entries = list
        .entries
        .iter()
        .map(|entry| {
            let rlist = entry
                .resources
                .iter()
                .map(|href| Value::Map(vec![(text(OIC_JSON_HREF_NAME), text(href))]))
                .collect();
            Value::Map(vec![
                (
                    text(OIC_JSON_RESOURCES_NAME),
                    Value::Map(vec![(text(OIC_JSON_RLIST_NAME), Value::Array(rlist))]),
                ),
                (
                    text(OIC_JSON_AMS_NAME),
                    Value::Array(entry.amss.iter().map(uuid_value).collect()),
                ),
            ])
        })
        .collect();

    let mut map = vec![
        (text(OIC_JSON_AMACLS_NAME), Value::Array(entries)),
        (text(OIC_JSON_ROWNERID_NAME), uuid_value(&list.rowner)),
    ];
    map.extend(resource_header(OIC_RSRC_TYPE_SEC_AMACL));
    encode_bounded(&Value::Map(map), AMACL_ENCODE_BUDGET)
}

pub fn amacl_from_cbor(data: &[u8]) -> Result<AmaclList, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    let map = parse_cbor_map(data)?;

    let entries = expect_array(require(&map, OIC_JSON_AMACLS_NAME)?, OIC_JSON_AMACLS_NAME)?
        .iter()
        .map(decode_entry)
        .collect::<Result<Vec<_>, _>>()?;
    let rowner = match cbor_get_str(&map, OIC_JSON_ROWNERID_NAME) {
        Some(v) => expect_uuid(v, OIC_JSON_ROWNERID_NAME)?,
        None => Uuid::nil(),
    };
    Ok(AmaclList { entries, rowner })
}

fn decode_entry(v: &Value) -> Result<AmaclEntry, CodecError> {
    let map = expect_map(v, OIC_JSON_AMACLS_NAME)?;

    let resources = expect_map(require(map, OIC_JSON_RESOURCES_NAME)?, OIC_JSON_RESOURCES_NAME)?;
    let resources = expect_array(require(resources, OIC_JSON_RLIST_NAME)?, OIC_JSON_RLIST_NAME)?
        .iter()
        .map(|r| {
            let r = expect_map(r, OIC_JSON_RLIST_NAME)?;
            Ok(expect_text(require(r, OIC_JSON_HREF_NAME)?, OIC_JSON_HREF_NAME)?.to_string())
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    if resources.is_empty() {
        return Err(CodecError::EmptyList(OIC_JSON_RLIST_NAME));
    }

    let amss = expect_array(require(map, OIC_JSON_AMS_NAME)?, OIC_JSON_AMS_NAME)?
        .iter()
        .map(|id| expect_uuid(id, OIC_JSON_AMS_NAME))
        .collect::<Result<Vec<_>, _>>()?;
    if amss.is_empty() {
        return Err(CodecError::EmptyList(OIC_JSON_AMS_NAME));
    }

    Ok(AmaclEntry { resources, amss })
}
