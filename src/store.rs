//! Pre-supplied AVP values used to materialize outbound messages.
//!
//! Values are keyed by AVP code; repeated AVPs occupy successive slots in
//! insertion order. Grouped values hold a nested store, so the data forms
//! an ownership tree that the rule resolver walks when a message is built.

use crate::avp::{align4, Address, Avp, AvpData, AvpType, AvpValue, Enumerated, Float32, Float64,
    Grouped, Identity, Integer32, Integer64, IPFilterRule, OctetString, QoSFilterRule, Time,
    Unsigned32, Unsigned64, UTF8String, DiameterURI};
use crate::dictionary::{AvpRule, Dictionary};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const AVP_DATA_APPEND: i32 = -1;
pub const AVP_DATA_REPLACE: i32 = -2;
pub const AVP_DATA_CLEANUP: i32 = -3;

pub type AvpDataStore = BTreeMap<u32, Vec<AvpData>>;

/// Stores a coerced value for `avp_id` (code, decimal string, or name).
///
/// `AVP_DATA_APPEND` pushes a new slot; a non-negative in-range index
/// replaces that slot; anything else is `IndexOutOfRange`.
pub fn store_avp_value(
    dict: &Dictionary,
    store: &mut AvpDataStore,
    avp_id: &str,
    value: &Value,
    index: i32,
) -> Result<()> {
    store_yaml_node(dict, store, avp_id, value, index)
}

pub fn del_avp_value(
    dict: &Dictionary,
    store: &mut AvpDataStore,
    avp_id: &str,
    index: i32,
) -> Result<()> {
    let avp = dict.get_avp(avp_id)?;

    if index == AVP_DATA_CLEANUP {
        store.remove(&avp.code);
        return Ok(());
    }

    let out_of_range = Error::IndexOutOfRange {
        avp: avp.name.clone(),
        index,
    };
    let slots = store.get_mut(&avp.code).ok_or(out_of_range)?;
    if index < 0 || index as usize >= slots.len() {
        return Err(Error::IndexOutOfRange {
            avp: avp.name,
            index,
        });
    }
    slots.remove(index as usize);
    Ok(())
}

/// The stored slot sequence for one AVP, or `None` when nothing was staged.
pub fn fetch_avp_value<'a>(
    dict: &Dictionary,
    store: &'a AvpDataStore,
    avp_id: &str,
) -> Result<Option<&'a [AvpData]>> {
    let avp = dict.get_avp(avp_id)?;
    Ok(store.get(&avp.code).map(|slots| slots.as_slice()))
}

/// Resolves a command's rule list against the store, appending one
/// materialized AVP per stored slot to `avps`. A required rule without a
/// value is logged and skipped. Returns the total padded wire size of the
/// emitted AVPs.
pub fn fetch_avps_values(
    dict: &Dictionary,
    rules: &[AvpRule],
    avps: &mut Vec<Avp>,
    store: &AvpDataStore,
) -> Result<u32> {
    let mut total_size = 0;

    for rule in rules {
        let template = match dict.get_avp_by_name(&rule.name) {
            Ok(template) => template,
            Err(e) => {
                if rule.required {
                    return Err(e);
                }
                continue;
            }
        };

        let slots = match store.get(&template.code) {
            Some(slots) if !slots.is_empty() => slots,
            _ => {
                if rule.required {
                    log::error!("{}", Error::NoValueForReqAvp(template.name.clone()));
                }
                continue;
            }
        };

        for slot in slots {
            let mut avp = template.clone();

            if let AvpValue::Staged(nested) = &slot.value {
                let members = template.group.as_deref().unwrap_or(&[]);
                let mut children = Vec::new();
                let size = fetch_avps_values(dict, members, &mut children, nested)?;
                avp.data = Some(AvpData {
                    size,
                    value: Grouped::new(children).into(),
                });
            } else {
                avp.data = Some(slot.clone());
            }

            avp.compute_length();
            total_size += align4(avp.length);
            avps.push(avp);
        }
    }

    Ok(total_size)
}

/// Ingests a YAML mapping of `avp-name: value`. Scalars become one slot,
/// sequences one slot per element, mappings a grouped value backed by a
/// nested store built with the same recursion.
pub fn load_from_str(
    dict: &Dictionary,
    store: &mut AvpDataStore,
    yaml: &str,
    index: i32,
) -> Result<()> {
    let doc: Value = serde_yaml::from_str(yaml)?;
    let map = doc
        .as_mapping()
        .ok_or_else(|| Error::ParseYaml("top level must be a mapping".into()))?;

    for (key, value) in map {
        let name = key
            .as_str()
            .ok_or_else(|| Error::ParseYaml(format!("bad AVP key: {:?}", key)))?;
        store_yaml_node(dict, store, name, value, index)?;
    }

    Ok(())
}

pub fn load_from_file(
    dict: &Dictionary,
    store: &mut AvpDataStore,
    path: &str,
    index: i32,
) -> Result<()> {
    let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadYaml {
        file: path.to_string(),
        source: e,
    })?;
    load_from_str(dict, store, &yaml, index)
}

fn store_yaml_node(
    dict: &Dictionary,
    store: &mut AvpDataStore,
    name: &str,
    value: &Value,
    index: i32,
) -> Result<()> {
    match value {
        Value::Sequence(seq) => {
            for item in seq {
                store_yaml_node(dict, store, name, item, index)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            let avp = dict.get_avp(name)?;
            if !avp.is_grouped() {
                return Err(Error::InvalidYamlValue {
                    avp: avp.name,
                    node: "mapping for a non-grouped AVP".into(),
                });
            }
            let mut nested = AvpDataStore::new();
            for (key, child) in map {
                let child_name = key
                    .as_str()
                    .ok_or_else(|| Error::ParseYaml(format!("bad AVP key: {:?}", key)))?;
                store_yaml_node(dict, &mut nested, child_name, child, AVP_DATA_APPEND)?;
            }
            let data = AvpData {
                size: 0,
                value: AvpValue::Staged(nested),
            };
            insert_slot(store, &avp, data, index)
        }
        Value::Null | Value::Tagged(_) => {
            let avp = dict.get_avp(name)?;
            Err(Error::InvalidYamlValue {
                avp: avp.name,
                node: format!("{:?}", value),
            })
        }
        _ => {
            let avp = dict.get_avp(name)?;
            let data = make_scalar_value(&avp, value)?;
            insert_slot(store, &avp, data, index)
        }
    }
}

fn insert_slot(store: &mut AvpDataStore, avp: &Avp, data: AvpData, index: i32) -> Result<()> {
    match index {
        AVP_DATA_APPEND => {
            store.entry(avp.code).or_default().push(data);
            Ok(())
        }
        i if i >= 0 => {
            let slots = store.get_mut(&avp.code);
            match slots {
                Some(slots) if (i as usize) < slots.len() => {
                    slots[i as usize] = data;
                    Ok(())
                }
                _ => Err(Error::IndexOutOfRange {
                    avp: avp.name.clone(),
                    index,
                }),
            }
        }
        _ => Err(Error::IndexOutOfRange {
            avp: avp.name.clone(),
            index,
        }),
    }
}

/// Coerces a YAML scalar into the template's value domain: numbers are
/// narrowed to the declared width, OctetString goes through BCD/PLMN
/// packing, Address and Time accept their textual forms.
fn make_scalar_value(avp: &Avp, value: &Value) -> Result<AvpData> {
    let invalid = || Error::InvalidAvpValue {
        avp: avp.name.clone(),
        value: format!("{:?}", value),
    };

    let avp_value: AvpValue = match avp.avp_type {
        AvpType::OctetString => OctetString::new(encode_octet_string(avp, value)?).into(),
        AvpType::Integer32 => Integer32::new(value.as_i64().ok_or_else(invalid)? as i32).into(),
        AvpType::Integer64 => Integer64::new(value.as_i64().ok_or_else(invalid)?).into(),
        AvpType::Unsigned32 => Unsigned32::new(value.as_u64().ok_or_else(invalid)? as u32).into(),
        AvpType::Unsigned64 => Unsigned64::new(value.as_u64().ok_or_else(invalid)?).into(),
        AvpType::Float32 => Float32::new(as_f64(value).ok_or_else(invalid)? as f32).into(),
        AvpType::Float64 => Float64::new(as_f64(value).ok_or_else(invalid)?).into(),
        AvpType::Address => Address::parse(value.as_str().ok_or_else(invalid)?)?.into(),
        AvpType::Time => match value {
            Value::Number(n) => Time::new(n.as_u64().ok_or_else(invalid)? as u32).into(),
            Value::String(s) => Time::from_rfc3339(s)?.into(),
            _ => return Err(invalid()),
        },
        AvpType::UTF8String => UTF8String::new(as_text(value).ok_or_else(invalid)?.as_str()).into(),
        AvpType::Identity => Identity::new(value.as_str().ok_or_else(invalid)?).into(),
        AvpType::DiameterURI => DiameterURI::new(value.as_str().ok_or_else(invalid)?).into(),
        AvpType::IPFilterRule => IPFilterRule::new(value.as_str().ok_or_else(invalid)?).into(),
        AvpType::QoSFilterRule => {
            QoSFilterRule::new(value.as_str().ok_or_else(invalid)?).into()
        }
        AvpType::Enumerated => Enumerated::new(enum_item_code(avp, value)?).into(),
        AvpType::Grouped => {
            return Err(Error::InvalidYamlValue {
                avp: avp.name.clone(),
                node: "scalar for a grouped AVP".into(),
            })
        }
        AvpType::Unknown => {
            return Err(Error::UnknownAvpType {
                avp: avp.name.clone(),
                avp_type: "Unknown".into(),
            })
        }
    };

    avp.make_value(avp_value)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn enum_item_code(avp: &Avp, value: &Value) -> Result<i32> {
    match value {
        Value::Number(n) => n.as_i64().map(|v| v as i32).ok_or_else(|| {
            Error::InvalidAvpValue {
                avp: avp.name.clone(),
                value: n.to_string(),
            }
        }),
        Value::String(s) => avp
            .enum_items
            .iter()
            .flatten()
            .find(|item| item.name.eq_ignore_ascii_case(s))
            .map(|item| item.code)
            .ok_or_else(|| Error::UnknownEnumItem {
                avp: avp.name.clone(),
                value: s.clone(),
            }),
        _ => Err(Error::InvalidAvpValue {
            avp: avp.name.clone(),
            value: format!("{:?}", value),
        }),
    }
}

fn encode_octet_string(avp: &Avp, value: &Value) -> Result<Vec<u8>> {
    let text = as_text(value).ok_or_else(|| Error::InvalidAvpValue {
        avp: avp.name.clone(),
        value: format!("{:?}", value),
    })?;

    // Visited-PLMN-Id
    if avp.code == 1407 {
        return encode_plmn(&text);
    }

    let digits = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        text
    } else {
        hex_string(text.as_bytes())
    };
    Ok(pack_bcd(&digits))
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Packs a digit string two-per-byte, low nibble first, padding an odd
/// tail with 0xF.
fn pack_bcd(digits: &str) -> Vec<u8> {
    let b = digits.as_bytes();
    let mut out = vec![0u8; (b.len() + 1) / 2];
    for (i, ch) in b.iter().enumerate() {
        let nibble = ch.wrapping_sub(0x30);
        if i & 1 == 0 {
            out[i / 2] |= nibble & 0x0f;
        } else {
            out[i / 2] |= nibble << 4;
        }
    }
    if b.len() & 1 != 0 {
        out[b.len() / 2] |= 0xf0;
    }
    out
}

/// 3GPP TS 23.003 MCC/MNC packing; accepts "MCCMNC" or "MCC-MNC" with a
/// 2- or 3-digit MNC.
fn encode_plmn(plmn: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = plmn.bytes().filter(|b| *b != b'-').collect();
    if (digits.len() != 5 && digits.len() != 6) || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidValue(plmn.to_string()));
    }

    let d = |i: usize| digits[i] - 0x30;
    let mut out = vec![0u8; 3];
    out[0] = d(0) | d(1) << 4;
    if digits.len() == 6 {
        out[1] = d(2) | d(5) << 4;
        out[2] = d(3) | d(4) << 4;
    } else {
        out[1] = d(2) | 0xf0;
        out[2] = d(3) | d(4) << 4;
    }
    Ok(out)
}

/// Mutex-guarded store handle; one process-wide instance backs the
/// convenience message builders.
pub struct Store {
    inner: Mutex<AvpDataStore>,
}

impl Store {
    pub fn new() -> Store {
        Store {
            inner: Mutex::new(AvpDataStore::new()),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut AvpDataStore) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn store_avp_value(
        &self,
        dict: &Dictionary,
        avp_id: &str,
        value: &Value,
        index: i32,
    ) -> Result<()> {
        self.with(|store| store_avp_value(dict, store, avp_id, value, index))
    }

    pub fn del_avp_value(&self, dict: &Dictionary, avp_id: &str, index: i32) -> Result<()> {
        self.with(|store| del_avp_value(dict, store, avp_id, index))
    }

    pub fn fetch_avp_value(&self, dict: &Dictionary, avp_id: &str) -> Result<Option<Vec<AvpData>>> {
        self.with(|store| {
            fetch_avp_value(dict, store, avp_id).map(|slots| slots.map(|s| s.to_vec()))
        })
    }

    pub fn load_str(&self, dict: &Dictionary, yaml: &str, index: i32) -> Result<()> {
        self.with(|store| load_from_str(dict, store, yaml, index))
    }

    pub fn load_file(&self, dict: &Dictionary, path: &str, index: i32) -> Result<()> {
        self.with(|store| load_from_file(dict, store, path, index))
    }

    pub fn clear(&self) {
        self.with(|store| store.clear());
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

lazy_static! {
    static ref GLOBAL: Store = Store::new();
}

/// The process-wide store backing `Message::request`/`answer`/`reply`.
pub fn global() -> &'static Store {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DEFAULT_DICT;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        for id in [16777217u32, 16777218, 16777219] {
            store_avp_value(dict, &mut store, "Auth-Application-Id", &yaml(&id.to_string()),
                AVP_DATA_APPEND).unwrap();
        }
        let slots = fetch_avp_value(dict, &store, "Auth-Application-Id").unwrap().unwrap();
        assert_eq!(slots.len(), 3);
        let values: Vec<u32> = slots
            .iter()
            .map(|slot| match &slot.value {
                AvpValue::Unsigned32(v) => v.value(),
                _ => panic!("expected Unsigned32"),
            })
            .collect();
        assert_eq!(values, vec![16777217, 16777218, 16777219]);
    }

    #[test]
    fn test_replace_slot_in_range() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        store_avp_value(dict, &mut store, "Result-Code", &yaml("2001"), AVP_DATA_APPEND).unwrap();
        store_avp_value(dict, &mut store, "Result-Code", &yaml("5012"), 0).unwrap();
        let slots = fetch_avp_value(dict, &store, "Result-Code").unwrap().unwrap();
        assert_eq!(slots.len(), 1);
        match &slots[0].value {
            AvpValue::Unsigned32(v) => assert_eq!(v.value(), 5012),
            _ => panic!("expected Unsigned32"),
        }
    }

    #[test]
    fn test_index_out_of_range() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        let err = store_avp_value(dict, &mut store, "Result-Code", &yaml("2001"), 3);
        assert!(matches!(err, Err(Error::IndexOutOfRange { .. })));
        let err = store_avp_value(dict, &mut store, "Result-Code", &yaml("2001"),
            AVP_DATA_REPLACE);
        assert!(matches!(err, Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_del_and_cleanup() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        for rc in ["2001", "2002", "2003"] {
            store_avp_value(dict, &mut store, "Result-Code", &yaml(rc), AVP_DATA_APPEND).unwrap();
        }
        del_avp_value(dict, &mut store, "Result-Code", 1).unwrap();
        let slots = fetch_avp_value(dict, &store, "Result-Code").unwrap().unwrap();
        assert_eq!(slots.len(), 2);

        del_avp_value(dict, &mut store, "Result-Code", AVP_DATA_CLEANUP).unwrap();
        assert!(fetch_avp_value(dict, &store, "Result-Code").unwrap().is_none());
    }

    #[test]
    fn test_yaml_ingest_scalars_and_sequences() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        load_from_str(
            dict,
            &mut store,
            "Origin-Host: dra01.example.org\nAuth-Application-Id: [16777217, 16777218]\n",
            AVP_DATA_APPEND,
        )
        .unwrap();

        let hosts = fetch_avp_value(dict, &store, "Origin-Host").unwrap().unwrap();
        assert_eq!(hosts.len(), 1);
        let ids = fetch_avp_value(dict, &store, "Auth-Application-Id").unwrap().unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_yaml_ingest_grouped_mapping() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        load_from_str(
            dict,
            &mut store,
            "Subscription-Id:\n  Subscription-Id-Type: 0\n  Subscription-Id-Data: \"15551234567\"\n",
            AVP_DATA_APPEND,
        )
        .unwrap();

        let slots = fetch_avp_value(dict, &store, "Subscription-Id").unwrap().unwrap();
        assert_eq!(slots.len(), 1);
        match &slots[0].value {
            AvpValue::Staged(nested) => {
                assert!(nested.contains_key(&450));
                assert!(nested.contains_key(&444));
            }
            _ => panic!("expected a staged nested store"),
        }
    }

    #[test]
    fn test_fetch_avps_values_materializes_grouped() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        load_from_str(
            dict,
            &mut store,
            "Subscription-Id:\n  Subscription-Id-Type: END_USER_E164\n  Subscription-Id-Data: \"15551234567\"\n",
            AVP_DATA_APPEND,
        )
        .unwrap();

        let rules = vec![AvpRule {
            name: "Subscription-Id".into(),
            required: true,
            max: 1,
        }];
        let mut avps = Vec::new();
        let size = fetch_avps_values(dict, &rules, &mut avps, &store).unwrap();
        assert_eq!(avps.len(), 1);

        let grouped = avps[0].get_grouped().unwrap();
        assert_eq!(grouped.avps().len(), 2);
        // members come out in dictionary-rule order
        assert_eq!(grouped.avps()[0].code, 450);
        assert_eq!(grouped.avps()[0].get_enumerated(), Some(0));
        assert_eq!(grouped.avps()[1].get_utf8string(), Some("15551234567"));
        assert_eq!(size, align4(avps[0].length));
    }

    #[test]
    fn test_fetch_skips_optional_without_value() {
        let dict = &DEFAULT_DICT;
        let store = AvpDataStore::new();
        let rules = vec![AvpRule {
            name: "Origin-State-Id".into(),
            required: false,
            max: 1,
        }];
        let mut avps = Vec::new();
        let size = fetch_avps_values(dict, &rules, &mut avps, &store).unwrap();
        assert_eq!(size, 0);
        assert!(avps.is_empty());
    }

    #[test]
    fn test_plmn_packing() {
        assert_eq!(encode_plmn("001-01").unwrap(), vec![0x00, 0xf1, 0x10]);
        assert_eq!(encode_plmn("001-010").unwrap(), vec![0x00, 0x01, 0x10]);
        assert_eq!(encode_plmn("00101").unwrap(), vec![0x00, 0xf1, 0x10]);
        assert!(encode_plmn("1234").is_err());
        assert!(encode_plmn("12345x").is_err());
    }

    #[test]
    fn test_bcd_packing() {
        assert_eq!(pack_bcd("15551234567"), vec![0x51, 0x55, 0x21, 0x43, 0x65, 0xf7]);
        assert_eq!(pack_bcd("12"), vec![0x21]);
        assert_eq!(pack_bcd("1"), vec![0xf1]);
    }

    #[test]
    fn test_octet_string_hex_fallback() {
        let dict = &DEFAULT_DICT;
        let avp = dict.get_avp("Visited-PLMN-Id").unwrap();
        // bypass the PLMN special case with an ordinary template
        let mut plain = avp.clone();
        plain.code = 9999;
        let data = make_scalar_value(&plain, &yaml("\"ab\"")).unwrap();
        // "ab" hex-encodes to "6162", packed low-nibble-first
        match &data.value {
            AvpValue::OctetString(v) => assert_eq!(v.value(), &[0x16, 0x26]),
            _ => panic!("expected OctetString"),
        }
    }

    #[test]
    fn test_time_coercion() {
        let dict = &DEFAULT_DICT;
        let avp = dict.get_avp("Event-Timestamp").unwrap();
        let data = make_scalar_value(&avp, &yaml("60")).unwrap();
        match &data.value {
            AvpValue::Time(t) => assert_eq!(t.value(), 60),
            _ => panic!("expected Time"),
        }
        let data = make_scalar_value(&avp, &yaml("\"1970-01-01T00:02:00Z\"")).unwrap();
        match &data.value {
            AvpValue::Time(t) => assert_eq!(t.value(), 120),
            _ => panic!("expected Time"),
        }
    }

    #[test]
    fn test_enum_by_name_case_insensitive() {
        let dict = &DEFAULT_DICT;
        let avp = dict.get_avp("CC-Request-Type").unwrap();
        let data = make_scalar_value(&avp, &yaml("initial_request")).unwrap();
        match &data.value {
            AvpValue::Enumerated(v) => assert_eq!(v.value(), 1),
            _ => panic!("expected Enumerated"),
        }
        assert!(matches!(
            make_scalar_value(&avp, &yaml("NO_SUCH_ITEM")),
            Err(Error::UnknownEnumItem { .. })
        ));
    }

    #[test]
    fn test_null_value_rejected() {
        let dict = &DEFAULT_DICT;
        let mut store = AvpDataStore::new();
        let err = load_from_str(dict, &mut store, "Origin-Host:\n", AVP_DATA_APPEND);
        assert!(matches!(err, Err(Error::InvalidYamlValue { .. })));
    }
}
