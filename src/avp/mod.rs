/*
 * AVP format:
 *   0                   1                   2                   3
 *   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                           AVP Code                            |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |  Flags       |                 AVP Length                     |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                         Vendor ID (optional)                  |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                             Data                              |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                             Data             |    Padding     |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *
 * AVP Flags:
 *   0 1 2 3 4 5 6 7
 *  +-+-+-+-+-+-+-+-+  V(endor), M(andatory), P(rotected)
 *  |V M P r r r r r|  r(reserved)
 *  +-+-+-+-+-+-+-+-+
 *
 * The padding after the data is NOT counted in the AVP Length field.
 */

pub mod address;
pub mod enumerated;
pub mod float32;
pub mod float64;
pub mod grouped;
pub mod identity;
pub mod integer32;
pub mod integer64;
pub mod ipfilterrule;
pub mod octetstring;
pub mod qosfilterrule;
pub mod time;
pub mod unsigned32;
pub mod unsigned64;
pub mod uri;
pub mod utf8string;

use crate::dictionary::{AvpRule, Dictionary, EnumItem};
use crate::error::{Error, Result};
use crate::store::AvpDataStore;
use core::fmt;
use std::io::Cursor;
use std::io::Write;

pub use self::address::Address;
pub use self::enumerated::Enumerated;
pub use self::float32::Float32;
pub use self::float64::Float64;
pub use self::grouped::Grouped;
pub use self::identity::Identity;
pub use self::integer32::Integer32;
pub use self::integer64::Integer64;
pub use self::ipfilterrule::IPFilterRule;
pub use self::octetstring::OctetString;
pub use self::qosfilterrule::QoSFilterRule;
pub use self::time::Time;
pub use self::unsigned32::Unsigned32;
pub use self::unsigned64::Unsigned64;
pub use self::uri::DiameterURI;
pub use self::utf8string::UTF8String;

pub mod flags {
    pub const V: u8 = 0x80;
    pub const M: u8 = 0x40;
    pub const P: u8 = 0x20;
}

/// Rounds a wire length up to the next 32-bit boundary.
pub(crate) fn align4(n: u32) -> u32 {
    (n + 3) & !3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvpType {
    Unknown,
    OctetString,
    Integer32,
    Integer64,
    Unsigned32,
    Unsigned64,
    Float32,
    Float64,
    Address,
    Time,
    UTF8String,
    Identity,
    DiameterURI,
    IPFilterRule,
    QoSFilterRule,
    Enumerated,
    Grouped,
}

impl AvpType {
    pub fn name(&self) -> &'static str {
        match self {
            AvpType::Unknown => "Unknown",
            AvpType::OctetString => "OctetString",
            AvpType::Integer32 => "Integer32",
            AvpType::Integer64 => "Integer64",
            AvpType::Unsigned32 => "Unsigned32",
            AvpType::Unsigned64 => "Unsigned64",
            AvpType::Float32 => "Float32",
            AvpType::Float64 => "Float64",
            AvpType::Address => "Address",
            AvpType::Time => "Time",
            AvpType::UTF8String => "UTF8String",
            AvpType::Identity => "DiameterIdentity",
            AvpType::DiameterURI => "DiameterURI",
            AvpType::IPFilterRule => "IPFilterRule",
            AvpType::QoSFilterRule => "QoSFilterRule",
            AvpType::Enumerated => "Enumerated",
            AvpType::Grouped => "Grouped",
        }
    }
}

impl fmt::Display for AvpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A typed AVP payload.
///
/// `Staged` holds values parked in an [`AvpDataStore`](crate::store) for a
/// grouped AVP; it is materialized into `Grouped` by the rule resolver
/// before encoding and never appears on the wire.
#[derive(Debug, Clone)]
pub enum AvpValue {
    OctetString(OctetString),
    Integer32(Integer32),
    Integer64(Integer64),
    Unsigned32(Unsigned32),
    Unsigned64(Unsigned64),
    Float32(Float32),
    Float64(Float64),
    Address(Address),
    Time(Time),
    UTF8String(UTF8String),
    Identity(Identity),
    DiameterURI(DiameterURI),
    IPFilterRule(IPFilterRule),
    QoSFilterRule(QoSFilterRule),
    Enumerated(Enumerated),
    Grouped(Grouped),
    Staged(AvpDataStore),
}

impl AvpValue {
    pub fn length(&self) -> u32 {
        match self {
            AvpValue::OctetString(v) => v.length(),
            AvpValue::Integer32(v) => v.length(),
            AvpValue::Integer64(v) => v.length(),
            AvpValue::Unsigned32(v) => v.length(),
            AvpValue::Unsigned64(v) => v.length(),
            AvpValue::Float32(v) => v.length(),
            AvpValue::Float64(v) => v.length(),
            AvpValue::Address(v) => v.length(),
            AvpValue::Time(v) => v.length(),
            AvpValue::UTF8String(v) => v.length(),
            AvpValue::Identity(v) => v.length(),
            AvpValue::DiameterURI(v) => v.length(),
            AvpValue::IPFilterRule(v) => v.length(),
            AvpValue::QoSFilterRule(v) => v.length(),
            AvpValue::Enumerated(v) => v.length(),
            AvpValue::Grouped(v) => v.length(),
            AvpValue::Staged(_) => 0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AvpValue::OctetString(_) => "OctetString",
            AvpValue::Integer32(_) => "Integer32",
            AvpValue::Integer64(_) => "Integer64",
            AvpValue::Unsigned32(_) => "Unsigned32",
            AvpValue::Unsigned64(_) => "Unsigned64",
            AvpValue::Float32(_) => "Float32",
            AvpValue::Float64(_) => "Float64",
            AvpValue::Address(_) => "Address",
            AvpValue::Time(_) => "Time",
            AvpValue::UTF8String(_) => "UTF8String",
            AvpValue::Identity(_) => "DiameterIdentity",
            AvpValue::DiameterURI(_) => "DiameterURI",
            AvpValue::IPFilterRule(_) => "IPFilterRule",
            AvpValue::QoSFilterRule(_) => "QoSFilterRule",
            AvpValue::Enumerated(_) => "Enumerated",
            AvpValue::Grouped(_) => "Grouped",
            AvpValue::Staged(_) => "Grouped",
        }
    }

    fn matches(&self, avp_type: AvpType) -> bool {
        match (self, avp_type) {
            (AvpValue::OctetString(_), AvpType::OctetString) => true,
            (AvpValue::Integer32(_), AvpType::Integer32) => true,
            (AvpValue::Integer64(_), AvpType::Integer64) => true,
            (AvpValue::Unsigned32(_), AvpType::Unsigned32) => true,
            (AvpValue::Unsigned64(_), AvpType::Unsigned64) => true,
            (AvpValue::Float32(_), AvpType::Float32) => true,
            (AvpValue::Float64(_), AvpType::Float64) => true,
            (AvpValue::Address(_), AvpType::Address) => true,
            (AvpValue::Time(_), AvpType::Time) => true,
            (AvpValue::UTF8String(_), AvpType::UTF8String) => true,
            (AvpValue::Identity(_), AvpType::Identity) => true,
            (AvpValue::DiameterURI(_), AvpType::DiameterURI) => true,
            (AvpValue::IPFilterRule(_), AvpType::IPFilterRule) => true,
            (AvpValue::QoSFilterRule(_), AvpType::QoSFilterRule) => true,
            (AvpValue::Enumerated(_), AvpType::Enumerated) => true,
            (AvpValue::Grouped(_), AvpType::Grouped) => true,
            (AvpValue::Staged(_), AvpType::Grouped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AvpValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AvpValue::OctetString(v) => v.fmt(f),
            AvpValue::Integer32(v) => v.fmt(f),
            AvpValue::Integer64(v) => v.fmt(f),
            AvpValue::Unsigned32(v) => v.fmt(f),
            AvpValue::Unsigned64(v) => v.fmt(f),
            AvpValue::Float32(v) => v.fmt(f),
            AvpValue::Float64(v) => v.fmt(f),
            AvpValue::Address(v) => v.fmt(f),
            AvpValue::Time(v) => v.fmt(f),
            AvpValue::UTF8String(v) => v.fmt(f),
            AvpValue::Identity(v) => v.fmt(f),
            AvpValue::DiameterURI(v) => v.fmt(f),
            AvpValue::IPFilterRule(v) => v.fmt(f),
            AvpValue::QoSFilterRule(v) => v.fmt(f),
            AvpValue::Enumerated(v) => v.fmt(f),
            AvpValue::Grouped(v) => v.fmt(f),
            AvpValue::Staged(_) => write!(f, "<staged>"),
        }
    }
}

impl From<OctetString> for AvpValue {
    fn from(v: OctetString) -> Self {
        AvpValue::OctetString(v)
    }
}

impl From<Integer32> for AvpValue {
    fn from(v: Integer32) -> Self {
        AvpValue::Integer32(v)
    }
}

impl From<Integer64> for AvpValue {
    fn from(v: Integer64) -> Self {
        AvpValue::Integer64(v)
    }
}

impl From<Unsigned32> for AvpValue {
    fn from(v: Unsigned32) -> Self {
        AvpValue::Unsigned32(v)
    }
}

impl From<Unsigned64> for AvpValue {
    fn from(v: Unsigned64) -> Self {
        AvpValue::Unsigned64(v)
    }
}

impl From<Float32> for AvpValue {
    fn from(v: Float32) -> Self {
        AvpValue::Float32(v)
    }
}

impl From<Float64> for AvpValue {
    fn from(v: Float64) -> Self {
        AvpValue::Float64(v)
    }
}

impl From<Address> for AvpValue {
    fn from(v: Address) -> Self {
        AvpValue::Address(v)
    }
}

impl From<Time> for AvpValue {
    fn from(v: Time) -> Self {
        AvpValue::Time(v)
    }
}

impl From<UTF8String> for AvpValue {
    fn from(v: UTF8String) -> Self {
        AvpValue::UTF8String(v)
    }
}

impl From<Identity> for AvpValue {
    fn from(v: Identity) -> Self {
        AvpValue::Identity(v)
    }
}

impl From<DiameterURI> for AvpValue {
    fn from(v: DiameterURI) -> Self {
        AvpValue::DiameterURI(v)
    }
}

impl From<IPFilterRule> for AvpValue {
    fn from(v: IPFilterRule) -> Self {
        AvpValue::IPFilterRule(v)
    }
}

impl From<QoSFilterRule> for AvpValue {
    fn from(v: QoSFilterRule) -> Self {
        AvpValue::QoSFilterRule(v)
    }
}

impl From<Enumerated> for AvpValue {
    fn from(v: Enumerated) -> Self {
        AvpValue::Enumerated(v)
    }
}

impl From<Grouped> for AvpValue {
    fn from(v: Grouped) -> Self {
        AvpValue::Grouped(v)
    }
}

/// Payload value plus its encoded size in bytes (header and padding
/// excluded).
#[derive(Debug, Clone)]
pub struct AvpData {
    pub size: u32,
    pub value: AvpValue,
}

/// A dictionary template and, once `data` is attached, a wire instance.
#[derive(Debug, Clone)]
pub struct Avp {
    pub code: u32,
    pub name: String,
    pub flags: u8,
    pub vendor_id: u32,
    pub avp_type: AvpType,
    pub enum_items: Option<Vec<EnumItem>>,
    pub group: Option<Vec<AvpRule>>,
    pub data: Option<AvpData>,
    pub length: u32,
}

impl Avp {
    pub fn new(name: &str, code: u32, flags: u8, vendor_id: u32, avp_type: AvpType) -> Avp {
        let mut flags = flags;
        if vendor_id != 0 {
            flags |= flags::V;
        }
        let mut avp = Avp {
            code,
            name: name.to_string(),
            flags,
            vendor_id,
            avp_type,
            enum_items: None,
            group: None,
            data: None,
            length: 0,
        };
        avp.compute_length();
        avp
    }

    fn placeholder(code: u32) -> Avp {
        Avp {
            code,
            name: String::new(),
            flags: 0,
            vendor_id: 0,
            avp_type: AvpType::Unknown,
            enum_items: None,
            group: None,
            data: None,
            length: 0,
        }
    }

    pub fn is_vendor_specific(&self) -> bool {
        self.flags & flags::V != 0
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags & flags::M != 0
    }

    pub fn is_protected(&self) -> bool {
        self.flags & flags::P != 0
    }

    pub fn is_grouped(&self) -> bool {
        self.avp_type == AvpType::Grouped
    }

    fn header_length(&self) -> u32 {
        if self.is_vendor_specific() {
            12
        } else {
            8
        }
    }

    /// Recomputes the Length header field: header plus payload size,
    /// padding excluded.
    pub fn compute_length(&mut self) -> u32 {
        self.length = self.header_length();
        if let Some(data) = &self.data {
            self.length += data.size;
        }
        self.length
    }

    /// Validates `value` against the template type and wraps it with its
    /// encoded size.
    pub fn make_value(&self, value: AvpValue) -> Result<AvpData> {
        if !value.matches(self.avp_type) {
            return Err(Error::InvalidAvpValue {
                avp: self.name.clone(),
                value: value.to_string(),
            });
        }
        let size = value.length();
        Ok(AvpData { size, value })
    }

    pub fn set_value(&mut self, value: AvpValue) -> Result<()> {
        let data = self.make_value(value)?;
        self.data = Some(data);
        self.compute_length();
        Ok(())
    }

    pub fn get_value(&self) -> Option<&AvpValue> {
        self.data.as_ref().map(|d| &d.value)
    }

    pub fn get_unsigned32(&self) -> Option<u32> {
        match self.get_value() {
            Some(AvpValue::Unsigned32(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn get_enumerated(&self) -> Option<i32> {
        match self.get_value() {
            Some(AvpValue::Enumerated(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn get_utf8string(&self) -> Option<&str> {
        match self.get_value() {
            Some(AvpValue::UTF8String(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn get_identity(&self) -> Option<&str> {
        match self.get_value() {
            Some(AvpValue::Identity(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn get_grouped(&self) -> Option<&Grouped> {
        match self.get_value() {
            Some(AvpValue::Grouped(v)) => Some(v),
            _ => None,
        }
    }

    /// Appends a member rule to a grouped template.
    pub fn add_member(&mut self, name: &str, required: bool, max: i32) {
        let rule = AvpRule {
            name: name.to_string(),
            required,
            max,
        };
        self.group.get_or_insert_with(Vec::new).push(rule);
    }

    /// Removes all member rules with the given name from a grouped template.
    pub fn remove_member(&mut self, name: &str) {
        if let Some(members) = &mut self.group {
            members.retain(|rule| !rule.name.eq_ignore_ascii_case(name));
        }
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.code.to_be_bytes())?;
        let word = (self.flags as u32) << 24 | (self.length & 0x00FF_FFFF);
        writer.write_all(&word.to_be_bytes())?;
        if self.is_vendor_specific() && self.vendor_id != 0 {
            writer.write_all(&self.vendor_id.to_be_bytes())?;
        }

        if let Some(data) = &self.data {
            match &data.value {
                AvpValue::OctetString(v) => v.encode_to(writer)?,
                AvpValue::Integer32(v) => v.encode_to(writer)?,
                AvpValue::Integer64(v) => v.encode_to(writer)?,
                AvpValue::Unsigned32(v) => v.encode_to(writer)?,
                AvpValue::Unsigned64(v) => v.encode_to(writer)?,
                AvpValue::Float32(v) => v.encode_to(writer)?,
                AvpValue::Float64(v) => v.encode_to(writer)?,
                AvpValue::Address(v) => v.encode_to(writer)?,
                AvpValue::Time(v) => v.encode_to(writer)?,
                AvpValue::UTF8String(v) => v.encode_to(writer)?,
                AvpValue::Identity(v) => v.encode_to(writer)?,
                AvpValue::DiameterURI(v) => v.encode_to(writer)?,
                AvpValue::IPFilterRule(v) => v.encode_to(writer)?,
                AvpValue::QoSFilterRule(v) => v.encode_to(writer)?,
                AvpValue::Enumerated(v) => v.encode_to(writer)?,
                AvpValue::Grouped(v) => v.encode_to(writer)?,
                AvpValue::Staged(_) => {
                    return Err(Error::InvalidAvpValue {
                        avp: self.name.clone(),
                        value: "<staged>".into(),
                    })
                }
            }
        }

        let padding = align4(self.length) - self.length;
        for _ in 0..padding {
            writer.write_all(&[0])?;
        }

        Ok(())
    }

    /// Decodes one AVP from the front of `data`.
    ///
    /// Returns the instance and the number of bytes consumed, which is the
    /// declared length rounded up to a 4-byte boundary. An AVP whose code
    /// is missing from the dictionary yields a placeholder carrying only
    /// the code; malformed payloads leave `data` unset. Both conditions
    /// are reported through the log so that the surrounding container can
    /// keep walking.
    pub fn decode(data: &[u8], dict: &Dictionary) -> (Avp, usize) {
        if data.len() < 8 {
            log::warn!("truncated AVP header: {} bytes left", data.len());
            return (Avp::placeholder(0), data.len());
        }

        let code = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let avp_flags = data[4];
        let length = u32::from_be_bytes([0, data[5], data[6], data[7]]);
        let consumed = (align4(length).max(8) as usize).min(data.len());

        let mut avp = match dict.get_avp_by_code(code) {
            Ok(template) => template,
            Err(_) => {
                log::warn!("unknown AVP code {} while decoding, skipping", code);
                return (Avp::placeholder(code), consumed);
            }
        };
        avp.flags = avp_flags;
        avp.length = length;

        let mut offset = 8;
        if avp.is_vendor_specific() {
            if data.len() < 12 {
                log::warn!("AVP {}: truncated vendor id", avp.name);
                return (avp, consumed);
            }
            avp.vendor_id = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
            offset = 12;
        }

        let data_size = match (length as usize).checked_sub(offset) {
            Some(size) => size,
            None => {
                log::warn!("AVP {}: declared length {} below header size", avp.name, length);
                return (avp, consumed);
            }
        };
        let end = (offset + data_size).min(data.len());
        let payload = &data[offset..end];

        let mut cursor = Cursor::new(payload);
        let value: Result<AvpValue> = match avp.avp_type {
            AvpType::OctetString => {
                OctetString::decode_from(&mut cursor, payload.len()).map(Into::into)
            }
            AvpType::Integer32 => Integer32::decode_from(&mut cursor).map(Into::into),
            AvpType::Integer64 => Integer64::decode_from(&mut cursor).map(Into::into),
            AvpType::Unsigned32 => Unsigned32::decode_from(&mut cursor).map(Into::into),
            AvpType::Unsigned64 => Unsigned64::decode_from(&mut cursor).map(Into::into),
            AvpType::Float32 => Float32::decode_from(&mut cursor).map(Into::into),
            AvpType::Float64 => Float64::decode_from(&mut cursor).map(Into::into),
            AvpType::Address => Address::decode_from(&mut cursor).map(Into::into),
            AvpType::Time => Time::decode_from(&mut cursor).map(Into::into),
            AvpType::UTF8String => {
                UTF8String::decode_from(&mut cursor, payload.len()).map(Into::into)
            }
            AvpType::Identity => Identity::decode_from(&mut cursor, payload.len()).map(Into::into),
            AvpType::DiameterURI => {
                DiameterURI::decode_from(&mut cursor, payload.len()).map(Into::into)
            }
            AvpType::IPFilterRule => {
                IPFilterRule::decode_from(&mut cursor, payload.len()).map(Into::into)
            }
            AvpType::QoSFilterRule => {
                QoSFilterRule::decode_from(&mut cursor, payload.len()).map(Into::into)
            }
            AvpType::Enumerated => Enumerated::decode_from(&mut cursor).map(Into::into),
            AvpType::Grouped => Ok(Grouped::decode(payload, dict).into()),
            AvpType::Unknown => Err(Error::UnknownAvpType {
                avp: avp.name.clone(),
                avp_type: "Unknown".into(),
            }),
        };

        match value {
            Ok(value) => {
                let size = value.length();
                avp.data = Some(AvpData { size, value });
            }
            Err(e) => log::warn!("AVP {}: {}", avp.name, e),
        }

        (avp, consumed)
    }
}
