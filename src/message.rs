/*
 * Diameter header:
 *   0                   1                   2                   3
 *   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |    Version    |                 Message Length                |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  | Command Flags |                  Command-Code                 |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                         Application-ID                        |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                      Hop-by-Hop Identifier                    |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *  |                      End-to-End Identifier                    |
 *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
 *
 * Command Flags:
 *   0 1 2 3 4 5 6 7
 *  +-+-+-+-+-+-+-+-+  R(equest), P(roxyable), E(rror)
 *  |R P E T r r r r|  T(potentially re-transmitted), r(reserved)
 *  +-+-+-+-+-+-+-+-+
 */

use crate::avp::{align4, Avp, UTF8String};
use crate::dictionary::{self, App, Cmd, Dictionary};
use crate::error::{Error, Result};
use crate::store::{self, AvpDataStore};
use chrono::Utc;

pub const MIN_MESSAGE_LEN: u32 = 20;

pub mod flags {
    pub const REQUEST: u8 = 0x80;
    pub const PROXYABLE: u8 = 0x40;
    pub const ERROR: u8 = 0x20;
    pub const RETRANSMIT: u8 = 0x10;
}

#[derive(Debug, Clone)]
pub struct Message {
    pub version: u8,
    pub length: u32,
    pub flags: u8,
    pub cmd_code: u32,
    pub app_id: u32,
    pub hop_by_hop: u32,
    pub end_to_end: u32,
    pub avps: Vec<Avp>,
    bytes: Option<Vec<u8>>,
}

impl Message {
    /// Builds a message for `cmd`, materializing the command's request or
    /// answer rule list from `store` when `fetch_avps` is set. A present
    /// Session-Id value gets a wall-clock suffix to keep sessions apart.
    pub fn build(
        app: &App,
        cmd: &Cmd,
        request: bool,
        fetch_avps: bool,
        dict: &Dictionary,
        store: &AvpDataStore,
    ) -> Result<Message> {
        let mut flags = cmd.flags;
        if request {
            flags |= dict.cmd_flag_r();
        }

        let mut m = Message {
            version: 1,
            length: MIN_MESSAGE_LEN,
            flags,
            cmd_code: cmd.code,
            app_id: app.id,
            hop_by_hop: rand::random(),
            end_to_end: rand::random(),
            avps: Vec::new(),
            bytes: None,
        };

        if !fetch_avps {
            return Ok(m);
        }

        let rules = if request { &cmd.request } else { &cmd.answer };
        store::fetch_avps_values(dict, rules, &mut m.avps, store)?;

        if let Some(session_id) = m.get_avp_by_name_mut("Session-Id") {
            if let Some(value) = session_id.get_utf8string().map(str::to_string) {
                let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
                let unique = format!("{};{};{}", value, now >> 32, now & 0xFFFF_FFFF);
                session_id.set_value(UTF8String::new(&unique).into())?;
            }
        }
        m.recompute_length();

        Ok(m)
    }

    pub fn new(
        app_id: &str,
        cmd_id: &str,
        request: bool,
        fetch_avps: bool,
        dict: &Dictionary,
        store: &AvpDataStore,
    ) -> Result<Message> {
        let app = dict.get_app(app_id)?;
        let cmd = dict.get_cmd(cmd_id, app)?;
        Message::build(app, cmd, request, fetch_avps, dict, store)
    }

    /// Request against the process-wide dictionary and store.
    pub fn request(app_id: u32, cmd_code: u32) -> Result<Message> {
        let dict = dictionary::active();
        store::global().with(|store| {
            let app = dict.get_app_by_id(app_id)?;
            let cmd = dict.get_cmd_by_code(cmd_code, app)?;
            Message::build(app, cmd, true, true, &dict, store)
        })
    }

    /// Answer against the process-wide dictionary and store.
    pub fn answer(app_id: u32, cmd_code: u32) -> Result<Message> {
        let dict = dictionary::active();
        store::global().with(|store| {
            let app = dict.get_app_by_id(app_id)?;
            let cmd = dict.get_cmd_by_code(cmd_code, app)?;
            Message::build(app, cmd, false, true, &dict, store)
        })
    }

    /// Derives the answer to this message: same identifiers, R-flag
    /// cleared, Session-Id copied from the request.
    pub fn reply(&self) -> Result<Message> {
        let dict = dictionary::active();
        store::global().with(|store| self.reply_with(&dict, store))
    }

    pub fn reply_with(&self, dict: &Dictionary, store: &AvpDataStore) -> Result<Message> {
        let app = dict.get_app_by_id(self.app_id)?;
        let cmd = dict.get_cmd_by_code(self.cmd_code, app)?;
        let mut r = Message::build(app, cmd, false, true, dict, store)?;

        let session_id = self
            .get_avp_by_name("Session-Id")
            .and_then(|avp| avp.get_utf8string())
            .map(str::to_string);
        if let Some(value) = session_id {
            if let Some(avp) = r.get_avp_by_name_mut("Session-Id") {
                avp.set_value(UTF8String::new(&value).into())?;
            }
            r.recompute_length();
        }

        r.hop_by_hop = self.hop_by_hop;
        r.end_to_end = self.end_to_end;
        r.flags = self.flags & !dict.cmd_flag_r();

        Ok(r)
    }

    fn recompute_length(&mut self) {
        self.length =
            MIN_MESSAGE_LEN + self.avps.iter().map(|avp| align4(avp.length)).sum::<u32>();
    }

    pub fn add_avp(&mut self, avp: Avp) {
        self.avps.push(avp);
        self.bytes = None;
        self.recompute_length();
    }

    pub fn remove_avp(&mut self, id: &str) -> Result<()> {
        match self.avps.iter().position(|avp| matches_avp(avp, id)) {
            Some(pos) => {
                self.avps.remove(pos);
                self.bytes = None;
                self.recompute_length();
                Ok(())
            }
            None => Err(Error::UnknownAvp(id.to_string())),
        }
    }

    /// First AVP matching a decimal code or (case-insensitive) name.
    pub fn get_avp(&self, id: &str) -> Option<&Avp> {
        self.avps.iter().find(|avp| matches_avp(avp, id))
    }

    pub fn get_avp_by_code(&self, code: u32) -> Option<&Avp> {
        self.avps.iter().find(|avp| avp.code == code)
    }

    pub fn get_avp_by_name(&self, name: &str) -> Option<&Avp> {
        self.avps.iter().find(|avp| avp.name.eq_ignore_ascii_case(name))
    }

    fn get_avp_by_name_mut(&mut self, name: &str) -> Option<&mut Avp> {
        self.avps
            .iter_mut()
            .find(|avp| avp.name.eq_ignore_ascii_case(name))
    }

    /// The n-th (zero-based) AVP matching `id`, for repeated AVPs.
    pub fn get_avp_nth(&self, id: &str, n: usize) -> Option<&Avp> {
        self.avps.iter().filter(|avp| matches_avp(avp, id)).nth(n)
    }

    pub fn is_request(&self) -> bool {
        self.flags & flags::REQUEST != 0
    }

    pub fn is_proxyable(&self) -> bool {
        self.flags & flags::PROXYABLE != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & flags::ERROR != 0
    }

    pub fn is_retransmission(&self) -> bool {
        self.flags & flags::RETRANSMIT != 0
    }

    /// Encodes the message, fixing up the length word with the actual byte
    /// count. The result is cached until the AVP list changes.
    pub fn encode(&mut self) -> Result<&[u8]> {
        if self.bytes.is_none() {
            let mut buf = Vec::with_capacity(self.length as usize);
            let word = (self.version as u32) << 24 | (self.length & 0x00FF_FFFF);
            buf.extend_from_slice(&word.to_be_bytes());
            let word = (self.flags as u32) << 24 | (self.cmd_code & 0x00FF_FFFF);
            buf.extend_from_slice(&word.to_be_bytes());
            buf.extend_from_slice(&self.app_id.to_be_bytes());
            buf.extend_from_slice(&self.hop_by_hop.to_be_bytes());
            buf.extend_from_slice(&self.end_to_end.to_be_bytes());

            for avp in &self.avps {
                avp.encode_to(&mut buf)?;
            }

            self.length = buf.len() as u32;
            let word = (self.version as u32) << 24 | (self.length & 0x00FF_FFFF);
            buf[0..4].copy_from_slice(&word.to_be_bytes());
            self.bytes = Some(buf);
        }

        Ok(self.bytes.as_deref().expect("just encoded"))
    }

    /// Decodes a wire message. AVPs that fail to decode are reported and
    /// skipped so a partially understood capture stays inspectable.
    pub fn decode(data: &[u8], dict: &Dictionary) -> Result<Message> {
        if data.len() < MIN_MESSAGE_LEN as usize {
            return Err(Error::MessageTooShort(data.len()));
        }

        let length = u32::from_be_bytes([0, data[1], data[2], data[3]]);
        let mut m = Message {
            version: data[0],
            length,
            flags: data[4],
            cmd_code: u32::from_be_bytes([0, data[5], data[6], data[7]]),
            app_id: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            hop_by_hop: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            end_to_end: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            avps: Vec::new(),
            bytes: None,
        };

        let end = (m.length as usize).min(data.len());
        let mut offset = MIN_MESSAGE_LEN as usize;
        while offset < end {
            let (avp, consumed) = Avp::decode(&data[offset..end], dict);
            if consumed == 0 {
                break;
            }
            offset += consumed;
            m.avps.push(avp);
        }

        m.bytes = Some(data.to_vec());
        Ok(m)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.avps.is_empty()
    }
}

fn matches_avp(avp: &Avp, id: &str) -> bool {
    if let Ok(code) = id.trim().parse::<u32>() {
        return avp.code == code;
    }
    avp.name.eq_ignore_ascii_case(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DEFAULT_DICT;
    use crate::store::{load_from_str, AVP_DATA_APPEND};

    const CCR_VALUES: &str = r#"
Session-Id: lab.example.org;1
Origin-Host: lab.example.org
Origin-Realm: example.org
Destination-Realm: peer.example.org
Auth-Application-Id: 4
CC-Request-Type: INITIAL_REQUEST
CC-Request-Number: 0
"#;

    fn ccr_store() -> AvpDataStore {
        let mut store = AvpDataStore::new();
        load_from_str(&DEFAULT_DICT, &mut store, CCR_VALUES, AVP_DATA_APPEND).unwrap();
        store
    }

    fn build_ccr(store: &AvpDataStore) -> Message {
        Message::new("4", "CC", true, true, &DEFAULT_DICT, store).unwrap()
    }

    #[test]
    fn test_build_request_sets_header() {
        let store = ccr_store();
        let m = build_ccr(&store);
        assert_eq!(m.version, 1);
        assert_eq!(m.app_id, 4);
        assert_eq!(m.cmd_code, 272);
        assert!(m.is_request());
        assert!(m.is_proxyable());
        assert_eq!(m.avps.len(), 7);
    }

    #[test]
    fn test_session_id_gets_unique_suffix() {
        let store = ccr_store();
        let m = build_ccr(&store);
        let sid = m.get_avp_by_name("Session-Id").unwrap().get_utf8string().unwrap();
        assert!(sid.starts_with("lab.example.org;1;"));
        // original prefix plus two numeric fields
        assert_eq!(sid.split(';').count(), 4);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let store = ccr_store();
        let mut m = build_ccr(&store);
        let encoded = m.encode().unwrap().to_vec();
        assert_eq!(encoded.len() as u32, m.length);

        let decoded = Message::decode(&encoded, &DEFAULT_DICT).unwrap();
        assert_eq!(decoded.version, m.version);
        assert_eq!(decoded.length, m.length);
        assert_eq!(decoded.flags, m.flags);
        assert_eq!(decoded.cmd_code, m.cmd_code);
        assert_eq!(decoded.app_id, m.app_id);
        assert_eq!(decoded.hop_by_hop, m.hop_by_hop);
        assert_eq!(decoded.end_to_end, m.end_to_end);
        assert_eq!(decoded.avps.len(), m.avps.len());

        // encode ∘ decode ∘ encode is the identity on bytes
        let mut decoded = decoded;
        decoded.bytes = None;
        assert_eq!(decoded.encode().unwrap(), encoded.as_slice());
    }

    #[test]
    fn test_decode_exactly_header() {
        let mut empty = Message {
            version: 1,
            length: MIN_MESSAGE_LEN,
            flags: 0,
            cmd_code: 257,
            app_id: 0,
            hop_by_hop: 1,
            end_to_end: 2,
            avps: Vec::new(),
            bytes: None,
        };
        let encoded = empty.encode().unwrap().to_vec();
        assert_eq!(encoded.len(), 20);
        let decoded = Message::decode(&encoded, &DEFAULT_DICT).unwrap();
        assert!(decoded.avps.is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        let data = [0u8; 19];
        assert!(matches!(
            Message::decode(&data, &DEFAULT_DICT),
            Err(Error::MessageTooShort(19))
        ));
    }

    #[test]
    fn test_reply_preserves_ids_and_clears_request_flag() {
        let mut store = ccr_store();
        load_from_str(&DEFAULT_DICT, &mut store, "Result-Code: 2001\n", AVP_DATA_APPEND).unwrap();

        let m = build_ccr(&store);
        let reply = m.reply_with(&DEFAULT_DICT, &store).unwrap();
        assert_eq!(reply.cmd_code, m.cmd_code);
        assert_eq!(reply.app_id, m.app_id);
        assert_eq!(reply.hop_by_hop, m.hop_by_hop);
        assert_eq!(reply.end_to_end, m.end_to_end);
        assert!(!reply.is_request());
        assert!(reply.is_proxyable());

        // the answer carries the request's Session-Id verbatim
        assert_eq!(
            reply.get_avp_by_name("Session-Id").unwrap().get_utf8string(),
            m.get_avp_by_name("Session-Id").unwrap().get_utf8string()
        );

        // replying to a reply flips nothing further
        let again = reply.reply_with(&DEFAULT_DICT, &store).unwrap();
        assert_eq!(again.cmd_code, m.cmd_code);
        assert_eq!(again.app_id, m.app_id);
        assert_eq!(again.hop_by_hop, m.hop_by_hop);
        assert_eq!(again.end_to_end, m.end_to_end);
        assert!(!again.is_request());
    }

    #[test]
    fn test_multiple_stored_values_in_insertion_order() {
        let mut store = ccr_store();
        load_from_str(
            &DEFAULT_DICT,
            &mut store,
            "Auth-Application-Id: [16777217, 16777218]\n",
            AVP_DATA_APPEND,
        )
        .unwrap();

        let m = build_ccr(&store);
        // one from the base fixture plus the two appended
        let first = m.get_avp_nth("Auth-Application-Id", 1).unwrap();
        let second = m.get_avp_nth("Auth-Application-Id", 2).unwrap();
        assert_eq!(first.get_unsigned32(), Some(16777217));
        assert_eq!(second.get_unsigned32(), Some(16777218));
    }

    #[test]
    fn test_grouped_roundtrip_through_message() {
        let mut store = ccr_store();
        load_from_str(
            &DEFAULT_DICT,
            &mut store,
            "Subscription-Id:\n  Subscription-Id-Type: 0\n  Subscription-Id-Data: \"15551234567\"\n",
            AVP_DATA_APPEND,
        )
        .unwrap();

        let mut m = build_ccr(&store);
        let encoded = m.encode().unwrap().to_vec();
        let decoded = Message::decode(&encoded, &DEFAULT_DICT).unwrap();

        let sub = decoded.get_avp_by_name("Subscription-Id").unwrap();
        let grouped = sub.get_grouped().unwrap();
        assert_eq!(grouped.avps().len(), 2);
        assert_eq!(grouped.avps()[0].get_enumerated(), Some(0));
        assert_eq!(grouped.avps()[1].get_utf8string(), Some("15551234567"));
    }

    #[test]
    fn test_add_remove_avp_invalidate_cache() {
        let store = ccr_store();
        let mut m = build_ccr(&store);
        m.encode().unwrap();
        assert!(m.bytes().is_some());

        let mut extra = DEFAULT_DICT.get_avp("Origin-State-Id").unwrap();
        extra.set_value(crate::avp::Unsigned32::new(7).into()).unwrap();
        m.add_avp(extra);
        assert!(m.bytes().is_none());

        m.remove_avp("Origin-State-Id").unwrap();
        assert!(m.get_avp_by_name("Origin-State-Id").is_none());
        assert!(matches!(
            m.remove_avp("Origin-State-Id"),
            Err(Error::UnknownAvp(_))
        ));
    }
}
