use crate::avp::{align4, Avp};
use crate::dictionary::Dictionary;
use crate::error::Result;
use std::fmt;
use std::io::Write;

/// An ordered list of child AVPs, each independently padded on the wire.
#[derive(Debug, Clone)]
pub struct Grouped(Vec<Avp>);

impl Grouped {
    pub fn new(avps: Vec<Avp>) -> Grouped {
        Grouped(avps)
    }

    pub fn avps(&self) -> &[Avp] {
        &self.0
    }

    pub fn push(&mut self, avp: Avp) {
        self.0.push(avp);
    }

    pub fn get(&self, name: &str) -> Option<&Avp> {
        self.0.iter().find(|avp| avp.name.eq_ignore_ascii_case(name))
    }

    /// Walks `data` to exhaustion; malformed children are reported by
    /// `Avp::decode` and decoding continues with the next sibling.
    pub fn decode(data: &[u8], dict: &Dictionary) -> Grouped {
        let mut avps = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (avp, consumed) = Avp::decode(&data[offset..], dict);
            if consumed == 0 {
                break;
            }
            offset += consumed;
            avps.push(avp);
        }
        Grouped(avps)
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for avp in &self.0 {
            avp.encode_to(writer)?;
        }
        Ok(())
    }

    pub fn length(&self) -> u32 {
        self.0.iter().map(|avp| align4(avp.length)).sum()
    }
}

impl fmt::Display for Grouped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for avp in &self.0 {
            write!(f, "\n    {}", avp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avp::enumerated::Enumerated;
    use crate::avp::utf8string::UTF8String;
    use crate::dictionary::DEFAULT_DICT;

    #[test]
    fn test_encode_decode() {
        let mut sub_type = DEFAULT_DICT.get_avp("Subscription-Id-Type").unwrap();
        sub_type.set_value(Enumerated::new(0).into()).unwrap();
        let mut sub_data = DEFAULT_DICT.get_avp("Subscription-Id-Data").unwrap();
        sub_data.set_value(UTF8String::new("15551234567").into()).unwrap();

        let grouped = Grouped::new(vec![sub_type, sub_data]);
        let mut encoded = Vec::new();
        grouped.encode_to(&mut encoded).unwrap();
        assert_eq!(encoded.len() as u32, grouped.length());

        let decoded = Grouped::decode(&encoded, &DEFAULT_DICT);
        assert_eq!(decoded.avps().len(), 2);
        assert_eq!(decoded.avps()[0].code, 450);
        assert_eq!(decoded.avps()[1].code, 444);
        assert_eq!(decoded.avps()[1].get_utf8string(), Some("15551234567"));
    }
}
