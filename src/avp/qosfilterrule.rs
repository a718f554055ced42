use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::io::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct QoSFilterRule(String);

impl QoSFilterRule {
    pub fn new(value: &str) -> QoSFilterRule {
        QoSFilterRule(value.to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn decode_from<R: Read>(reader: &mut R, len: usize) -> Result<QoSFilterRule> {
        let mut b = vec![0u8; len];
        reader.read_exact(&mut b)?;
        let s = String::from_utf8(b)
            .map_err(|e| Error::InvalidValue(format!("invalid QoSFilterRule: {}", e)))?;
        Ok(QoSFilterRule(s))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }

    pub fn length(&self) -> u32 {
        self.0.len() as u32
    }
}

impl fmt::Display for QoSFilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode() {
        let avp = QoSFilterRule::new("tag 1 from 10.0.0.1 to 10.0.0.2");
        let mut encoded = Vec::new();
        avp.encode_to(&mut encoded).unwrap();
        let mut cursor = Cursor::new(&encoded);
        let avp = QoSFilterRule::decode_from(&mut cursor, encoded.len()).unwrap();
        assert_eq!(avp.value(), "tag 1 from 10.0.0.1 to 10.0.0.2");
    }
}
