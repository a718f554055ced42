use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::io::Write;

/// DiameterIdentity, an FQDN or realm as defined in RFC 6733 §4.3.1.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: &str) -> Identity {
        Identity(value.to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn decode_from<R: Read>(reader: &mut R, len: usize) -> Result<Identity> {
        let mut b = vec![0u8; len];
        reader.read_exact(&mut b)?;
        let s = String::from_utf8(b)
            .map_err(|e| Error::InvalidValue(format!("invalid Identity: {}", e)))?;
        Ok(Identity(s))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }

    pub fn length(&self) -> u32 {
        self.0.len() as u32
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
