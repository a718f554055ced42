use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::io::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct UTF8String(String);

impl UTF8String {
    pub fn new(value: &str) -> UTF8String {
        UTF8String(value.to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn decode_from<R: Read>(reader: &mut R, len: usize) -> Result<UTF8String> {
        let mut b = vec![0u8; len];
        reader.read_exact(&mut b)?;
        let s = String::from_utf8(b)
            .map_err(|e| Error::InvalidValue(format!("invalid UTF8String: {}", e)))?;
        Ok(UTF8String(s))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }

    pub fn length(&self) -> u32 {
        self.0.len() as u32
    }
}

impl fmt::Display for UTF8String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
