use crate::error::Result;
use std::fmt;
use std::io::Read;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integer64(i64);

impl Integer64 {
    pub fn new(value: i64) -> Integer64 {
        Integer64(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Integer64> {
        let mut b = [0; 8];
        reader.read_exact(&mut b)?;
        Ok(Integer64(i64::from_be_bytes(b)))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.0.to_be_bytes())?;
        Ok(())
    }

    pub fn length(&self) -> u32 {
        8
    }
}

impl fmt::Display for Integer64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
