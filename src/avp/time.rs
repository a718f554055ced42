use crate::error::{Error, Result};
use chrono::DateTime;
use chrono::Utc;
use std::fmt;
use std::io::Read;
use std::io::Write;

/// Seconds since the Unix epoch, carried as an unsigned 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time(u32);

impl Time {
    pub fn new(value: u32) -> Time {
        Time(value)
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Result<Time> {
        let secs = time.timestamp();
        if secs < 0 || secs > u32::MAX as i64 {
            return Err(Error::InvalidValue(format!(
                "time out of 32-bit range: {}",
                time
            )));
        }
        Ok(Time(secs as u32))
    }

    pub fn from_rfc3339(value: &str) -> Result<Time> {
        let time = DateTime::parse_from_rfc3339(value)
            .map_err(|e| Error::InvalidValue(format!("invalid time '{}': {}", value, e)))?;
        Time::from_datetime(time.with_timezone(&Utc))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0 as i64, 0)
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Time> {
        let mut b = [0; 4];
        reader.read_exact(&mut b)?;
        Ok(Time(u32::from_be_bytes(b)))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.0.to_be_bytes())?;
        Ok(())
    }

    pub fn length(&self) -> u32 {
        4
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_datetime() {
            Some(t) => write!(f, "{}", t.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode() {
        let t = Utc.with_ymd_and_hms(2024, 1, 10, 10, 35, 58).unwrap();
        let avp = Time::from_datetime(t).unwrap();
        let mut encoded = Vec::new();
        avp.encode_to(&mut encoded).unwrap();
        let mut cursor = Cursor::new(&encoded);
        let avp = Time::decode_from(&mut cursor).unwrap();
        assert_eq!(avp.as_datetime().unwrap(), t);
    }

    #[test]
    fn test_from_rfc3339() {
        let avp = Time::from_rfc3339("1970-01-01T00:01:00Z").unwrap();
        assert_eq!(avp.value(), 60);
    }

    #[test]
    fn test_from_rfc3339_invalid() {
        assert!(Time::from_rfc3339("yesterday").is_err());
    }
}
