use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::io::Write;
use std::net::IpAddr;

const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

/// Address AVP payload: a 2-byte address family followed by the raw
/// address bytes (4 for IPv4, 16 for IPv6) per RFC 6733 §4.3.1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Address(IpAddr);

impl Address {
    pub fn new(value: IpAddr) -> Address {
        Address(value)
    }

    pub fn parse(value: &str) -> Result<Address> {
        let ip = value
            .parse::<IpAddr>()
            .map_err(|_| Error::InvalidValue(format!("invalid IP address '{}'", value)))?;
        Ok(Address(ip))
    }

    pub fn value(&self) -> IpAddr {
        self.0
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Address> {
        let mut family = [0; 2];
        reader.read_exact(&mut family)?;
        match u16::from_be_bytes(family) {
            FAMILY_IPV4 => {
                let mut b = [0; 4];
                reader.read_exact(&mut b)?;
                Ok(Address(IpAddr::from(b)))
            }
            FAMILY_IPV6 => {
                let mut b = [0; 16];
                reader.read_exact(&mut b)?;
                Ok(Address(IpAddr::from(b)))
            }
            family => Err(Error::InvalidValue(format!(
                "unsupported address family {}",
                family
            ))),
        }
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self.0 {
            IpAddr::V4(ip) => {
                writer.write_all(&FAMILY_IPV4.to_be_bytes())?;
                writer.write_all(&ip.octets())?;
            }
            IpAddr::V6(ip) => {
                writer.write_all(&FAMILY_IPV6.to_be_bytes())?;
                writer.write_all(&ip.octets())?;
            }
        }
        Ok(())
    }

    pub fn length(&self) -> u32 {
        match self.0 {
            IpAddr::V4(_) => 2 + 4,
            IpAddr::V6(_) => 2 + 16,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_ipv4() {
        let avp = Address::parse("127.0.0.1").unwrap();
        let mut encoded = Vec::new();
        avp.encode_to(&mut encoded).unwrap();
        assert_eq!(encoded, vec![0x00, 0x01, 127, 0, 0, 1]);
        let mut cursor = Cursor::new(&encoded);
        let avp = Address::decode_from(&mut cursor).unwrap();
        assert_eq!(avp.value(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_encode_decode_ipv6() {
        let avp = Address::parse("::1").unwrap();
        let mut encoded = Vec::new();
        avp.encode_to(&mut encoded).unwrap();
        assert_eq!(encoded.len(), 18);
        assert_eq!(&encoded[..2], &[0x00, 0x02]);
        let mut cursor = Cursor::new(&encoded);
        let avp = Address::decode_from(&mut cursor).unwrap();
        assert_eq!(avp.value(), "::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_decode_bad_family() {
        let encoded = vec![0x00, 0x07, 1, 2, 3, 4];
        let mut cursor = Cursor::new(&encoded);
        assert!(Address::decode_from(&mut cursor).is_err());
    }
}
