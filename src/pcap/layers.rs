//! Byte-level builders for the synthetic Ethernet/IPv4/{TCP,SCTP} framing
//! that wraps captured Diameter payloads. Checksums are left zero; the
//! frames exist for offline inspection, not transmission.

use crate::error::Result;
use std::io::Write;
use std::net::Ipv4Addr;

pub const PLACEHOLDER_MAC: [u8; 6] = [0x00, 0x00, 0x5e, 0x00, 0x00, 0xff];

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_SCTP: u8 = 132;

/// Payload protocol identifier for Diameter in SCTP DATA chunks.
pub const SCTP_PPID_DIAMETER: u32 = 46;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const SCTP_HEADER_LEN: usize = 12;
pub const SCTP_DATA_CHUNK_LEN: usize = 16;

pub struct Ethernet {
    pub src: [u8; 6],
    pub dst: [u8; 6],
}

impl Ethernet {
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.dst)?;
        writer.write_all(&self.src)?;
        writer.write_all(&ETHERTYPE_IPV4.to_be_bytes())?;
        Ok(())
    }
}

pub struct Ipv4 {
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload_len: u16,
}

impl Ipv4 {
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[0x45, 0x00])?; // version 4, IHL 5, DSCP 0
        let total_len = IPV4_HEADER_LEN as u16 + self.payload_len;
        writer.write_all(&total_len.to_be_bytes())?;
        writer.write_all(&[0x00, 0x00])?; // identification
        writer.write_all(&[0x00, 0x00])?; // flags, fragment offset
        writer.write_all(&[64, self.protocol])?; // TTL 64
        writer.write_all(&[0x00, 0x00])?; // checksum
        writer.write_all(&self.src.octets())?;
        writer.write_all(&self.dst.octets())?;
        Ok(())
    }
}

pub struct Tcp {
    pub src_port: u16,
    pub dst_port: u16,
}

impl Tcp {
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.src_port.to_be_bytes())?;
        writer.write_all(&self.dst_port.to_be_bytes())?;
        writer.write_all(&110u32.to_be_bytes())?; // sequence
        writer.write_all(&0u32.to_be_bytes())?; // acknowledgment
        writer.write_all(&[5 << 4, 0x00])?; // data offset 5, no flags
        writer.write_all(&14600u16.to_be_bytes())?; // window
        writer.write_all(&[0x00, 0x00])?; // checksum
        writer.write_all(&[0x00, 0x00])?; // urgent pointer
        Ok(())
    }
}

pub struct Sctp {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_len: u16,
}

impl Sctp {
    /// Common header plus one DATA chunk header: ordered delivery, both
    /// fragment bits set, zero verification tag and checksum.
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.src_port.to_be_bytes())?;
        writer.write_all(&self.dst_port.to_be_bytes())?;
        writer.write_all(&0u32.to_be_bytes())?; // verification tag
        writer.write_all(&0u32.to_be_bytes())?; // checksum

        writer.write_all(&[0x00, 0x03])?; // DATA chunk, begin+end fragment
        let chunk_len = SCTP_DATA_CHUNK_LEN as u16 + self.payload_len;
        writer.write_all(&chunk_len.to_be_bytes())?;
        writer.write_all(&0u32.to_be_bytes())?; // TSN
        writer.write_all(&0u16.to_be_bytes())?; // stream identifier
        writer.write_all(&0u16.to_be_bytes())?; // stream sequence
        writer.write_all(&SCTP_PPID_DIAMETER.to_be_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethernet_layout() {
        let eth = Ethernet {
            src: [1, 2, 3, 4, 5, 6],
            dst: PLACEHOLDER_MAC,
        };
        let mut buf = Vec::new();
        eth.encode_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ETHERNET_HEADER_LEN);
        assert_eq!(&buf[..6], &PLACEHOLDER_MAC);
        assert_eq!(&buf[6..12], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&buf[12..], &[0x08, 0x00]);
    }

    #[test]
    fn test_ipv4_layout() {
        let ip = Ipv4 {
            protocol: IP_PROTO_TCP,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            payload_len: 40,
        };
        let mut buf = Vec::new();
        ip.encode_to(&mut buf).unwrap();
        assert_eq!(buf.len(), IPV4_HEADER_LEN);
        assert_eq!(buf[0], 0x45);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 60);
        assert_eq!(buf[8], 64);
        assert_eq!(buf[9], IP_PROTO_TCP);
        assert_eq!(&buf[12..16], &[10, 0, 0, 1]);
        assert_eq!(&buf[16..20], &[10, 0, 0, 2]);
    }

    #[test]
    fn test_sctp_data_chunk() {
        let sctp = Sctp {
            src_port: 3868,
            dst_port: 3999,
            payload_len: 20,
        };
        let mut buf = Vec::new();
        sctp.encode_to(&mut buf).unwrap();
        assert_eq!(buf.len(), SCTP_HEADER_LEN + SCTP_DATA_CHUNK_LEN);
        // chunk header starts after the common header
        assert_eq!(buf[12], 0x00);
        assert_eq!(buf[13], 0x03);
        assert_eq!(u16::from_be_bytes([buf[14], buf[15]]), 36);
        assert_eq!(
            u32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]),
            SCTP_PPID_DIAMETER
        );
    }
}
