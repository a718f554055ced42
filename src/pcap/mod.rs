//! Appends captured Diameter messages to a libpcap file, wrapped in
//! synthesized Ethernet/IPv4/{TCP,SCTP} framing so the capture opens in
//! any packet analyzer. One record per message.

pub mod layers;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::transport::Transport;
use self::layers::{Ethernet, Ipv4, Sctp, Tcp};
use lazy_static::lazy_static;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65536;
const LINKTYPE_ETHERNET: u32 = 1;

lazy_static! {
    // captures from concurrent peers share files; serialize every write
    static ref WRITE_LOCK: Mutex<()> = Mutex::new(());
}

/// Appends one Diameter message to `file`. An empty file name is a no-op;
/// a missing file is created with a fresh global header even when
/// `append` is requested.
pub fn write(file: &str, append: bool, data: &[u8], peer: &Node, request: bool) -> Result<()> {
    if file.is_empty() {
        return Ok(());
    }

    let _guard = WRITE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let append = append && Path::new(file).exists();
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    let mut f = options.open(file).map_err(|e| Error::OpenFile {
        file: file.to_string(),
        source: e,
    })?;

    let mut record = Vec::new();
    if !append {
        write_file_header(&mut record)?;
    }

    let frame = build_frame(data, peer, request)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    record.extend_from_slice(&(now.as_secs() as u32).to_le_bytes());
    record.extend_from_slice(&now.subsec_micros().to_le_bytes());
    record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    record.extend_from_slice(&frame);

    f.write_all(&record).map_err(|e| Error::WriteFile {
        file: file.to_string(),
        source: e,
    })
}

fn write_file_header(buf: &mut Vec<u8>) -> Result<()> {
    buf.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
    buf.extend_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    buf.extend_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // timezone offset
    buf.extend_from_slice(&0u32.to_le_bytes()); // timestamp accuracy
    buf.extend_from_slice(&SNAPLEN.to_le_bytes());
    buf.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
    Ok(())
}

/// Frames the payload bottom-up. Requests flow local → remote; answers
/// swap the MAC, IP and port pairs.
fn build_frame(data: &[u8], peer: &Node, request: bool) -> Result<Vec<u8>> {
    let mut frame = Vec::new();

    let (src_mac, dst_mac) = if request {
        (peer.route_info.iface_mac, layers::PLACEHOLDER_MAC)
    } else {
        (layers::PLACEHOLDER_MAC, peer.route_info.iface_mac)
    };
    Ethernet {
        src: src_mac,
        dst: dst_mac,
    }
    .encode_to(&mut frame)?;

    let local_ip = as_ipv4(peer.route_info.local_ip);
    let remote_ip = as_ipv4(peer.route_info.remote_ip);
    let (src_ip, dst_ip) = if request {
        (local_ip, remote_ip)
    } else {
        (remote_ip, local_ip)
    };
    let (src_port, dst_port) = if request {
        (peer.local_port, peer.remote_port)
    } else {
        (peer.remote_port, peer.local_port)
    };

    if matches!(peer.transport, Transport::Tcp(_)) {
        Ipv4 {
            protocol: layers::IP_PROTO_TCP,
            src: src_ip,
            dst: dst_ip,
            payload_len: (layers::TCP_HEADER_LEN + data.len()) as u16,
        }
        .encode_to(&mut frame)?;
        Tcp { src_port, dst_port }.encode_to(&mut frame)?;
    } else {
        Ipv4 {
            protocol: layers::IP_PROTO_SCTP,
            src: src_ip,
            dst: dst_ip,
            payload_len: (layers::SCTP_HEADER_LEN + layers::SCTP_DATA_CHUNK_LEN + data.len())
                as u16,
        }
        .encode_to(&mut frame)?;
        Sctp {
            src_port,
            dst_port,
            payload_len: data.len() as u16,
        }
        .encode_to(&mut frame)?;
    }

    frame.extend_from_slice(data);
    Ok(frame)
}

fn as_ipv4(ip: IpAddr) -> Ipv4Addr {
    match ip {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testutil::REGISTRY_LOCK;
    use crate::node::{self, Node};

    fn read_records(file: &str) -> Vec<Vec<u8>> {
        let bytes = std::fs::read(file).unwrap();
        assert_eq!(&bytes[..4], &PCAP_MAGIC.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            SNAPLEN
        );

        let mut records = Vec::new();
        let mut offset = 24;
        while offset < bytes.len() {
            let incl_len = u32::from_le_bytes([
                bytes[offset + 8],
                bytes[offset + 9],
                bytes[offset + 10],
                bytes[offset + 11],
            ]) as usize;
            let start = offset + 16;
            records.push(bytes[start..start + incl_len].to_vec());
            offset = start + incl_len;
        }
        records
    }

    // request and answer appended in order, with src/dst swapped
    #[tokio::test]
    async fn test_write_request_and_answer() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let peer = Node::new("pcap-peer", "127.0.0.1", 3868, "tcp", 30)
            .await
            .unwrap();

        let file = std::env::temp_dir().join("dialab-pcap-test.pcap");
        let file = file.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&file);

        let mut payload = vec![0u8; 20];
        payload[0] = 1;
        payload[3] = 20;

        write(&file, false, &payload, &peer, true).unwrap();
        write(&file, true, &payload, &peer, false).unwrap();

        let records = read_records(&file);
        assert_eq!(records.len(), 2);

        let request = &records[0];
        let answer = &records[1];
        // MACs swap between directions
        assert_eq!(&request[0..6], &layers::PLACEHOLDER_MAC);
        assert_eq!(&answer[6..12], &layers::PLACEHOLDER_MAC);
        // IPs and ports swap too
        assert_eq!(request[26..30], answer[30..34]);
        assert_eq!(request[30..34], answer[26..30]);
        let req_src_port = u16::from_be_bytes([request[34], request[35]]);
        let req_dst_port = u16::from_be_bytes([request[36], request[37]]);
        let ans_src_port = u16::from_be_bytes([answer[34], answer[35]]);
        let ans_dst_port = u16::from_be_bytes([answer[36], answer[37]]);
        assert_eq!(req_src_port, peer.local_port);
        assert_eq!(req_dst_port, 3868);
        assert_eq!(ans_src_port, req_dst_port);
        assert_eq!(ans_dst_port, req_src_port);
        // both carry the Diameter payload after eth + ip + tcp headers
        let headers = layers::ETHERNET_HEADER_LEN + layers::IPV4_HEADER_LEN
            + layers::TCP_HEADER_LEN;
        assert_eq!(&request[headers..], payload.as_slice());

        let _ = std::fs::remove_file(&file);
        node::remove("pcap-peer");
    }

    #[tokio::test]
    async fn test_empty_file_name_is_noop() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let peer = Node::new("pcap-noop-peer", "127.0.0.1", 3868, "sctp", 30)
            .await
            .unwrap();
        write("", false, &[0u8; 20], &peer, true).unwrap();
        node::remove("pcap-noop-peer");
    }
}
