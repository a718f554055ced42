//! Stream transport for Diameter peers.
//!
//! Both variants speak length-prefixed Diameter framing over a connected
//! stream socket: SCTP uses a one-to-one (SOCK_STREAM) association, TCP a
//! plain stream. One `recv` call always returns exactly one wire message,
//! regardless of how the bytes were segmented.

pub mod sctp;
pub mod tcp;

use crate::error::{Error, Result};
use crate::message::MIN_MESSAGE_LEN;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

pub const DEFAULT_PORT: u16 = 3868;
pub const DEFAULT_PROTOCOL: &str = "sctp";
pub const DEFAULT_TIMEOUT: u64 = 30;

const MAX_MESSAGE_LEN: u32 = 1024 * 1024;

pub enum Transport {
    Sctp(sctp::Sctp),
    Tcp(tcp::Tcp),
}

impl Transport {
    /// Transport variant for a protocol name, matched case-insensitively.
    pub fn new(proto: &str) -> Result<Transport> {
        match proto.to_ascii_lowercase().as_str() {
            "sctp" => Ok(Transport::Sctp(sctp::Sctp::new())),
            "tcp" => Ok(Transport::Tcp(tcp::Tcp::new())),
            _ => Err(Error::UnknownProto(proto.to_string())),
        }
    }

    /// Wraps a connection accepted by a server listener.
    pub async fn from_accepted(proto: &str, stream: TcpStream) -> Result<Transport> {
        let transport = Transport::new(proto)?;
        transport.link().attach(stream).await?;
        Ok(transport)
    }

    fn link(&self) -> &Link {
        match self {
            Transport::Sctp(t) => &t.link,
            Transport::Tcp(t) => &t.link,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Sctp(_) => "SCTP",
            Transport::Tcp(_) => "TCP",
        }
    }

    pub async fn connect(
        &self,
        remote_ip: IpAddr,
        remote_port: u16,
        local_ip: IpAddr,
        local_port: u16,
    ) -> Result<()> {
        match self {
            Transport::Sctp(t) => t.connect(remote_ip, remote_port, local_ip, local_port).await,
            Transport::Tcp(t) => t.connect(remote_ip, remote_port, local_ip, local_port).await,
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<()> {
        self.link().send(buf).await
    }

    pub async fn recv(&self) -> Result<Vec<u8>> {
        self.link().recv().await
    }

    pub async fn close(&self) -> Result<()> {
        self.link().close().await
    }

    /// Installs a deadline of `now + secs` on every subsequent send and
    /// receive. Zero removes the deadline.
    pub fn set_timeout(&self, secs: u64) {
        self.link().timeout_secs.store(secs, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.link().connected.load(Ordering::Relaxed)
    }

    pub fn remote_addr(&self) -> Option<String> {
        self.link().remote().map(|addr| addr.to_string())
    }

    pub fn local_addr(&self) -> Option<String> {
        self.link().local().map(|addr| addr.to_string())
    }

    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.link().remote().map(|addr| addr.ip())
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.link().local().map(|addr| addr.ip())
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.link().remote().map(|addr| addr.port())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.link().local().map(|addr| addr.port())
    }

    /// The last transport error observed, if any.
    pub fn error(&self) -> Option<String> {
        self.link()
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Connected-stream state shared by both transport variants.
pub(crate) struct Link {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    timeout_secs: AtomicU64,
    remote: StdMutex<Option<SocketAddr>>,
    local: StdMutex<Option<SocketAddr>>,
    last_error: StdMutex<Option<String>>,
    // close() must not contend for the reader lock (the receive loop
    // holds it while blocked in a read), so closing is signalled instead
    closed_tx: watch::Sender<bool>,
}

impl Link {
    pub(crate) fn new() -> Link {
        let (closed_tx, _) = watch::channel(false);
        Link {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            timeout_secs: AtomicU64::new(0),
            remote: StdMutex::new(None),
            local: StdMutex::new(None),
            last_error: StdMutex::new(None),
            closed_tx,
        }
    }

    pub(crate) async fn attach(&self, stream: TcpStream) -> Result<()> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.remote.lock().unwrap_or_else(|e| e.into_inner()) = Some(remote);
        *self.local.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        self.closed_tx.send_replace(false);
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn remote(&self) -> Option<SocketAddr> {
        *self.remote.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local(&self) -> Option<SocketAddr> {
        *self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_error(&self, detail: &str) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(detail.to_string());
    }

    fn deadline(&self) -> Option<Duration> {
        match self.timeout_secs.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| not_connected())?;

        let result = match self.deadline() {
            Some(deadline) => match timeout(deadline, writer.write_all(buf)).await {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            },
            None => writer.write_all(buf).await,
        };

        if let Err(e) = result {
            self.record_error(&e.to_string());
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Reads exactly one Diameter message: the four header bytes carrying
    /// the 24-bit length first, then the remainder. Unblocks with an
    /// error when the link is closed underneath it.
    async fn recv(&self) -> Result<Vec<u8>> {
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow() {
            return Err(not_connected());
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(not_connected)?;

        let deadline = self.deadline();
        let read_message = async {
            let mut header = [0u8; 4];
            reader.read_exact(&mut header).await?;
            let length = u32::from_be_bytes([0, header[1], header[2], header[3]]);
            if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&length) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad message length {}", length),
                ));
            }
            let mut buf = vec![0u8; length as usize];
            buf[..4].copy_from_slice(&header);
            reader.read_exact(&mut buf[4..]).await?;
            Ok(buf)
        };
        let read_with_deadline = async {
            match deadline {
                Some(deadline) => match timeout(deadline, read_message).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out()),
                },
                None => read_message.await,
            }
        };

        let result = tokio::select! {
            _ = closed_rx.changed() => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "transport closed",
            )),
            result = read_with_deadline => result,
        };

        match result {
            Ok(buf) => Ok(buf),
            Err(e) => {
                self.record_error(&e.to_string());
                Err(Error::Io(e))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.closed_tx.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

fn not_connected() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "transport not connected",
    ))
}

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "transport deadline exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_by_protocol_name() {
        assert_eq!(Transport::new("sctp").unwrap().name(), "SCTP");
        assert_eq!(Transport::new("TCP").unwrap().name(), "TCP");
        assert!(matches!(
            Transport::new("quic"),
            Err(Error::UnknownProto(_))
        ));
    }

    #[tokio::test]
    async fn test_framed_send_recv_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Transport::from_accepted("tcp", stream).await.unwrap()
        });

        let client = Transport::new("tcp").unwrap();
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.link().attach(stream).await.unwrap();
        let server = server.await.unwrap();

        // 20-byte header-only message, length field set to 20
        let mut msg = vec![0u8; 20];
        msg[0] = 1;
        msg[3] = 20;
        client.send(&msg).await.unwrap();
        // a second message in the same TCP segment window
        client.send(&msg).await.unwrap();

        let first = server.recv().await.unwrap();
        let second = server.recv().await.unwrap();
        assert_eq!(first, msg);
        assert_eq!(second, msg);

        assert!(client.is_connected());
        assert_eq!(client.remote_port(), Some(addr.port()));
        client.close().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Transport::new("tcp").unwrap();
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.link().attach(stream).await.unwrap();
        client.set_timeout(1);

        let err = client.recv().await;
        assert!(err.is_err());
        assert!(client.error().unwrap().contains("deadline"));
    }
}
