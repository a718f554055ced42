//! SCTP transport over one-to-one (SOCK_STREAM) associations.
//!
//! Sockets are created with `socket2` against the kernel SCTP stack and
//! then handed to tokio as ordinary stream sockets; at that level an SCTP
//! association and a TCP connection are driven identically.

use super::Link;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub struct Sctp {
    pub(crate) link: Link,
}

impl Sctp {
    pub fn new() -> Sctp {
        Sctp { link: Link::new() }
    }

    /// Blocking dial with an explicit local bind, run off the async
    /// executor. `EISCONN`/`EALREADY`/`EADDRINUSE` mean a previous
    /// association is still draining; those retry after a one second
    /// backoff with a fresh socket.
    pub async fn connect(
        &self,
        remote_ip: IpAddr,
        remote_port: u16,
        local_ip: IpAddr,
        local_port: u16,
    ) -> Result<()> {
        let remote = SocketAddr::new(remote_ip, remote_port);
        let local = SocketAddr::new(local_ip, local_port);

        let stream = tokio::task::spawn_blocking(move || dial(remote, local))
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))??;

        stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(stream)?;
        self.link.attach(stream).await
    }
}

impl Default for Sctp {
    fn default() -> Self {
        Sctp::new()
    }
}

fn dial(remote: SocketAddr, local: SocketAddr) -> Result<std::net::TcpStream> {
    loop {
        match dial_once(remote, local) {
            Ok(stream) => return Ok(stream),
            Err(e) => match e.raw_os_error() {
                Some(libc::EISCONN) | Some(libc::EALREADY) | Some(libc::EADDRINUSE) => {
                    log::info!("sctp association still open ({}), retrying", e);
                    std::thread::sleep(Duration::from_secs(1));
                }
                _ => return Err(Error::Io(e)),
            },
        }
    }
}

fn dial_once(remote: SocketAddr, local: SocketAddr) -> io::Result<std::net::TcpStream> {
    let socket = new_sctp_socket(remote)?;
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    socket.connect(&remote.into())?;
    Ok(socket.into())
}

/// SCTP listener registered with the tokio reactor.
pub fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = new_sctp_socket(addr)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    let listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(listener)
}

fn new_sctp_socket(addr: SocketAddr) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    Socket::new(domain, Type::STREAM, Some(Protocol::from(libc::IPPROTO_SCTP)))
}
