use super::Link;
use crate::error::Result;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpSocket;

pub struct Tcp {
    pub(crate) link: Link,
}

impl Tcp {
    pub fn new() -> Tcp {
        Tcp { link: Link::new() }
    }

    pub async fn connect(
        &self,
        remote_ip: IpAddr,
        remote_port: u16,
        local_ip: IpAddr,
        local_port: u16,
    ) -> Result<()> {
        let socket = if remote_ip.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::new(local_ip, local_port))?;
        let stream = socket.connect(SocketAddr::new(remote_ip, remote_port)).await?;
        self.link.attach(stream).await
    }
}

impl Default for Tcp {
    fn default() -> Self {
        Tcp::new()
    }
}
