//! Peer endpoints: stateful per-peer handles with a background receive
//! loop. Base-protocol requests (AppId 0) are answered inside the loop,
//! so consumers only ever see application traffic.

use crate::dictionary;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::route::{self, RouteInfo};
use crate::transport::{self, Transport};
use lazy_static::lazy_static;
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

pub const STATE_DISCONNECTED: u32 = 0;
pub const STATE_CONNECTED: u32 = 1;
pub const STATE_RECEIVING: u32 = 2;
pub const STATE_ERROR: u32 = 128;

const RX_CHANNEL_CAPACITY: usize = 10;

const CMD_CAP_EXCHANGE: u32 = 257;
const CMD_WATCHDOG: u32 = 280;
const CMD_DISCONNECT_PEER: u32 = 282;
const AVP_RESULT_CODE: u32 = 268;
const RESULT_SUCCESS: u32 = 2001;

type RxItem = Result<Message>;

pub struct Node {
    pub name: String,
    pub address: String,
    pub remote_port: u16,
    pub local_port: u16,
    pub route_info: RouteInfo,
    pub transport: Transport,
    timeout: AtomicU64,
    state: AtomicU32,
    rx: Mutex<Option<mpsc::Receiver<RxItem>>>,
    rx_depth: AtomicUsize,
    int_tx: mpsc::Sender<()>,
    int_rx: Mutex<mpsc::Receiver<()>>,
    client: bool,
    // handle to this node's own Arc, for spawning the receive loop
    weak: Weak<Node>,
}

lazy_static! {
    static ref PEERS: StdMutex<Vec<Arc<Node>>> = StdMutex::new(Vec::new());
}

fn peers() -> std::sync::MutexGuard<'static, Vec<Arc<Node>>> {
    PEERS.lock().unwrap_or_else(|e| e.into_inner())
}

impl Node {
    /// Creates a statically configured peer: resolves `addr` to an IPv4
    /// address, collects route info, picks a random local port, and
    /// registers the node in the Disconnected state.
    pub async fn new(
        name: &str,
        addr: &str,
        port: u16,
        proto: &str,
        timeout: u64,
    ) -> Result<Arc<Node>> {
        if get_by_name(name).is_ok() {
            return Err(Error::PeerExists(name.to_string()));
        }

        let transport = Transport::new(proto)?;
        let route_info = resolve_route(addr).await?;
        let local_port = transport::DEFAULT_PORT + rand::thread_rng().gen_range(0u16..32768);
        let (int_tx, int_rx) = mpsc::channel(1);

        let node = Arc::new_cyclic(|weak| Node {
            name: name.to_string(),
            address: addr.to_string(),
            remote_port: port,
            local_port,
            route_info,
            transport,
            timeout: AtomicU64::new(timeout),
            state: AtomicU32::new(STATE_DISCONNECTED),
            rx: Mutex::new(None),
            rx_depth: AtomicUsize::new(0),
            int_tx,
            int_rx: Mutex::new(int_rx),
            client: false,
            weak: weak.clone(),
        });

        peers().push(Arc::clone(&node));
        Ok(node)
    }

    /// Wraps a server-accepted connection: the node starts Connected with
    /// its receive loop already running.
    pub async fn from_transport(transport: Transport) -> Arc<Node> {
        let address = transport.remote_addr().unwrap_or_default();
        let remote_ip = transport
            .remote_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let local_ip = transport
            .local_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let (int_tx, int_rx) = mpsc::channel(1);

        let node = Arc::new_cyclic(|weak| Node {
            name: format!("peer-{}", address),
            address,
            remote_port: transport.remote_port().unwrap_or(0),
            local_port: transport.local_port().unwrap_or(0),
            route_info: RouteInfo::from_addrs(remote_ip, local_ip),
            transport,
            timeout: AtomicU64::new(transport::DEFAULT_TIMEOUT),
            state: AtomicU32::new(STATE_CONNECTED),
            rx: Mutex::new(None),
            rx_depth: AtomicUsize::new(0),
            int_tx,
            int_rx: Mutex::new(int_rx),
            client: true,
            weak: weak.clone(),
        });

        peers().push(Arc::clone(&node));
        node.start_recv_loop().await;
        node
    }

    /// Dials the peer and starts the receive loop. With `send_ce` the
    /// capability exchange runs immediately; a failed exchange tears the
    /// connection back down.
    pub async fn connect(&self, send_ce: bool) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected(self.name.clone()));
        }

        let ri = &self.route_info;
        self.transport
            .connect(ri.remote_ip, self.remote_port, ri.local_ip, self.local_port)
            .await
            .map_err(|e| Error::Connect {
                peer: self.name.clone(),
                source: into_io(e),
            })?;

        self.state.store(STATE_CONNECTED, Ordering::SeqCst);
        self.start_recv_loop().await;

        if send_ce {
            if let Err(e) = self.send_cap_exchange().await {
                let _ = self.disconnect(false).await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Closes the connection, optionally after a Disconnect-Peer exchange.
    /// Accepted (client-origin) peers are dropped from the registry;
    /// configured peers revert to Disconnected.
    pub async fn disconnect(&self, send_dp: bool) -> Result<()> {
        if self.state.load(Ordering::SeqCst) & STATE_CONNECTED != STATE_CONNECTED {
            if self.client {
                remove(&self.name);
            }
            return Err(Error::NotConnected(self.name.clone()));
        }

        if send_dp {
            let _ = self.send_disconnect_peer().await;
        }

        let result = self.transport.close().await;
        self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
        if self.client {
            remove(&self.name);
        }

        result.map_err(|e| Error::Disconnect {
            peer: self.name.clone(),
            source: into_io(e),
        })
    }

    pub fn set_timeout(&self, secs: u64) {
        self.timeout.store(secs, Ordering::Relaxed);
        self.transport.set_timeout(secs);
    }

    pub fn timeout(&self) -> u64 {
        self.timeout.load(Ordering::Relaxed)
    }

    pub async fn send_to(&self, msg: &mut Message) -> Result<()> {
        let buf = msg.encode()?.to_vec();
        self.send_bytes(&buf).await
    }

    pub async fn send_bytes(&self, buf: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.name.clone()));
        }
        self.transport
            .send(buf)
            .await
            .map_err(|e| Error::SendTo {
                peer: self.name.clone(),
                detail: e.to_string(),
            })
    }

    /// Next application message from the receive loop. Blocks until a
    /// message arrives, the connection drops, or an interrupt token is
    /// pushed (signal handler), which surfaces as `Interrupted`.
    pub async fn recv_from(&self) -> Result<Message> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.name.clone()));
        }

        self.state.fetch_or(STATE_RECEIVING, Ordering::SeqCst);
        let result = self.recv_inner().await;
        self.state.fetch_and(!STATE_RECEIVING, Ordering::SeqCst);
        result
    }

    async fn recv_inner(&self) -> Result<Message> {
        let mut int_rx = self.int_rx.lock().await;
        let mut rx_guard = self.rx.lock().await;
        let rx = rx_guard.as_mut().ok_or_else(|| Error::RecvFrom {
            peer: self.name.clone(),
            detail: "no receive channel".into(),
        })?;

        tokio::select! {
            _ = int_rx.recv() => Err(Error::Interrupted),
            item = rx.recv() => match item {
                Some(item) => {
                    self.rx_depth.fetch_sub(1, Ordering::Relaxed);
                    item.map_err(|e| Error::RecvFrom {
                        peer: self.name.clone(),
                        detail: e.to_string(),
                    })
                }
                None => Err(Error::RecvFrom {
                    peer: self.name.clone(),
                    detail: self
                        .transport
                        .error()
                        .unwrap_or_else(|| "receive channel closed".into()),
                }),
            },
        }
    }

    /// Non-blocking peek at the receive channel depth.
    pub fn has_data(&self) -> bool {
        self.rx_depth.load(Ordering::Relaxed) > 0
    }

    /// Unblocks a pending `recv_from` with `Interrupted`.
    pub fn send_interrupt(&self) {
        let _ = self.int_tx.try_send(());
    }

    pub fn state(&self) -> u32 {
        self.state.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::SeqCst) & STATE_CONNECTED == STATE_CONNECTED
    }

    pub fn is_receiving(&self) -> bool {
        self.state.load(Ordering::SeqCst) & STATE_RECEIVING == STATE_RECEIVING
    }

    pub fn is_client(&self) -> bool {
        self.client
    }

    pub async fn send_cap_exchange(&self) -> Result<()> {
        self.send_common(CMD_CAP_EXCHANGE).await
    }

    pub async fn send_watchdog(&self) -> Result<()> {
        self.send_common(CMD_WATCHDOG).await
    }

    pub async fn send_disconnect_peer(&self) -> Result<()> {
        self.send_common(CMD_DISCONNECT_PEER).await
    }

    /// One base-protocol request/answer exchange; anything but
    /// Result-Code 2001 is an error.
    pub async fn send_common(&self, cmd: u32) -> Result<()> {
        let mut req = Message::request(0, cmd)?;
        self.send_to(&mut req).await?;

        let ans = self.recv_from().await?;
        let avp = ans
            .get_avp_by_code(AVP_RESULT_CODE)
            .ok_or_else(|| Error::ReqAvpAbsent("Result-Code".into()))?;
        match avp.get_unsigned32() {
            Some(RESULT_SUCCESS) => Ok(()),
            Some(code) => Err(Error::DiameterResultCode(code)),
            None => Err(Error::InvalidAvpValue {
                avp: "Result-Code".into(),
                value: "<unset>".into(),
            }),
        }
    }

    /// Answers a base-protocol request in place; a Disconnect-Peer request
    /// additionally tears the connection down after the answer is out.
    async fn reply_common(&self, req: &Message) -> Result<()> {
        let mut ans = req.reply()?;
        self.send_to(&mut ans).await?;

        if req.cmd_code == CMD_DISCONNECT_PEER {
            let _ = self.disconnect(false).await;
        }

        Ok(())
    }

    async fn start_recv_loop(&self) {
        let (tx, rx) = mpsc::channel(RX_CHANNEL_CAPACITY);
        *self.rx.lock().await = Some(rx);
        self.rx_depth.store(0, Ordering::Relaxed);

        if let Some(node) = self.weak.upgrade() {
            tokio::spawn(async move {
                node.recv_loop(tx).await;
            });
        }
    }

    async fn recv_loop(self: Arc<Self>, tx: mpsc::Sender<RxItem>) {
        let dict = dictionary::active();
        loop {
            let buf = match self.transport.recv().await {
                Ok(buf) => buf,
                Err(_) => {
                    self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                    break;
                }
            };

            let item = Message::decode(&buf, &dict);

            if let Ok(msg) = &item {
                if msg.is_request() && msg.app_id == 0 {
                    if let Err(e) = self.reply_common(msg).await {
                        log::error!("{}", e);
                    }
                    continue;
                }
            }

            self.rx_depth.fetch_add(1, Ordering::Relaxed);
            if tx.send(item).await.is_err() {
                self.rx_depth.fetch_sub(1, Ordering::Relaxed);
                break;
            }
        }
        // dropping tx closes the channel and unblocks recv_from
    }
}

fn into_io(err: Error) -> std::io::Error {
    match err {
        Error::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}

async fn resolve_route(addr: &str) -> Result<RouteInfo> {
    let addrs = tokio::net::lookup_host((addr, transport::DEFAULT_PORT))
        .await
        .map_err(|_| Error::NoSuitableAddr(addr.to_string()))?;

    let remote_ip = addrs
        .map(|sa| sa.ip())
        .find(|ip| ip.is_ipv4())
        .ok_or_else(|| Error::NoSuitableAddr(addr.to_string()))?;

    route::collect(remote_ip)
}

/// Registry lookup, case-insensitive on the peer name.
pub fn get_by_name(name: &str) -> Result<Arc<Node>> {
    peers()
        .iter()
        .find(|node| node.name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| Error::UnknownPeer(name.to_string()))
}

pub fn remove(name: &str) {
    peers().retain(|node| !node.name.eq_ignore_ascii_case(name));
}

/// Snapshot of the registry, for iteration without holding the lock.
pub fn iter() -> Vec<Arc<Node>> {
    peers().clone()
}

/// Disconnects every registered peer, sending Disconnect-Peer first.
pub async fn disconnect_all() {
    for node in iter() {
        let _ = node.disconnect(true).await;
    }
}

/// Disconnects the peers created from accepted connections; used by the
/// server's graceful stop to drain its worker pool.
pub async fn disconnect_clients() {
    for node in iter() {
        if node.is_client() {
            let _ = node.disconnect(false).await;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PeerConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_port() -> u16 {
    transport::DEFAULT_PORT
}

fn default_transport() -> String {
    transport::DEFAULT_PROTOCOL.to_string()
}

fn default_timeout() -> u64 {
    transport::DEFAULT_TIMEOUT
}

/// Replaces the registry with the peers of a `{name: {address, port?,
/// transport?, timeout?}}` mapping.
pub async fn load_peers_from_str(yaml: &str) -> Result<()> {
    let configs: BTreeMap<String, PeerConfig> = serde_yaml::from_str(yaml)?;

    peers().clear();
    for (name, config) in configs {
        Node::new(
            &name,
            &config.address,
            config.port,
            &config.transport,
            config.timeout,
        )
        .await?;
    }

    Ok(())
}

pub async fn load_peers_from_file(path: &str) -> Result<()> {
    let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadYaml {
        file: path.to_string(),
        source: e,
    })?;
    load_peers_from_str(&yaml).await
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_yaml_defaults() {
        let _guard = testutil::REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let yaml = r#"
hss01:
  address: 127.0.0.1
mme01:
  address: 127.0.0.1
  port: 3869
  transport: tcp
  timeout: 5
"#;
        load_peers_from_str(yaml).await.unwrap();

        let hss = get_by_name("hss01").unwrap();
        assert_eq!(hss.remote_port, 3868);
        assert_eq!(hss.transport.name(), "SCTP");
        assert_eq!(hss.timeout(), 30);
        assert!(!hss.is_connected());
        assert!((3868u16..3868 + 32768).contains(&hss.local_port));

        let mme = get_by_name("MME01").unwrap();
        assert_eq!(mme.remote_port, 3869);
        assert_eq!(mme.transport.name(), "TCP");
        assert_eq!(mme.timeout(), 5);

        remove("hss01");
        remove("mme01");
    }

    #[tokio::test]
    async fn test_duplicate_peer_name_rejected() {
        let _guard = testutil::REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _node = Node::new("dup-peer", "127.0.0.1", 3868, "tcp", 30)
            .await
            .unwrap();
        let err = Node::new("DUP-PEER", "127.0.0.1", 3868, "tcp", 30).await;
        assert!(matches!(err, Err(Error::PeerExists(_))));
        remove("dup-peer");
    }

    #[tokio::test]
    async fn test_disconnected_peer_rejects_io() {
        let _guard = testutil::REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let node = Node::new("idle-peer", "127.0.0.1", 3868, "tcp", 30)
            .await
            .unwrap();
        assert!(matches!(
            node.send_bytes(&[0u8; 20]).await,
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            node.recv_from().await,
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            node.disconnect(false).await,
            Err(Error::NotConnected(_))
        ));
        remove("idle-peer");
    }
}
