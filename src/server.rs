//! Test-endpoint server: one SCTP and one TCP listener on the same
//! address, feeding accepted connections to a bounded worker pool. In
//! cli mode every received application message is answered with its
//! `reply()`; base-protocol traffic is always handled by the peers'
//! receive loops.

use crate::error::Error;
use crate::node::{self, Node};
use crate::transport::{sctp, Transport};
use lazy_static::lazy_static;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Semaphore};

pub const MAX_WORKERS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct Status {
    pub running: bool,
    pub sctp_info: String,
    pub tcp_info: String,
}

struct ServerState {
    status: StdMutex<Status>,
    stop_tx: watch::Sender<bool>,
}

lazy_static! {
    static ref SERVER: ServerState = {
        let (stop_tx, _) = watch::channel(false);
        ServerState {
            status: StdMutex::new(Status::default()),
            stop_tx,
        }
    };
}

fn status_mut<R>(f: impl FnOnce(&mut Status) -> R) -> R {
    let mut guard = SERVER.status.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

pub fn status() -> Status {
    SERVER.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

pub fn is_running() -> bool {
    status().running
}

/// Bounded pool of connection workers; `wait` drains by taking every
/// permit back.
#[derive(Clone)]
struct WorkerPool {
    workers: Arc<Semaphore>,
}

impl WorkerPool {
    fn new(max_workers: usize) -> WorkerPool {
        WorkerPool {
            workers: Arc::new(Semaphore::new(max_workers)),
        }
    }

    async fn execute<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await {
            tokio::spawn(async move {
                let _permit = permit;
                task.await;
            });
        }
    }

    async fn wait(&self) {
        let _ = self.workers.acquire_many(MAX_WORKERS as u32).await;
    }
}

/// Runs the server until `stop()` is called. `ready` (when given) is
/// signalled once the listeners are live and once more when the server
/// returns, so a caller can sequence on either.
pub async fn start(listen_addr: &str, cli_mode: bool, ready: Option<mpsc::Sender<()>>) {
    let rise_sema = || {
        if let Some(tx) = &ready {
            let _ = tx.try_send(());
        }
    };

    let _ = SERVER.stop_tx.send(false);

    let addr: SocketAddr = match resolve(listen_addr).await {
        Some(addr) => addr,
        None => {
            log::error!("cannot resolve listen address '{}'", listen_addr);
            rise_sema();
            return;
        }
    };

    let tcp_listener = match TcpListener::bind(addr).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            log::error!("tcp listen on {}: {}", addr, e);
            None
        }
    };
    let sctp_listener = match sctp::listen(addr) {
        Ok(listener) => Some(listener),
        Err(e) => {
            log::error!("sctp listen on {}: {}", addr, e);
            None
        }
    };

    if tcp_listener.is_none() && sctp_listener.is_none() {
        log::error!("no listeners created");
        rise_sema();
        return;
    }

    status_mut(|status| {
        status.running = true;
        status.tcp_info = tcp_listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| format!("tcp://{}", a))
            .unwrap_or_default();
        status.sctp_info = sctp_listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| format!("sctp://{}", a))
            .unwrap_or_default();
    });

    let pool = WorkerPool::new(MAX_WORKERS);
    let tcp_task = tokio::spawn(accept_loop(tcp_listener, "tcp", cli_mode, pool.clone()));
    let sctp_task = tokio::spawn(accept_loop(sctp_listener, "sctp", cli_mode, pool.clone()));

    rise_sema();

    let _ = tcp_task.await;
    let _ = sctp_task.await;
    pool.wait().await;

    status_mut(|status| {
        status.running = false;
        status.tcp_info.clear();
        status.sctp_info.clear();
    });
    rise_sema();
}

/// Signals a graceful stop: both accept loops finish, connected
/// client-origin peers are dropped so the worker pool can drain.
pub async fn stop() {
    if !is_running() {
        return;
    }
    let _ = SERVER.stop_tx.send(true);
    node::disconnect_clients().await;
}

async fn resolve(listen_addr: &str) -> Option<SocketAddr> {
    tokio::net::lookup_host(listen_addr)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
}

async fn accept_loop(
    listener: Option<TcpListener>,
    proto: &'static str,
    cli_mode: bool,
    pool: WorkerPool,
) {
    let listener = match listener {
        Some(listener) => listener,
        None => return,
    };

    let mut stop_rx = SERVER.stop_tx.subscribe();
    loop {
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = stop_rx.changed() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => match Transport::from_accepted(proto, stream).await {
                    Ok(transport) => {
                        pool.execute(handle_connection(transport, cli_mode)).await;
                    }
                    Err(e) => log::error!("{}", e),
                },
                Err(e) => log::error!("{} accept: {}", proto, e),
            },
        }
    }

    log::info!("{} listener stopped", proto.to_uppercase());
}

async fn handle_connection(transport: Transport, cli_mode: bool) {
    let peer = Node::from_transport(transport).await;
    log::info!("[{}] connection established", peer.name);

    if !cli_mode {
        return;
    }

    loop {
        let msg = match peer.recv_from().await {
            Ok(msg) => msg,
            Err(Error::RecvFrom { .. }) => break,
            Err(e) => {
                log::error!("{}", e);
                break;
            }
        };

        let mut ans = match msg.reply() {
            Ok(ans) => ans,
            Err(e) => {
                log::error!("{}", e);
                break;
            }
        };
        if let Err(e) = peer.send_to(&mut ans).await {
            log::error!("{}", e);
            break;
        }
    }

    let _ = peer.disconnect(true).await;
    log::info!("[{}] connection closed", peer.name);
}
