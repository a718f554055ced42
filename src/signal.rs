//! Process signal dispatch: SIGINT/SIGTERM stop the server when it is
//! running, otherwise they interrupt every peer currently blocked in a
//! receive so the caller gets control back.

use crate::node;
use crate::server;
use tokio::signal::unix::{signal, SignalKind};

/// Spawns the signal handling task. Cancellation is cooperative: peers
/// get one interrupt token each, nothing is forcibly killed.
pub fn spawn_handler() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("cannot install SIGINT handler: {}", e);
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("cannot install SIGTERM handler: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }

            if server::is_running() {
                server::stop().await;
                continue;
            }

            for peer in node::iter() {
                if peer.is_receiving() {
                    peer.send_interrupt();
                }
            }
        }
    })
}
