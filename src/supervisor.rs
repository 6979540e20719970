//! Accept loop, shutdown signal handling, and quiesce-on-exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::client::Client;
use crate::logger::Logger;
use crate::registry::{ClientRegistry, PlayerRegistry};

/// Bundles both registries and the shared logger. Threaded explicitly
/// through the supervisor and session loop rather than held as statics.
pub struct ServerState {
    pub players: PlayerRegistry,
    pub clients: ClientRegistry,
    pub log: Arc<Logger>,
}

impl ServerState {
    pub fn new(max_clients: usize, log: Arc<Logger>) -> Arc<ServerState> {
        Arc::new(ServerState {
            players: PlayerRegistry::new(),
            clients: ClientRegistry::new(max_clients),
            log,
        })
    }
}

/// Binds `addr`, accepts connections until a shutdown signal arrives, then
/// half-closes every live socket and waits for all session tasks to drain.
pub async fn run(addr: &str, state: Arc<ServerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await.inspect_err(|err| {
        state.log.error(format!("failed to bind {addr}: {err}"));
    })?;
    state.log.info(format!("listening on {addr}"));

    let next_id = AtomicU64::new(0);
    let mut shutdown = shutdown_signal();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                state.log.info("shutdown signal received, closing accept loop");
                break;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        state.log.warn(format!("accept failed: {err}"));
                        continue;
                    }
                };

                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let (reader, writer) = tokio::io::split(stream);
                let client = Client::new(id, Box::new(writer), state.log.clone());

                if let Err(err) = state.clients.register(client.clone()).await {
                    state.log.warn(format!("connection {peer} rejected: {err}"));
                    continue;
                }
                state.log.verbose(format!("client {id} connected from {peer}"));

                let state = state.clone();
                tokio::spawn(async move {
                    crate::session::run(reader, client, state).await;
                });
            }
        }
    }

    state.clients.shutdown_all(&state.log).await;
    state.clients.wait_for_empty().await;
    state.players.finalize().await;
    state.log.info("shutdown complete");
    Ok(())
}

/// Wraps the platform shutdown trigger behind one interface: SIGHUP on
/// unix, Ctrl-C everywhere (matching §6's "SIGHUP or equivalent").
struct Shutdown {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Shutdown {
    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.hangup.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn shutdown_signal() -> Shutdown {
    #[cfg(unix)]
    {
        let hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("failed to install SIGHUP handler");
        Shutdown { hangup }
    }
    #[cfg(not(unix))]
    {
        Shutdown {}
    }
}
