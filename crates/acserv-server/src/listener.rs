//! Listening sockets, accept loops and coordinated shutdown

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{tls, ConnectionHandler, GatewayContext, RunningFlag, ServerError};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Owns every listening socket of the gateway.
///
/// One accept loop runs per listener and one task per accepted connection;
/// all of them are counted by a [`TaskTracker`] so [`shutdown`] can wait
/// until the last connection is gone.
///
/// [`shutdown`]: ListenerManager::shutdown
pub struct ListenerManager {
    context: Arc<GatewayContext>,
    listeners: Mutex<Vec<TcpListener>>,
    local_addrs: Vec<SocketAddr>,
    running_tx: watch::Sender<bool>,
    running: RunningFlag,
    tracker: TaskTracker,
    shutdown_started: AtomicBool,
    stopped: AtomicBool,
    done_tx: mpsc::Sender<()>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl ListenerManager {
    /// Bind every configured address.
    ///
    /// If one address cannot be bound the sockets opened so far are closed
    /// and the error is returned.
    pub async fn bind(context: GatewayContext) -> Result<Self, ServerError> {
        let mut listeners = Vec::with_capacity(context.listen.len());
        let mut local_addrs = Vec::with_capacity(context.listen.len());

        for &address in &context.listen {
            let listener = match TcpListener::bind(address).await {
                Ok(listener) => listener,
                Err(source) => {
                    if !listeners.is_empty() {
                        warn!(
                            "Closing {} listener(s) after bind failure on {}",
                            listeners.len(),
                            address
                        );
                    }
                    return Err(ServerError::Bind { address, source });
                }
            };

            let local_addr = listener.local_addr()?;
            info!("Gateway listening on {}", local_addr);
            local_addrs.push(local_addr);
            listeners.push(listener);
        }

        let (running_tx, running) = RunningFlag::channel();
        let (done_tx, done_rx) = mpsc::channel(1);

        Ok(Self {
            context: Arc::new(context),
            listeners: Mutex::new(listeners),
            local_addrs,
            running_tx,
            running,
            tracker: TaskTracker::new(),
            shutdown_started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            done_tx,
            done_rx: tokio::sync::Mutex::new(done_rx),
        })
    }

    /// Addresses actually bound, in configuration order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Run the accept loops.
    ///
    /// Returns once every accept loop and every connection task has exited,
    /// which only happens after [`shutdown`](Self::shutdown).
    pub async fn start(&self) {
        // Loops are spawned under the lock so shutdown() either clears the
        // listeners first or finds the loops already tracked
        if let Ok(mut listeners) = self.listeners.lock() {
            let listeners = std::mem::take(&mut *listeners);
            if !self.shutdown_started.load(Ordering::SeqCst) {
                for listener in listeners {
                    self.tracker.spawn(accept_loop(
                        listener,
                        self.context.clone(),
                        self.running.clone(),
                        self.tracker.clone(),
                    ));
                }
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        debug!("All accept loops and connections finished");
    }

    /// Stop accepting, wait for every connection to end, then signal
    /// [`wait_stopped`](Self::wait_stopped). Later calls only wait.
    pub async fn shutdown(&self) {
        let first = !self.shutdown_started.swap(true, Ordering::SeqCst);
        if first {
            info!("Shutting down gateway");
            self.running_tx.send_replace(false);

            // Listeners never handed to an accept loop
            if let Ok(mut listeners) = self.listeners.lock() {
                listeners.clear();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;

        if first {
            self.cleanup();
            let _ = self.done_tx.try_send(());
        }
    }

    /// Wait until a shutdown has fully completed
    pub async fn wait_stopped(&self) {
        let mut done_rx = self.done_rx.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if done_rx.recv().await.is_some() {
            self.stopped.store(true, Ordering::Release);
        }
    }

    fn cleanup(&self) {
        // Tunnel teardown hooks in here once tunnels carry traffic
        info!("Gateway stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<GatewayContext>,
    mut running: RunningFlag,
    tracker: TaskTracker,
) {
    let local = listener.local_addr().ok();

    while running.is_running() {
        let accepted = tokio::select! {
            _ = running.stopped() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracker.spawn(handle_connection(
                    stream,
                    peer,
                    context.clone(),
                    running.clone(),
                ));
            }
            Err(e) => {
                if !running.is_running() {
                    break;
                }
                error!("Failed to accept connection on {:?}: {}", local, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    debug!("Accept loop on {:?} stopped", local);
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<GatewayContext>,
    mut running: RunningFlag,
) {
    debug!("New connection from {}", peer);
    let local_addr = stream.local_addr().ok();
    let _ = stream.set_nodelay(true);

    let accepted = tokio::select! {
        _ = running.stopped() => {
            debug!("Server stopping, abandoning handshake with {}", peer);
            return;
        }
        accepted = tls::accept(
            stream,
            &context.resolver,
            local_addr,
            context.options.limits.idle_timeout,
        ) => accepted,
    };

    let (tls_stream, selection) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("TLS handshake failed from {}: {}", peer, e);
            return;
        }
    };
    debug!(
        "TLS handshake completed for {} ({:?})",
        peer, selection.matched_by
    );

    ConnectionHandler::new(
        tls_stream,
        peer,
        context.routes.clone(),
        context.options.clone(),
        running,
    )
    .run()
    .await;
}
