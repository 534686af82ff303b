//! Wire server: bind synchronously, accept one client asynchronously
//!
//! [`listen`] does not return until the socket is listening, so a test
//! runner started afterwards always finds a server to connect to, even if
//! the connection is not being serviced yet. [`ServerHandle::accept_once`]
//! then services a single client on a background task which can always be
//! stopped, whether or not a client ever shows up.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::Result;

use super::engine::{StepEngine, WireConnection};
use super::listener::{WireListener, POISON_PILL};
use super::WireEndpoint;

/// How long a connection accepted during shutdown gets to show it is the pill
const PILL_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// How a pending accept is stopped at shutdown
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Race the accept against a shutdown signal
    #[default]
    Signal,
    /// Plain blocking accept, unblocked by connecting to ourselves
    PoisonPill,
}

/// How the accept task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// A client connected and was handed to the step engine
    Connected { peer: String },
    /// Shut down before any client connected
    Cancelled,
}

/// Bind and listen on `endpoint`
///
/// Returns once the socket is accepting connections. Must be called from
/// within a tokio runtime.
pub fn listen(endpoint: &WireEndpoint, mode: ShutdownMode) -> Result<ServerHandle> {
    let listener = WireListener::bind(endpoint)?;
    tracing::debug!("Listening on {}", listener.local_address());

    let (shutdown_tx, _) = watch::channel(false);
    Ok(ServerHandle {
        listener: Arc::new(listener),
        shutdown_tx,
        accepted: Arc::new(AtomicBool::new(false)),
        mode,
        task: None,
    })
}

/// Owner of a listening wire socket and its accept task
///
/// Dropping the handle raises the shutdown signal, so the accept task always
/// resolves; [`ServerHandle::finish`] additionally waits for it.
pub struct ServerHandle {
    listener: Arc<WireListener>,
    shutdown_tx: watch::Sender<bool>,
    /// Set by the accept task once a real client is accepted
    accepted: Arc<AtomicBool>,
    mode: ShutdownMode,
    task: Option<JoinHandle<AcceptOutcome>>,
}

impl ServerHandle {
    pub fn local_address(&self) -> String {
        self.listener.local_address()
    }

    /// Start the background task that accepts a single client
    ///
    /// # Panics
    ///
    /// If called more than once on the same handle.
    pub fn accept_once(&mut self, engine: Arc<dyn StepEngine>) {
        assert!(
            self.task.is_none(),
            "accept_once called twice on the same wire server"
        );

        let listener = Arc::clone(&self.listener);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let accepted = Arc::clone(&self.accepted);
        let mode = self.mode;

        self.task = Some(tokio::spawn(async move {
            accept_and_serve(listener, shutdown_rx, accepted, mode, engine).await
        }));
    }

    /// Stop a pending accept
    ///
    /// Idempotent, and a no-op once a client has been accepted: that
    /// connection is left to finish on its own.
    pub async fn shutdown(&self) {
        if !self.raise_shutdown() || !self.needs_poison_pill() {
            return;
        }
        tracing::debug!("Stopping wire server on {}", self.local_address());
        if let Err(e) = self.listener.poke().await {
            tracing::warn!("Failed to stop wire server: {}", e);
        }
    }

    /// Shut down and wait for the accept task to end
    pub async fn finish(mut self) -> AcceptOutcome {
        self.shutdown().await;

        match self.task.take() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Wire server task failed: {}", e);
                    AcceptOutcome::Cancelled
                }
            },
            None => AcceptOutcome::Cancelled,
        }
    }

    /// Raise the shutdown flag, returning whether this call raised it
    fn raise_shutdown(&self) -> bool {
        self.shutdown_tx.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        })
    }

    fn needs_poison_pill(&self) -> bool {
        self.mode == ShutdownMode::PoisonPill
            && !self.accepted.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.raise_shutdown() || !self.needs_poison_pill() {
            return;
        }
        // Cannot await here; hand the poke to the runtime if there still is one
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let listener = Arc::clone(&self.listener);
            runtime.spawn(async move {
                if let Err(e) = listener.poke().await {
                    tracing::warn!("Failed to stop wire server: {}", e);
                }
            });
        }
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_and_serve(
    listener: Arc<WireListener>,
    mut shutdown_rx: watch::Receiver<bool>,
    accepted: Arc<AtomicBool>,
    mode: ShutdownMode,
    engine: Arc<dyn StepEngine>,
) -> AcceptOutcome {
    let result = match mode {
        ShutdownMode::Signal => {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => {
                    tracing::debug!("Wire server cancelled before any client connected");
                    return AcceptOutcome::Cancelled;
                }
                result = listener.accept() => result,
            }
        }
        ShutdownMode::PoisonPill => listener.accept().await,
    };

    let (mut connection, peer) = match result {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!("Wire server accept failed: {}", e);
            return AcceptOutcome::Cancelled;
        }
    };

    // Shutdown may have raced a real client, so only the pill's payload marks the pill
    if mode == ShutdownMode::PoisonPill && *shutdown_rx.borrow() {
        connection = match unless_poison_pill(connection).await {
            Some(connection) => connection,
            None => {
                tracing::debug!("Wire server stopped by poison pill");
                return AcceptOutcome::Cancelled;
            }
        };
    }
    accepted.store(true, Ordering::SeqCst);

    tracing::debug!("Wire client connected from {}", peer);
    if let Err(e) = engine.serve(connection).await {
        tracing::warn!("Step engine failed: {}", e);
    }

    AcceptOutcome::Connected { peer }
}

/// Read the start of `connection`, returning `None` if it is the poison pill
///
/// Any other client gets its connection back with the bytes read so far
/// replayed ahead of the rest.
async fn unless_poison_pill(mut connection: WireConnection) -> Option<WireConnection> {
    let mut head = Vec::with_capacity(POISON_PILL.len());
    let mut buf = [0u8; 64];

    while head.len() < POISON_PILL.len() {
        let wanted = (POISON_PILL.len() - head.len()).min(buf.len());
        match tokio::time::timeout(PILL_READ_TIMEOUT, connection.read(&mut buf[..wanted])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                head.extend_from_slice(&buf[..n]);
                if !POISON_PILL.starts_with(&head) {
                    break;
                }
            }
            Ok(Err(e)) => {
                tracing::debug!("Discarding connection that failed during shutdown: {}", e);
                return None;
            }
        }
    }

    if head == POISON_PILL {
        return None;
    }
    Some(Box::new(Replayed {
        head,
        consumed: 0,
        inner: connection,
    }))
}

/// A connection with some already-read bytes put back in front
struct Replayed {
    head: Vec<u8>,
    consumed: usize,
    inner: WireConnection,
}

impl AsyncRead for Replayed {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.consumed < this.head.len() {
            let remaining = &this.head[this.consumed..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.consumed += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Replayed {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
