//! Device protocol listener: one task per TCP connection, each owning its socket and session.

use std::sync::Arc;

use roadhill_core::{Dispatcher, Outcome, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};

const READ_BUF_SIZE: usize = 4096;

/// Per-connection resource limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_connections: Option<usize>,
    pub max_message_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_connections: None,
            max_message_len: roadhill_core::MAX_MESSAGE_LEN,
        }
    }
}

/// Bind and serve devices until accept fails.
pub async fn run_listener(
    bind: &str,
    dispatcher: Arc<Dispatcher>,
    limits: Limits,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "device listener started");
    serve(listener, dispatcher, limits).await
}

/// Accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    limits: Limits,
) -> std::io::Result<()> {
    let admission = limits.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    loop {
        let (stream, peer) = listener.accept().await?;
        let permit = match &admission {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!(%peer, "connection limit reached, closing");
                    drop(stream);
                    continue;
                }
            },
            None => None,
        };
        let session = Session::with_max_message_len(dispatcher.clone(), limits.max_message_len);
        let span = info_span!("session", id = %session.id(), %peer);
        tokio::spawn(
            async move {
                run_connection(stream, session).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
}

async fn run_connection(mut stream: TcpStream, mut session: Session) {
    info!("device connected");
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                info!("device disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        let outcomes = match session.on_data(&buf[..n]) {
            Ok(o) => o,
            Err(_) => break,
        };
        if let Err(e) = deliver(&mut stream, outcomes).await {
            warn!(error = %e, "write failed");
            break;
        }
    }
    session.on_closed();
}

/// Log every outcome and write each reply as its own frame.
async fn deliver(stream: &mut TcpStream, outcomes: Vec<Outcome>) -> std::io::Result<()> {
    for outcome in outcomes {
        match outcome {
            Outcome::Reply {
                request,
                kind,
                frame,
            } => {
                info!(%request, "incoming <-");
                let line = String::from_utf8_lossy(&frame);
                info!(%kind, outgoing = %line.trim_end(), "outgoing ->");
                stream.write_all(&frame).await?;
                stream.flush().await?;
            }
            Outcome::Ignored { request } => {
                info!(%request, "incoming <-");
                debug!("not DEVICE_INFO, ignored");
            }
            Outcome::Rejected { request, error } => {
                info!(%request, "incoming <-");
                warn!(%error, "malformed DEVICE_INFO, no reply");
            }
            Outcome::Unparseable { discarded, reason } => {
                debug!(
                    %reason,
                    bytes = discarded.len(),
                    data = %String::from_utf8_lossy(&discarded).trim_end(),
                    "discarded unparseable input"
                );
            }
        }
    }
    Ok(())
}
