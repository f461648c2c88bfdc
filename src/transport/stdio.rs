//! Newline-delimited transport over an async reader/writer pair.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{Transport, TransportInfo};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::server::Server;

pub const NAME: &str = "stdio";

/// Queue depth between handlers and the writer.
const OUTBOUND_BUFFER: usize = 100;

/// Stdio transport. Each input line is one message; replies and
/// notifications are written one per line.
pub struct StdioTransport<R, W> {
    io: Mutex<Option<(R, W)>>,
    protocol: Option<String>,
    shutdown: CancellationToken,
}

impl StdioTransport<Stdin, Stdout> {
    /// Transport over the process's stdin and stdout.
    pub fn stdio(protocol: Option<String>) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), protocol)
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, protocol: Option<String>) -> Self {
        Self {
            io: Mutex::new(Some((reader, writer))),
            protocol,
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: NAME.to_string(),
            ..Default::default()
        }
    }

    async fn serve(&self, ctx: &Context, server: Arc<Server>) -> Result<()> {
        let (reader, writer) = self.io.lock().await.take().ok_or(Error::AlreadyServing)?;
        let protocol = self
            .protocol
            .clone()
            .unwrap_or_else(|| server.protocol().to_string());
        let wire = server.wire(&protocol)?;

        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_BUFFER);
        let stop_writer = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(writer, out_rx, stop_writer.clone()));

        let conn = ctx
            .child()
            .with_connection_id(Uuid::new_v4().to_string())
            .with_outbound(out_tx.clone());
        let mut lines = BufReader::new(reader).lines();
        let mut handlers = JoinSet::new();
        let mut outcome = Ok(());

        info!("Serving {} over stdio", protocol);
        loop {
            tokio::select! {
                _ = conn.done() => break,
                _ = self.shutdown.cancelled() => break,
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        trace!("Received: {}", line);
                        let raw = line.as_bytes().to_vec();
                        let server = Arc::clone(&server);
                        let wire = Arc::clone(&wire);
                        let ctx = conn.clone();
                        let tx = out_tx.clone();
                        handlers.spawn(async move {
                            if let Some(reply) = server.handle(&ctx, wire.as_ref(), &raw).await {
                                if tx.send(reply).await.is_err() {
                                    debug!("Writer gone, dropping reply");
                                }
                            }
                        });
                    }
                    Ok(None) => {
                        debug!("EOF on input, stopping transport");
                        break;
                    }
                    Err(e) => {
                        error!("Error reading input: {}", e);
                        outcome = Err(e.into());
                        break;
                    }
                },
            }
        }

        // Requests already read finish unless we are shutting down.
        if self.shutdown.is_cancelled() {
            conn.cancel();
        }
        while handlers.join_next().await.is_some() {}
        conn.cancel();

        stop_writer.cancel();
        if let Err(e) = writer_task.await {
            warn!("Writer task failed: {}", e);
        }
        info!("Stdio transport stopped");
        outcome
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// Write queued messages, one per line. On stop, flush whatever is
/// already queued and exit.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>, stop: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = stop.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    if write_line(&mut writer, &msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if let Err(e) = write_line(&mut writer, &msg).await {
            error!("Error writing output: {}", e);
            break;
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, msg: &[u8]) -> std::io::Result<()> {
    trace!("Sending: {}", String::from_utf8_lossy(msg));
    writer.write_all(msg).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
