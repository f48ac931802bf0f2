//! Newline-delimited JSON host loop
//!
//! Reads [`Envelope`]s, one per line, and writes two kinds of lines back:
//! replies to caller requests (`{"id", "response"}`) and instructions for
//! the consent surface (`{"surface": "open" | "close", ...}`).
//!
//! Every inbound message is handled on its own task, so a request suspended
//! on consent never holds up the decision that will resume it.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::broker::SurfaceCommand;
use crate::transport::{Envelope, Reply, Router};
use crate::types::{BrokerError, Response, Result};

/// Serve `input` until EOF, writing replies and surface commands to `output`.
///
/// Requests still waiting on consent at EOF are abandoned; their prompts
/// are dismissed.
pub async fn run<R, W>(
    router: Router,
    mut surface_commands: mpsc::UnboundedReceiver<SurfaceCommand>,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<Reply>();
    let mut lines = BufReader::new(input).lines();
    let mut tasks = JoinSet::new();

    info!("Keyward serving on stdio");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| BrokerError::Transport(format!("read failed: {e}")))?;
                let Some(line) = line else {
                    debug!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        let router = router.clone();
                        let reply_tx = reply_tx.clone();
                        tasks.spawn(async move {
                            if let Some(reply) = router.route(envelope).await {
                                // receiver only goes away on shutdown
                                let _ = reply_tx.send(reply);
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to decode envelope");
                        let reply = Reply {
                            id: Value::Null,
                            response: Response::error(
                                BrokerError::InvalidParams(format!("malformed envelope: {e}"))
                                    .into_body("decode"),
                            ),
                        };
                        write_line(&mut output, &reply).await?;
                    }
                }
            }
            Some(reply) = replies.recv() => write_line(&mut output, &reply).await?,
            Some(command) = surface_commands.recv() => write_line(&mut output, &command).await?,
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Message handler panicked");
                    }
                }
            }
        }
    }

    // dropping the handlers runs their cleanup, which queues close commands
    tasks.shutdown().await;
    drop(reply_tx);

    while let Some(reply) = replies.recv().await {
        write_line(&mut output, &reply).await?;
    }
    while let Ok(command) = surface_commands.try_recv() {
        write_line(&mut output, &command).await?;
    }

    output
        .flush()
        .await
        .map_err(|e| BrokerError::Transport(format!("flush failed: {e}")))?;
    info!("Keyward stopped");
    Ok(())
}

async fn write_line<W, T>(output: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)
        .map_err(|e| BrokerError::Internal(format!("failed to encode output: {e}")))?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .map_err(|e| BrokerError::Transport(format!("write failed: {e}")))?;
    output
        .flush()
        .await
        .map_err(|e| BrokerError::Transport(format!("flush failed: {e}")))
}
