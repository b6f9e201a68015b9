//! Stdio host - Serves the gateway over line-delimited JSON

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::CommandGateway;
use super::protocol::{parse_request, ErrorPayload, Response};

/// Read requests from `reader` until EOF or `shutdown`, answering on `writer`
///
/// Every request runs on its own task, so responses may be written out of
/// order. In-flight requests are drained before returning.
pub async fn serve<R, W>(
    gateway: Arc<CommandGateway>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Response>(256);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut in_flight = JoinSet::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, no longer reading requests");
                break;
            }
        };
        if read == 0 {
            debug!("Request stream closed");
            break;
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Rejected request line: {}", e);
                let payload = ErrorPayload::invalid_request(format!("Request is not UTF-8: {}", e));
                let _ = tx.send(Response::new(None, Err(payload))).await;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        // Reap finished requests so the set does not grow unbounded
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Request task failed: {}", e);
            }
        }

        let tx = tx.clone();
        match parse_request(line) {
            Ok(request) => {
                let gateway = Arc::clone(&gateway);
                in_flight.spawn(async move {
                    let result = gateway.dispatch(&request.command, request.args).await;
                    if let Err(e) = &result {
                        debug!("'{}' failed: {}", request.command, e.message);
                    }
                    let _ = tx.send(Response::new(Some(request.id), result)).await;
                });
            }
            Err((id, payload)) => {
                warn!("Rejected request line: {}", payload.message);
                let _ = tx.send(Response::new(id, Err(payload))).await;
            }
        }
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!("Request task failed: {}", e);
        }
    }

    drop(tx);
    writer_task.await??;
    Ok(())
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
