//! Bidirectional byte forwarding for one active connection

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on flushing and shutting down a write half once its
/// direction is finished
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Bytes moved in each direction of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Local to upstream
    pub sent: u64,
    /// Upstream to local
    pub received: u64,
}

/// Run both copy directions until they finish.
///
/// `done` is the connection's single completion signal: whichever direction
/// ends first (EOF, error, idle timeout) cancels it, which unblocks the other
/// direction. Cancelling it from outside force-closes the connection.
pub async fn pipe<LR, LW, UR, UW>(
    local: (LR, LW),
    upstream: (UR, UW),
    done: CancellationToken,
    idle_timeout: Option<Duration>,
) -> ForwardStats
where
    LR: AsyncRead + Unpin + Send + 'static,
    LW: AsyncWrite + Unpin + Send + 'static,
    UR: AsyncRead + Unpin + Send + 'static,
    UW: AsyncWrite + Unpin + Send + 'static,
{
    let (local_reader, local_writer) = local;
    let (upstream_reader, upstream_writer) = upstream;

    let outbound = tokio::spawn(copy_until_done(
        local_reader,
        upstream_writer,
        done.clone(),
        idle_timeout,
        "local->upstream",
    ));
    let inbound = tokio::spawn(copy_until_done(
        upstream_reader,
        local_writer,
        done,
        idle_timeout,
        "upstream->local",
    ));

    let (sent, received) = tokio::join!(outbound, inbound);
    ForwardStats {
        sent: sent.unwrap_or(0),
        received: received.unwrap_or(0),
    }
}

async fn copy_until_done<R, W>(
    mut reader: R,
    mut writer: W,
    done: CancellationToken,
    idle_timeout: Option<Duration>,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let step = async {
            let n = match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, reader.read(&mut buf))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??,
                None => reader.read(&mut buf).await?,
            };
            if n > 0 {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await?;
            }
            Ok::<usize, io::Error>(n)
        };

        tokio::select! {
            _ = done.cancelled() => {
                debug!(direction, "Forwarding cancelled after {} bytes", total);
                break;
            }
            result = step => match result {
                Ok(0) => {
                    debug!(direction, "EOF after {} bytes", total);
                    break;
                }
                Ok(n) => total += n as u64,
                Err(e) => {
                    debug!(direction, "Forwarding error after {} bytes: {}", total, e);
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
    done.cancel();
    total
}
