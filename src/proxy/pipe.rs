use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::proxy::ratelimit::RateLimiter;

/// Outcome of one bridge run. `written_bytes` counts the remote to
/// local-stdout direction only.
pub struct BridgeResult {
    pub written_bytes: u64,
    pub error: Option<std::io::Error>,
}

/// Bridge the remote stream to the local input/output pair.
///
/// Two copy tasks run concurrently; the first to finish wins, the other
/// is cancelled and drained before returning. EOF on either side is a
/// normal termination, not an error. A shared rate limiter, when
/// present, throttles both directions from the same bucket.
pub async fn bridge<S, R, W>(
    remote: S,
    local_in: R,
    local_out: W,
    limiter: Option<Arc<RateLimiter>>,
) -> BridgeResult
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (remote_read, remote_write) = tokio::io::split(remote);
    let cancel = CancellationToken::new();

    let mut inbound = tokio::spawn(copy_stream(
        remote_read,
        local_out,
        limiter.clone(),
        cancel.clone(),
    ));
    let mut outbound = tokio::spawn(copy_stream(local_in, remote_write, limiter, cancel.clone()));

    let (inbound_res, outbound_res) = tokio::select! {
        res = &mut inbound => {
            cancel.cancel();
            (res, (&mut outbound).await)
        }
        res = &mut outbound => {
            cancel.cancel();
            ((&mut inbound).await, res)
        }
    };

    let mut error = None;
    let written_bytes = match flatten(inbound_res) {
        Ok(n) => n,
        Err(err) => {
            error = Some(err);
            0
        }
    };
    if let Err(err) = flatten(outbound_res) {
        error.get_or_insert(err);
    }

    BridgeResult {
        written_bytes,
        error,
    }
}

fn flatten(res: Result<std::io::Result<u64>, tokio::task::JoinError>) -> std::io::Result<u64> {
    res.map_err(std::io::Error::other)?
}

/// Copy bytes until EOF, error or cancellation, returning the count
/// copied. A task blocked in `read` is released by the cancellation
/// branch of the select.
async fn copy_stream<R, W>(
    mut reader: R,
    mut writer: W,
    limiter: Option<Arc<RateLimiter>>,
    cancel: CancellationToken,
) -> std::io::Result<u64>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            res = reader.read(&mut buf) => res?,
        };
        if n == 0 {
            break;
        }
        if let Some(limiter) = &limiter {
            limiter.admit(n as u32).await;
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }

    Ok(total)
}
