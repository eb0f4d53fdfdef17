pub mod pipe;
pub mod ratelimit;
pub mod stats;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::config::{Config, Host};
use crate::error::{Error, Result};
use crate::hooks::{self, HookArgs};
use ratelimit::RateLimiter;
use stats::ConnectionStats;

/// Default command used to reach a gateway hop: `%name` is the gateway,
/// `%h:%p` the destination behind it.
const DEFAULT_GATEWAY_COMMAND: &str = "ssh -W %h:%p %name";

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyOptions {
    /// Describe the intended connection instead of dialing.
    pub dry_run: bool,
}

/// Bridge the local input/output pair to the resolved host, directly or
/// through its gateway chain.
pub async fn proxy<R, W>(
    host: &Host,
    config: &Config,
    opts: ProxyOptions,
    local_in: R,
    local_out: W,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    if host.gateways.is_empty() {
        return proxy_direct(host, opts, local_in, local_out).await;
    }
    proxy_through_gateways(host, config, opts, local_in, local_out).await
}

/// Try each gateway in declaration order; `"direct"` attempts a direct
/// dial at that point in the chain. Hop failures are logged and the next
/// hop is tried.
async fn proxy_through_gateways<R, W>(
    host: &Host,
    config: &Config,
    opts: ProxyOptions,
    mut local_in: R,
    mut local_out: W,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    for gateway in &host.gateways {
        if gateway == "direct" {
            match proxy_direct_inner(host, opts, local_in, local_out).await {
                Ok(()) => return Ok(()),
                Err((returned_in, returned_out, err)) => {
                    tracing::warn!(host = %host.name, "direct connection failed: {err}");
                    local_in = returned_in;
                    local_out = returned_out;
                }
            }
        } else {
            let gateway_host = config.get_gateway_safe(gateway);
            match proxy_via_gateway(host, &gateway_host, opts).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(host = %host.name, gateway = %gateway, "gateway failed: {err}");
                }
            }
        }
    }
    Err(Error::GatewayChainExhausted)
}

/// Dial the host and run the bidirectional pipe.
async fn proxy_direct<R, W>(host: &Host, opts: ProxyOptions, local_in: R, local_out: W) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    match proxy_direct_inner(host, opts, local_in, local_out).await {
        Ok(()) => Ok(()),
        Err((_, _, err)) => Err(err),
    }
}

type DirectError<R, W> = (R, W, Error);

/// The direct-mode state machine. On pre-dial failure the local streams
/// are handed back so the gateway chain can retry with them.
async fn proxy_direct_inner<R, W>(
    host: &Host,
    opts: ProxyOptions,
    local_in: R,
    local_out: W,
) -> std::result::Result<(), DirectError<R, W>>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut host = host.clone();
    if let Err(err) = host_prepare(&mut host).await {
        return Err((local_in, local_out, err));
    }

    let addr = format!("{}:{}", host.host_name, host.port);
    if opts.dry_run {
        return Err((
            local_in,
            local_out,
            Error::DryRun(format!("would dial tcp {addr}")),
        ));
    }

    let mut stats = ConnectionStats::new();
    let args = HookArgs::Connect {
        host: &host,
        stats: &stats,
        error: None,
    };
    let mut before_handles = hooks::invoke_all(&host.before_connect, &args).await;

    let conn = match dial(&addr, host.connect_timeout).await {
        Ok(conn) => conn,
        Err(err) => {
            let message = err.to_string();
            let args = HookArgs::Connect {
                host: &host,
                stats: &stats,
                error: Some(&message),
            };
            hooks::invoke_all(&host.on_connect_error, &args).await.close();
            before_handles.close();
            return Err((local_in, local_out, err));
        }
    };

    stats.mark_connected();
    tracing::debug!(host = %host.name, %addr, "connected");
    let args = HookArgs::Connect {
        host: &host,
        stats: &stats,
        error: None,
    };
    let mut connect_handles = hooks::invoke_all(&host.on_connect, &args).await;

    // Losing the controlling terminal must not kill the bridge.
    let _hup_guard = ignore_sighup();

    let limiter = match rate_limiter(&host) {
        Ok(limiter) => limiter,
        Err(err) => return Err((local_in, local_out, err)),
    };

    let result = pipe::bridge(conn, local_in, local_out, limiter).await;

    stats.written_bytes = result.written_bytes;
    stats.mark_disconnected();
    let args = HookArgs::Connect {
        host: &host,
        stats: &stats,
        error: None,
    };
    hooks::invoke_all(&host.on_disconnect, &args).await.close();
    connect_handles.close();
    before_handles.close();

    tracing::debug!(
        host = %host.name,
        written = %stats.written_bytes_human(),
        duration = %stats.duration_human(),
        speed = %stats.average_speed_human(),
        "disconnected"
    );

    if let Some(err) = result.error {
        tracing::warn!(host = %host.name, "pipe error: {err}");
    }
    Ok(())
}

/// Reach the destination through one gateway hop by spawning the
/// cooperating SSH client with inherited stdio.
async fn proxy_via_gateway(host: &Host, gateway: &Host, opts: ProxyOptions) -> Result<()> {
    let mut host = host.clone();
    host_prepare(&mut host).await?;

    if !gateway.control_path.is_empty() && is_truthy(&gateway.control_master_mkdir) {
        let control_path = gateway.expand_string(&gateway.control_path, "");
        if let Some(parent) = Path::new(&control_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let template = if gateway.proxy_command.is_empty() {
        DEFAULT_GATEWAY_COMMAND.to_string()
    } else {
        format!("{} %name", gateway.proxy_command)
    };
    let command = crate::config::expand::expand_string(
        &template,
        &crate::config::expand::Expansion {
            name: &gateway.name,
            host_name: &host.host_name,
            port: &host.port,
            gateway: &gateway.name,
        },
    );

    if opts.dry_run {
        return Err(Error::DryRun(format!("would run {command:?}")));
    }
    run_proxy_command(&command).await
}

/// Indirect mode: split the command with POSIX quoting rules and run it
/// with the local process's stdio.
async fn run_proxy_command(command: &str) -> Result<()> {
    let argv = shell_words::split(command).map_err(|e| Error::CommandParse(e.to_string()))?;
    let Some((program, rest)) = argv.split_first() else {
        return Err(Error::CommandParse(command.to_string()));
    };

    tracing::debug!(%command, "spawning proxy command");
    let status = Command::new(program).args(rest).status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Subprocess {
            exit_code: status.code().unwrap_or(-1),
            stderr: String::new(),
        })
    }
}

/// Final hostname resolution, once per connection attempt.
pub async fn host_prepare(host: &mut Host) -> Result<()> {
    if host.host_name.is_empty() {
        host.host_name = host.name.clone();
    }

    if !host.resolve_nameservers.is_empty() {
        // The configured nameservers are recorded but lookups go through
        // the system resolver.
        tracing::debug!(
            host = %host.name,
            nameservers = ?host.resolve_nameservers,
            "resolving via system resolver"
        );
        let mut addrs = tokio::net::lookup_host((host.host_name.as_str(), 0))
            .await
            .map_err(|e| Error::ResolveFailure(e.to_string()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| Error::ResolveFailure(format!("no address for {}", host.host_name)))?;
        let resolved = addr.ip().to_string();
        drop(addrs);
        host.host_name = resolved;
    }

    if !host.resolve_command.is_empty() {
        let command = host.expand_string(&host.resolve_command, "");
        let argv = shell_words::split(&command).map_err(|e| Error::CommandParse(e.to_string()))?;
        let Some((program, rest)) = argv.split_first() else {
            return Err(Error::CommandParse(command));
        };

        let output = Command::new(program).args(rest).output().await?;
        if !output.status.success() {
            return Err(Error::ResolveFailure(format!(
                "{command:?} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if resolved.is_empty() {
            return Err(Error::ResolveFailure(format!(
                "{command:?} produced no hostname"
            )));
        }
        host.host_name = resolved;
    }

    Ok(())
}

async fn dial(addr: &str, timeout_secs: u64) -> Result<TcpStream> {
    let connect = TcpStream::connect(addr);
    let stream = if timeout_secs > 0 {
        tokio::time::timeout(Duration::from_secs(timeout_secs), connect)
            .await
            .map_err(|_| Error::Dial {
                addr: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
    } else {
        connect.await
    };
    stream.map_err(|source| Error::Dial {
        addr: addr.to_string(),
        source,
    })
}

/// ssh-config style yes/no flag values.
fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

fn rate_limiter(host: &Host) -> Result<Option<Arc<RateLimiter>>> {
    if host.rate_limit.is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(RateLimiter::from_rate(&host.rate_limit)?)))
}

/// Drains SIGHUP while it lives, stopping the drain task on drop.
struct SighupGuard(Option<tokio::task::JoinHandle<()>>);

impl Drop for SighupGuard {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

/// Ignore SIGHUP for as long as the returned guard lives.
#[cfg(unix)]
fn ignore_sighup() -> SighupGuard {
    use tokio::signal::unix::{signal, SignalKind};
    let mut stream = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("cannot install SIGHUP handler: {err}");
            return SighupGuard(None);
        }
    };
    let task = tokio::spawn(async move {
        loop {
            stream.recv().await;
            tracing::debug!("ignoring SIGHUP");
        }
    });
    SighupGuard(Some(task))
}

#[cfg(not(unix))]
fn ignore_sighup() -> SighupGuard {
    SighupGuard(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::dummy_config;
    use tokio::io::{empty, sink};
    use tokio::net::TcpListener;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("yes"));
        assert!(is_truthy("Yes"));
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("no"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }

    #[tokio::test]
    async fn test_host_prepare_falls_back_to_name() {
        let mut host = Host::new("fallback.example");
        host_prepare(&mut host).await.unwrap();
        assert_eq!(host.host_name, "fallback.example");
    }

    #[tokio::test]
    async fn test_host_prepare_resolve_command() {
        let mut host = Host::new("box");
        host.host_name = "ignored".to_string();
        host.resolve_command = "echo 10.9.8.7".to_string();
        host_prepare(&mut host).await.unwrap();
        assert_eq!(host.host_name, "10.9.8.7");
    }

    #[tokio::test]
    async fn test_host_prepare_resolve_command_failure() {
        let mut host = Host::new("box");
        host.resolve_command = "false".to_string();
        let err = host_prepare(&mut host).await.unwrap_err();
        assert!(matches!(err, Error::ResolveFailure(_)));
    }

    #[tokio::test]
    async fn test_host_prepare_resolve_command_expands_hostname() {
        let mut host = Host::new("box");
        host.host_name = "real-host".to_string();
        host.resolve_command = "echo %h".to_string();
        host_prepare(&mut host).await.unwrap();
        assert_eq!(host.host_name, "real-host");
    }

    #[tokio::test]
    async fn test_dry_run_describes_dial() {
        let config = dummy_config();
        let host = config.get_host_safe("titi");
        let opts = ProxyOptions { dry_run: true };
        let err = proxy(&host, &config, opts, empty(), sink()).await.unwrap_err();
        match err {
            Error::DryRun(message) => assert!(message.contains("tata:23"), "{message}"),
            other => panic!("expected dry-run error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_dial_failure_surfaces() {
        // Reserved TEST-NET-1 address, nothing listens there.
        let mut host = Host::new("unreachable");
        host.host_name = "192.0.2.1".to_string();
        host.port = "22".to_string();
        host.connect_timeout = 1;
        let config = Config::new();
        let err = proxy(&host, &config, ProxyOptions::default(), empty(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dial { .. }));
    }

    #[tokio::test]
    async fn test_direct_gateway_is_tried_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let accepted_clone = accepted.clone();

        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            accepted_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            drop(conn);
        });

        let mut config = Config::new();
        let mut fff = Host::new("fff");
        // Reaching this hop would spawn a failing command.
        fff.proxy_command = "false".to_string();
        config.add_host("fff".to_string(), fff);
        config.apply_missing_names();

        let mut host = Host::new("ggg");
        host.host_name = addr.ip().to_string();
        host.port = addr.port().to_string();
        host.gateways = vec!["direct".to_string(), "fff".to_string()];

        proxy(&host, &config, ProxyOptions::default(), empty(), sink())
            .await
            .unwrap();
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gateway_chain_exhausted() {
        let config = dummy_config();
        let mut host = Host::new("walled");
        host.host_name = "192.0.2.1".to_string();
        host.port = "22".to_string();
        host.connect_timeout = 1;
        host.gateways = vec!["direct".to_string()];

        let err = proxy(&host, &config, ProxyOptions::default(), empty(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatewayChainExhausted));
    }

    #[tokio::test]
    async fn test_invalid_rate_limit_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut host = Host::new("throttled");
        host.host_name = addr.ip().to_string();
        host.port = addr.port().to_string();
        host.rate_limit = "not-a-rate".to_string();
        let config = Config::new();

        let err = proxy(&host, &config, ProxyOptions::default(), empty(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateParse(_)));
    }
}
