use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::config::{graphviz, sshconfig, Config};
use crate::proxy::{self, ProxyOptions};

/// The ProxyCommand entry point: resolve the target, regenerate an
/// outdated generated ssh config, then bridge stdio to the destination.
pub async fn proxy(
    config_path: Option<PathBuf>,
    target: &str,
    port: Option<u16>,
    dry_run: bool,
    no_rewrite: bool,
) -> anyhow::Result<()> {
    let config = Config::open(config_path)?;

    let ssh_config = sshconfig::ssh_config_path();
    match sshconfig::is_outdated(&config, &ssh_config) {
        Ok(true) if no_rewrite => {
            tracing::warn!(
                path = %ssh_config.display(),
                "generated ssh config is outdated, not rewriting"
            );
        }
        Ok(true) => sshconfig::save(&config, &ssh_config).await?,
        Ok(false) => {}
        Err(err) => tracing::warn!("cannot check generated ssh config: {err}"),
    }

    let mut host = config.get_host_safe(target);
    if let Some(port) = port {
        host.port = port.to_string();
    }

    let dry_run = dry_run || std::env::var("ASSH_DRYRUN").as_deref() == Ok("1");
    let opts = ProxyOptions { dry_run };
    proxy::proxy(
        &host,
        &config,
        opts,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;
    Ok(())
}

/// Print the generated classic ssh config.
pub fn build(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::open(config_path)?;
    print!("{}", sshconfig::render(&config));
    Ok(())
}

/// Display system-wide information.
pub fn info(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::open(config_path)?;

    println!(
        "Dry-run mode: {}",
        std::env::var("ASSH_DRYRUN").as_deref() == Ok("1")
    );
    println!();
    println!("RC files:");
    for path in config.included_files() {
        println!("- {}", path.display());
    }
    println!();
    println!("Statistics:");
    println!("- {} hosts", config.hosts.len());
    println!("- {} templates", config.templates.len());
    println!("- {} included files", config.included_files().count());
    Ok(())
}

/// Print the gateway graph in dot format.
pub fn graphviz(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::open(config_path)?;
    print!("{}", graphviz::graph(&config));
    Ok(())
}

/// TCP round-trip "ping" against a resolved host.
pub async fn ping(
    config_path: Option<PathBuf>,
    target: &str,
    port: Option<u16>,
    count: u64,
    wait: f64,
    waittime: f64,
    exit_on_success: bool,
) -> anyhow::Result<()> {
    let config = Config::open(config_path)?;
    let mut host = config.get_host(target)?;
    if let Some(port) = port {
        host.port = port.to_string();
    }
    proxy::host_prepare(&mut host).await?;

    anyhow::ensure!(
        host.gateways.is_empty(),
        "ping does not work through gateways (yet)"
    );
    anyhow::ensure!(
        host.proxy_command.is_empty(),
        "ping does not work with a custom ProxyCommand (yet)"
    );

    let port_name = if host.port == "22" { "ssh" } else { "unknown" };
    println!(
        "PING {target} ({}) PORT {} ({port_name}) PROTO tcp",
        host.host_name, host.port
    );
    let dest = format!("{}:{}", host.host_name, host.port);

    let mut transmitted = 0u64;
    let mut received = 0u64;
    let mut min_roundtrip = Duration::ZERO;
    let mut max_roundtrip = Duration::ZERO;
    let mut total_roundtrip = Duration::ZERO;

    let mut seq = 0u64;
    while count == 0 || seq < count {
        if seq > 0 {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
        let start = Instant::now();
        let attempt = tokio::time::timeout(
            Duration::from_secs_f64(waittime),
            TcpStream::connect(&dest),
        )
        .await;
        let elapsed = start.elapsed();

        transmitted += 1;
        total_roundtrip += elapsed;
        if min_roundtrip.is_zero() || elapsed < min_roundtrip {
            min_roundtrip = elapsed;
        }
        if elapsed > max_roundtrip {
            max_roundtrip = elapsed;
        }

        match attempt {
            Ok(Ok(_conn)) => {
                received += 1;
                println!(
                    "Connected to {}: seq={seq} time={elapsed:?} protocol=tcp port={}",
                    host.host_name, host.port
                );
                if exit_on_success {
                    break;
                }
            }
            Ok(Err(err)) => println!("Request timeout for seq {seq} ({err})"),
            Err(_) => println!("Request timeout for seq {seq} (timed out)"),
        }
        seq += 1;
    }

    println!();
    println!("--- {target} assh ping statistics ---");
    let loss = (transmitted - received) as f64 / transmitted as f64 * 100.0;
    println!("{transmitted} packets transmitted, {received} packets received, {loss:.2}% packet loss");
    let avg = total_roundtrip / transmitted.max(1) as u32;
    println!("round-trip min/avg/max = {min_roundtrip:?}/{avg:?}/{max_roundtrip:?}");
    Ok(())
}
