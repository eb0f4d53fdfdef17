use std::path::Path;

use tokio::process::{Child, Command};

use crate::config::expand::expand_env;
use crate::config::Host;
use crate::error::{Error, Result};
use crate::proxy::stats::ConnectionStats;

/// Arguments handed to hook drivers at lifecycle transitions.
pub enum HookArgs<'a> {
    Connect {
        host: &'a Host,
        stats: &'a ConnectionStats,
        error: Option<&'a str>,
    },
    ConfigWrite {
        ssh_config_path: &'a Path,
    },
}

/// A resource acquired by a driver, released at bundle close.
pub trait HookHandle: Send {
    fn close(&mut self);
}

/// The bundle of handles returned by [`invoke_all`], closed during
/// teardown.
#[derive(Default)]
pub struct HookHandles(Vec<Box<dyn HookHandle>>);

impl HookHandles {
    pub fn close(&mut self) {
        for handle in &mut self.0 {
            handle.close();
        }
        self.0.clear();
    }
}

impl Drop for HookHandles {
    fn drop(&mut self) {
        self.close();
    }
}

/// Invoke every driver reference in order. Driver failures are logged
/// and never abort the enclosing operation.
pub async fn invoke_all(refs: &[String], args: &HookArgs<'_>) -> HookHandles {
    let mut handles = HookHandles::default();
    for reference in refs {
        match invoke(reference, args).await {
            Ok(Some(handle)) => handles.0.push(handle),
            Ok(None) => {}
            Err(err) => tracing::warn!(hook = %reference, "hook failed: {err}"),
        }
    }
    handles
}

async fn invoke(reference: &str, args: &HookArgs<'_>) -> Result<Option<Box<dyn HookHandle>>> {
    let Some((driver, payload)) = reference.split_once(':') else {
        tracing::warn!(hook = %reference, "missing driver prefix, skipping");
        return Ok(None);
    };
    let payload = payload.trim();

    match driver.trim() {
        "exec" => exec_driver(payload, args).await,
        "write" => {
            write_driver(payload, args);
            Ok(None)
        }
        other => {
            tracing::warn!(driver = %other, "unknown hook driver, skipping");
            Ok(None)
        }
    }
}

/// Spawn a command in the background; a handle kills it at bundle close
/// if it is still running. Stdout is silenced so the SSH byte pipe stays
/// clean.
async fn exec_driver(payload: &str, args: &HookArgs<'_>) -> Result<Option<Box<dyn HookHandle>>> {
    let command = expand_payload(payload, args);
    let argv = shell_words::split(&command).map_err(|e| Error::CommandParse(e.to_string()))?;
    let Some((program, rest)) = argv.split_first() else {
        return Ok(None);
    };

    let child = Command::new(program)
        .args(rest)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    Ok(Some(Box::new(ExecHandle { child })))
}

struct ExecHandle {
    child: Child,
}

impl HookHandle for ExecHandle {
    fn close(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
        }
    }
}

/// Write an expanded line to stderr.
fn write_driver(payload: &str, args: &HookArgs<'_>) {
    eprintln!("{}", expand_payload(payload, args));
}

/// Expand the driver payload: host tokens and environment for connect
/// hooks (plus `%error` and `%duration`), environment only for
/// config-write hooks.
fn expand_payload(payload: &str, args: &HookArgs<'_>) -> String {
    match args {
        HookArgs::Connect { host, stats, error } => {
            let expanded = payload
                .replace("%error", error.unwrap_or(""))
                .replace("%duration", &stats.duration_human());
            host.expand_string(&expanded, "")
        }
        HookArgs::ConfigWrite { ssh_config_path } => {
            expand_env(payload).replace("%path", &ssh_config_path.display().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_args<'a>(host: &'a Host, stats: &'a ConnectionStats) -> HookArgs<'a> {
        HookArgs::Connect {
            host,
            stats,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_exec_driver_spawns() {
        let host = Host::new("box");
        let stats = ConnectionStats::new();
        let mut handles =
            invoke_all(&["exec: true".to_string()], &connect_args(&host, &stats)).await;
        handles.close();
    }

    #[tokio::test]
    async fn test_unknown_driver_skipped() {
        let host = Host::new("box");
        let stats = ConnectionStats::new();
        let refs = vec!["notify: hello".to_string(), "no-prefix".to_string()];
        let handles = invoke_all(&refs, &connect_args(&host, &stats)).await;
        drop(handles);
    }

    #[tokio::test]
    async fn test_driver_failure_is_not_fatal() {
        let host = Host::new("box");
        let stats = ConnectionStats::new();
        let refs = vec!["exec: /nonexistent/binary".to_string()];
        let handles = invoke_all(&refs, &connect_args(&host, &stats)).await;
        drop(handles);
    }

    #[test]
    fn test_expand_payload_connect() {
        let mut host = Host::new("box");
        host.host_name = "10.0.0.1".to_string();
        host.port = "22".to_string();
        let stats = ConnectionStats::new();
        let args = HookArgs::Connect {
            host: &host,
            stats: &stats,
            error: Some("boom"),
        };
        assert_eq!(
            expand_payload("connect %name (%h:%p) failed: %error", &args),
            "connect box (10.0.0.1:22) failed: boom"
        );
    }

    #[test]
    fn test_expand_payload_config_write() {
        let args = HookArgs::ConfigWrite {
            ssh_config_path: Path::new("/home/user/.ssh/config"),
        };
        assert_eq!(
            expand_payload("rewrote %path", &args),
            "rewrote /home/user/.ssh/config"
        );
    }
}
