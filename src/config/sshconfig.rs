use std::path::{Path, PathBuf};

use crate::config::{Config, Host};
use crate::error::Result;
use crate::hooks::{self, HookArgs};

/// Location of the generated classic ssh config.
pub fn ssh_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".ssh/config")
}

/// Render the classic `~/.ssh/config` equivalent of the configuration.
///
/// Each concrete host is emitted resolved through its inheritance closure
/// but without the defaults overlay; the defaults live in the trailing
/// `Host *` stanza together with the assh ProxyCommand fallback.
pub fn render(config: &Config) -> String {
    let mut out = String::from("# ssh config generated by assh\n\n");
    out.push_str("# host-based configuration\n");

    for (name, raw) in &config.hosts {
        let mut resolved = raw.clone();
        config.resolve_inheritance(&mut resolved);
        render_stanza(&mut out, name, raw, &resolved);
        out.push('\n');
    }

    out.push_str("# global configuration\n");
    out.push_str("Host *\n");
    for (key, value) in host_attributes(&config.defaults) {
        out.push_str(&format!("  {key} {value}\n"));
    }
    out.push_str("  ProxyCommand assh proxy --port=%p %h\n");
    out
}

fn render_stanza(out: &mut String, name: &str, raw: &Host, resolved: &Host) {
    out.push_str(&format!("Host {name}\n"));
    for (key, value) in host_attributes(resolved) {
        out.push_str(&format!("  {key} {value}\n"));
    }
    if !resolved.proxy_command.is_empty() {
        out.push_str(&format!("  # ProxyCommand {}\n", resolved.proxy_command));
    }
    if !raw.inherits.is_empty() {
        out.push_str(&format!("  # Inherits: [{}]\n", raw.inherits.join(", ")));
    }
    if !resolved.gateways.is_empty() {
        out.push_str(&format!("  # Gateways: [{}]\n", resolved.gateways.join(", ")));
    }
    if !resolved.resolve_nameservers.is_empty() {
        out.push_str(&format!(
            "  # ResolveNameservers: [{}]\n",
            resolved.resolve_nameservers.join(", ")
        ));
    }
    if !resolved.resolve_command.is_empty() {
        out.push_str(&format!("  # ResolveCommand: {}\n", resolved.resolve_command));
    }
}

/// The host's real SSH attributes, alphabetically ordered.
fn host_attributes(host: &Host) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    if host.connect_timeout > 0 {
        attrs.push(("ConnectTimeout".into(), host.connect_timeout.to_string()));
    }
    if !host.control_path.is_empty() {
        attrs.push(("ControlPath".into(), host.control_path.clone()));
    }
    if !host.host_name.is_empty() {
        attrs.push(("HostName".into(), host.host_name.clone()));
    }
    if !host.identity_file.is_empty() {
        attrs.push(("IdentityFile".into(), host.identity_file.clone()));
    }
    if !host.local_command.is_empty() {
        attrs.push(("LocalCommand".into(), host.local_command.clone()));
    }
    if !host.password_authentication.is_empty() {
        attrs.push((
            "PasswordAuthentication".into(),
            host.password_authentication.clone(),
        ));
    }
    if !host.port.is_empty() {
        attrs.push(("Port".into(), host.port.clone()));
    }
    if !host.user.is_empty() {
        attrs.push(("User".into(), host.user.clone()));
    }
    for (key, value) in &host.ssh_options {
        attrs.push((key.clone(), value.clone()));
    }
    attrs.sort();
    attrs
}

/// Write the generated config, running the config-write hooks around the
/// write. Hook failures are logged, never fatal.
pub async fn save(config: &Config, path: &Path) -> Result<()> {
    let args = HookArgs::ConfigWrite {
        ssh_config_path: path,
    };
    let mut handles = hooks::invoke_all(&config.defaults.before_config_write, &args).await;
    handles.close();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(config))?;
    tracing::debug!(path = %path.display(), "wrote generated ssh config");

    let mut handles = hooks::invoke_all(&config.defaults.after_config_write, &args).await;
    handles.close();
    Ok(())
}

/// Returns true when any loaded config file is newer than the generated
/// ssh config (or the generated config does not exist yet).
pub fn is_outdated(config: &Config, path: &Path) -> std::io::Result<bool> {
    let Ok(generated) = std::fs::metadata(path) else {
        return Ok(true);
    };
    let generated_mtime = generated.modified()?;
    for source in config.included_files() {
        let mtime = std::fs::metadata(source)?.modified()?;
        if mtime > generated_mtime {
            return Ok(true);
        }
    }
    Ok(false)
}
