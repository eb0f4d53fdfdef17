use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::expand::{expand_string, Expansion};

/// A resolvable unit of connection configuration.
///
/// Field order is the order attributes appear in the stable JSON form;
/// empty fields are omitted there. The serde names are the keys used in
/// the declarative config documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "HostName", default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,

    #[serde(rename = "IdentityFile", default, skip_serializing_if = "String::is_empty")]
    pub identity_file: String,

    #[serde(rename = "LocalCommand", default, skip_serializing_if = "String::is_empty")]
    pub local_command: String,

    #[serde(
        rename = "PasswordAuthentication",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub password_authentication: String,

    /// Kept as a string so environment references survive until expansion.
    #[serde(
        rename = "Port",
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "String::is_empty"
    )]
    pub port: String,

    #[serde(rename = "User", default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(rename = "ProxyCommand", default, skip_serializing_if = "String::is_empty")]
    pub proxy_command: String,

    #[serde(rename = "ControlPath", default, skip_serializing_if = "String::is_empty")]
    pub control_path: String,

    #[serde(
        rename = "ControlMasterMkdir",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub control_master_mkdir: String,

    /// Dial timeout in seconds, 0 means no timeout.
    #[serde(rename = "ConnectTimeout", default, skip_serializing_if = "is_zero")]
    pub connect_timeout: u64,

    /// Human-readable byte rate, e.g. "1MB".
    #[serde(rename = "RateLimit", default, skip_serializing_if = "String::is_empty")]
    pub rate_limit: String,

    #[serde(
        rename = "ResolveNameservers",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resolve_nameservers: Vec<String>,

    #[serde(rename = "ResolveCommand", default, skip_serializing_if = "String::is_empty")]
    pub resolve_command: String,

    #[serde(rename = "Inherits", default, skip_serializing_if = "Vec::is_empty")]
    pub inherits: Vec<String>,

    /// Ordered gateway hops; the sentinel "direct" means "dial from here".
    #[serde(rename = "Gateways", default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,

    #[serde(
        rename = "BeforeConfigWrite",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub before_config_write: Vec<String>,

    #[serde(
        rename = "AfterConfigWrite",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub after_config_write: Vec<String>,

    #[serde(rename = "BeforeConnect", default, skip_serializing_if = "Vec::is_empty")]
    pub before_connect: Vec<String>,

    #[serde(rename = "OnConnect", default, skip_serializing_if = "Vec::is_empty")]
    pub on_connect: Vec<String>,

    #[serde(rename = "OnConnectError", default, skip_serializing_if = "Vec::is_empty")]
    pub on_connect_error: Vec<String>,

    #[serde(rename = "OnDisconnect", default, skip_serializing_if = "Vec::is_empty")]
    pub on_disconnect: Vec<String>,

    /// Open-ended pass-through SSH options, emitted verbatim in the
    /// generated ssh config.
    #[serde(flatten)]
    pub ssh_options: BTreeMap<String, String>,

    #[serde(skip)]
    pub name: String,

    #[serde(skip)]
    pub is_default: bool,

    /// Ancestor names recorded during resolution: the host itself plus
    /// its direct parents, deduplicated.
    #[serde(skip)]
    pub inherited: BTreeSet<String>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Accept both `Port: 22` and `Port: "22"` in config documents.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;

    impl serde::de::Visitor<'_> for Visitor {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string or an integer")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Host {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Returns true when the name carries glob wildcards.
    pub fn is_pattern(&self) -> bool {
        self.name.contains('*') || self.name.contains('?')
    }

    /// Match a query against this host's name: exact equality for literal
    /// names, shell glob semantics (`*` does not cross `/`) for patterns.
    pub fn matches(&self, query: &str) -> bool {
        if self.is_pattern() {
            let options = glob::MatchOptions {
                require_literal_separator: true,
                ..Default::default()
            };
            glob::Pattern::new(&self.name)
                .map(|p| p.matches_with(query, options))
                .unwrap_or(false)
        } else {
            self.name == query
        }
    }

    /// Fill unset fields from `source`: scalars keep the first writer,
    /// lists concatenate target-first, and a final `Port = "22"` fallback
    /// is applied if the port is still unset.
    pub fn apply_defaults(&mut self, source: &Host) {
        if self.host_name.is_empty() {
            self.host_name = source.host_name.clone();
        }
        if self.identity_file.is_empty() {
            self.identity_file = source.identity_file.clone();
        }
        if self.local_command.is_empty() {
            self.local_command = source.local_command.clone();
        }
        if self.password_authentication.is_empty() {
            self.password_authentication = source.password_authentication.clone();
        }
        if self.port.is_empty() {
            self.port = source.port.clone();
        }
        if self.user.is_empty() {
            self.user = source.user.clone();
        }
        if self.proxy_command.is_empty() {
            self.proxy_command = source.proxy_command.clone();
        }
        if self.control_path.is_empty() {
            self.control_path = source.control_path.clone();
        }
        if self.control_master_mkdir.is_empty() {
            self.control_master_mkdir = source.control_master_mkdir.clone();
        }
        if self.connect_timeout == 0 {
            self.connect_timeout = source.connect_timeout;
        }
        if self.rate_limit.is_empty() {
            self.rate_limit = source.rate_limit.clone();
        }
        if self.resolve_command.is_empty() {
            self.resolve_command = source.resolve_command.clone();
        }
        self.resolve_nameservers
            .extend(source.resolve_nameservers.iter().cloned());
        self.inherits.extend(source.inherits.iter().cloned());
        self.gateways.extend(source.gateways.iter().cloned());
        self.before_config_write
            .extend(source.before_config_write.iter().cloned());
        self.after_config_write
            .extend(source.after_config_write.iter().cloned());
        self.before_connect
            .extend(source.before_connect.iter().cloned());
        self.on_connect.extend(source.on_connect.iter().cloned());
        self.on_connect_error
            .extend(source.on_connect_error.iter().cloned());
        self.on_disconnect
            .extend(source.on_disconnect.iter().cloned());
        for (key, value) in &source.ssh_options {
            self.ssh_options
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        if self.port.is_empty() {
            self.port = "22".to_string();
        }
    }

    /// Expand `%`-tokens and environment references in `input` against
    /// this host, with `%g` bound to `gateway`.
    pub fn expand_string(&self, input: &str, gateway: &str) -> String {
        expand_string(
            input,
            &Expansion {
                name: &self.name,
                host_name: &self.host_name,
                port: &self.port,
                gateway,
            },
        )
    }

    /// Effective-host expansion, applied by the public resolver entry
    /// points. `HostName` expands with `%h` bound to the queried name so
    /// pattern hosts can rewrite the query; the other connection fields
    /// expand with `%h` bound to the resolved hostname.
    pub fn expand(&mut self, queried_name: &str) {
        self.host_name = expand_string(
            &self.host_name,
            &Expansion {
                name: &self.name,
                host_name: queried_name,
                port: &self.port,
                gateway: "",
            },
        );
        self.port = self.expand_string(&self.port.clone(), "");
        self.user = self.expand_string(&self.user.clone(), "");
        self.identity_file = self.expand_string(&self.identity_file.clone(), "");
        self.local_command = self.expand_string(&self.local_command.clone(), "");
        self.proxy_command = self.expand_string(&self.proxy_command.clone(), "");
        self.rate_limit = self.expand_string(&self.rate_limit.clone(), "");
    }

    /// The `user@hostname` form used in diagnostics.
    #[allow(dead_code)]
    pub fn display_target(&self) -> String {
        if self.user.is_empty() {
            self.host_name.clone()
        } else {
            format!("{}@{}", self.user, self.host_name)
        }
    }
}
