pub mod expand;
pub mod graphviz;
pub mod host;
pub mod resolver;
pub mod sshconfig;

pub use host::Host;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The full declarative configuration: concrete hosts, templates
/// (reachable only through `Inherits`), global defaults and include
/// patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: BTreeMap<String, Host>,

    #[serde(default)]
    pub templates: BTreeMap<String, Host>,

    #[serde(default)]
    pub defaults: Host,

    #[serde(default)]
    pub includes: Option<Vec<String>>,

    /// Pattern-host names in declaration order; the resolver scans these
    /// first-match-wins.
    #[serde(skip)]
    pub(crate) pattern_order: Vec<String>,

    /// Absolute paths already loaded, closed under transitive loading.
    #[serde(skip)]
    included_files: BTreeSet<PathBuf>,
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.hosts == other.hosts
            && self.templates == other.templates
            && self.defaults == other.defaults
            && self.includes == other.includes
    }
}

/// One parsed config document. Host and template maps are kept as entry
/// lists so declaration order survives the parse.
#[derive(Deserialize)]
struct Document {
    #[serde(default, deserialize_with = "ordered_entries")]
    hosts: Vec<(String, Host)>,

    #[serde(default, deserialize_with = "ordered_entries")]
    templates: Vec<(String, Host)>,

    #[serde(default)]
    defaults: Host,

    #[serde(default)]
    includes: Option<Vec<String>>,
}

fn ordered_entries<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, Host)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = Vec<(String, Host)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a mapping of host names to host attributes")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry::<String, Host>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Visitor)
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration file location: `~/.ssh/assh.yml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_default().join(".ssh/assh.yml")
    }

    /// Load the configuration from `path`, or from the default location.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);
        let mut config = Self::new();
        config.load_files(&path)?;
        Ok(config)
    }

    /// Parse one config document and merge it into this config, then
    /// recursively load its includes.
    pub fn load_config(&mut self, content: &str) -> Result<()> {
        let includes = self.merge_document(content, None)?;
        self.process_includes(&includes)
    }

    /// Load a file, skipping it when already included (include cycles
    /// terminate here), then recursively load its includes.
    pub fn load_files(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.included_files.contains(&canonical) {
            return Ok(());
        }
        self.included_files.insert(canonical.clone());
        tracing::debug!(path = %canonical.display(), "loading config file");

        let content = std::fs::read_to_string(&canonical)?;
        let includes = self.merge_document(&content, Some(&canonical))?;
        self.process_includes(&includes)
    }

    /// Parse a document and merge hosts, templates, defaults and includes
    /// into this config. Redefined names augment the earlier definition.
    /// Returns the document's own include patterns.
    fn merge_document(&mut self, content: &str, source: Option<&Path>) -> Result<Vec<String>> {
        let document: Document = serde_yaml::from_str(content).map_err(|e| Error::Parse {
            path: source.map(Path::to_path_buf).unwrap_or_default(),
            detail: e.to_string(),
        })?;

        for (name, host) in document.hosts {
            match self.hosts.get_mut(&name) {
                Some(existing) => existing.apply_defaults(&host),
                None => self.add_host(name, host),
            }
        }
        for (name, template) in document.templates {
            match self.templates.get_mut(&name) {
                Some(existing) => existing.apply_defaults(&template),
                None => {
                    self.templates.insert(name, template);
                }
            }
        }
        self.defaults.apply_defaults(&document.defaults);

        let includes = document.includes.unwrap_or_default();
        if !includes.is_empty() {
            self.includes
                .get_or_insert_with(Vec::new)
                .extend(includes.iter().cloned());
        }

        self.apply_missing_names();
        Ok(includes)
    }

    /// Expand each include pattern (environment variables, then glob) and
    /// load the matches in lexicographic order.
    fn process_includes(&mut self, includes: &[String]) -> Result<()> {
        for pattern in includes {
            let expanded = expand::expand_env(pattern);
            let paths = match glob::glob(&expanded) {
                Ok(paths) => paths,
                Err(err) => {
                    tracing::warn!(pattern = %expanded, "bad include pattern: {err}");
                    continue;
                }
            };
            for entry in paths {
                match entry {
                    Ok(path) if path.is_file() => self.load_files(&path)?,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(pattern = %expanded, "cannot read include: {err}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a new host, recording pattern names in declaration order.
    pub(crate) fn add_host(&mut self, name: String, host: Host) {
        if name.contains('*') || name.contains('?') {
            self.pattern_order.push(name.clone());
        }
        self.hosts.insert(name, host);
    }

    /// Recompute the pattern scan order from the host map. Only used when
    /// a config arrives without declaration order (the JSON form).
    fn rebuild_pattern_order(&mut self) {
        self.pattern_order = self
            .hosts
            .keys()
            .filter(|name| name.contains('*') || name.contains('?'))
            .cloned()
            .collect();
    }

    /// Stamp each host and template with the key it was declared under.
    pub fn apply_missing_names(&mut self) {
        for (name, host) in &mut self.hosts {
            host.name = name.clone();
        }
        for (name, template) in &mut self.templates {
            template.name = name.clone();
        }
        self.defaults.is_default = true;
    }

    /// The files loaded so far, in path order.
    pub fn included_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.included_files.iter()
    }

    /// Stable pretty JSON form: sorted host keys, attributes in
    /// declaration order, `null` for empty includes.
    pub fn json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse {
            path: PathBuf::new(),
            detail: e.to_string(),
        })
    }

    /// Inverse of [`json_string`], with names re-stamped.
    #[allow(dead_code)]
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(json).map_err(|e| Error::Parse {
            path: PathBuf::new(),
            detail: e.to_string(),
        })?;
        config.apply_missing_names();
        config.rebuild_pattern_order();
        Ok(config)
    }
}
