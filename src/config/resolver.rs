use std::collections::BTreeSet;

use crate::config::{Config, Host};
use crate::error::{Error, Result};

impl Config {
    /// Resolve a query of the form `[user@]target[/gateway...]` into an
    /// effective host. Unknown targets surface [`Error::HostNotFound`].
    pub fn get_host(&self, query: &str) -> Result<Host> {
        self.resolve(query, false)
    }

    /// Like [`get_host`], but synthesises a minimal host for unknown
    /// names so SSH can still attempt a connection.
    ///
    /// [`get_host`]: Config::get_host
    pub fn get_host_safe(&self, query: &str) -> Host {
        self.resolve(query, true)
            .expect("safe resolution cannot fail")
    }

    /// Resolve a gateway hop: path separators are not interpreted and the
    /// result never carries gateways of its own.
    pub fn get_gateway_safe(&self, name: &str) -> Host {
        let mut host = self
            .get_host_by_name(name, true, true, true)
            .expect("safe resolution cannot fail");
        host.expand(name);
        host
    }

    fn resolve(&self, query: &str, safe: bool) -> Result<Host> {
        let (user, rest) = match query.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, query),
        };

        let mut host = self.get_host_by_path(rest, safe, true, false)?;
        if let Some(user) = user {
            host.user = user.to_string();
        }

        let queried_name = rest.split('/').next().unwrap_or(rest);
        host.expand(queried_name);
        Ok(host)
    }

    /// Split `target/gateway[/gateway2...]` and resolve the target; the
    /// path components after the first are prepended to the host's
    /// gateways. Gateway components resolve lazily, at proxy time.
    pub(crate) fn get_host_by_path(
        &self,
        path: &str,
        safe: bool,
        apply_defaults: bool,
        for_gateway: bool,
    ) -> Result<Host> {
        let mut parts = path.split('/');
        let target = parts.next().unwrap_or(path);
        let gateways: Vec<String> = parts.map(str::to_string).collect();

        let mut host = self.get_host_by_name(target, safe, apply_defaults, for_gateway)?;
        if !gateways.is_empty() {
            let mut combined = gateways;
            combined.extend(host.gateways);
            host.gateways = combined;
        }
        Ok(host)
    }

    /// The primitive lookup: exact match, then pattern scan, then
    /// synthesis (`safe`) or failure. With `apply_defaults` the
    /// inheritance closure and the defaults overlay run; with
    /// `for_gateway` the result's gateways are cleared so a host used as
    /// a hop cannot recurse into its own chain.
    pub(crate) fn get_host_by_name(
        &self,
        name: &str,
        safe: bool,
        apply_defaults: bool,
        for_gateway: bool,
    ) -> Result<Host> {
        let mut host = match self.lookup(name) {
            Some(found) => {
                let mut host = found.clone();
                host.name = name.to_string();
                host
            }
            None if safe => Host::new(name),
            None => return Err(Error::HostNotFound(name.to_string())),
        };

        if apply_defaults {
            self.resolve_inheritance(&mut host);
            host.apply_defaults(&self.defaults);
        }
        if for_gateway {
            host.gateways.clear();
        }
        Ok(host)
    }

    /// Exact match first, then the pattern hosts in declaration order,
    /// first match wins.
    fn lookup(&self, name: &str) -> Option<&Host> {
        if let Some(host) = self.hosts.get(name) {
            return Some(host);
        }
        self.pattern_order
            .iter()
            .filter_map(|pattern| self.hosts.get(pattern))
            .find(|h| h.matches(name))
    }

    /// Ancestors referenced from `Inherits`: templates are searched
    /// before hosts.
    fn lookup_ancestor(&self, name: &str) -> Option<&Host> {
        self.templates.get(name).or_else(|| self.lookup(name))
    }

    /// Merge the host's inheritance closure: depth-first, declaration
    /// order, first-writer-wins. The `visited` accumulator is threaded
    /// through the recursion and breaks cycles; the recorded `inherited`
    /// set is the host itself plus its direct parents.
    pub(crate) fn resolve_inheritance(&self, host: &mut Host) {
        let mut visited = BTreeSet::new();
        visited.insert(host.name.clone());

        let direct: Vec<String> = host.inherits.clone();
        self.apply_inherits(host, &mut visited);

        host.inherited = direct.into_iter().collect();
        host.inherited.insert(host.name.clone());
    }

    fn apply_inherits(&self, host: &mut Host, visited: &mut BTreeSet<String>) {
        for parent in host.inherits.clone() {
            if !visited.insert(parent.clone()) {
                continue;
            }
            let Some(found) = self.lookup_ancestor(&parent) else {
                tracing::warn!(parent = %parent, host = %host.name, "unknown parent, skipping");
                continue;
            };
            let mut ancestor = found.clone();
            self.apply_inherits(&mut ancestor, visited);
            host.apply_defaults(&ancestor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{dummy_config, YAML_CONFIG};

    #[test]
    fn test_get_host_by_name_without_gateway() {
        let config = dummy_config();

        let host = config.get_host_by_name("titi", false, true, false).unwrap();
        assert_eq!(host.name, "titi");

        let host = config.get_host_by_name("titi", true, true, false).unwrap();
        assert_eq!(host.name, "titi");

        let err = config
            .get_host_by_name("dontexists", false, true, false)
            .unwrap_err();
        assert!(matches!(err, Error::HostNotFound(name) if name == "dontexists"));

        let host = config
            .get_host_by_name("dontexists", true, true, false)
            .unwrap();
        assert_eq!(host.name, "dontexists");

        let host = config
            .get_host_by_name("regex.ddd", false, true, false)
            .unwrap();
        assert_eq!(host.name, "regex.ddd");
        assert_eq!(host.host_name, "1.3.5.7");
    }

    #[test]
    fn test_get_host_by_name_does_not_parse_paths() {
        let config = dummy_config();

        assert!(config
            .get_host_by_name("titi/gateway", false, true, false)
            .is_err());

        let host = config
            .get_host_by_name("titi/gateway", true, true, false)
            .unwrap();
        assert_eq!(host.name, "titi/gateway");
        assert!(host.gateways.is_empty());

        // A slash defeats the `*.ddd` pattern: `*` does not cross `/`.
        let host = config
            .get_host_by_name("regex.ddd/gateway", true, true, false)
            .unwrap();
        assert_ne!(host.host_name, "1.3.5.7");
    }

    #[test]
    fn test_get_host_by_path() {
        let config = dummy_config();

        let host = config.get_host_by_path("titi", false, true, false).unwrap();
        assert_eq!(host.name, "titi");
        assert!(host.gateways.is_empty());

        let host = config
            .get_host_by_path("titi/gateway", false, true, false)
            .unwrap();
        assert_eq!(host.name, "titi");
        assert_eq!(host.gateways, vec!["gateway"]);

        assert!(config
            .get_host_by_path("dontexists/gateway", false, true, false)
            .is_err());

        let host = config
            .get_host_by_path("dontexists/gateway", true, true, false)
            .unwrap();
        assert_eq!(host.name, "dontexists");
        assert_eq!(host.gateways, vec!["gateway"]);

        let host = config
            .get_host_by_path("regex.ddd/gateway", false, true, false)
            .unwrap();
        assert_eq!(host.name, "regex.ddd");
        assert_eq!(host.host_name, "1.3.5.7");
        assert_eq!(host.gateways.len(), 1);
    }

    #[test]
    fn test_path_gateways_prepend() {
        let config = dummy_config();
        let host = config
            .get_host_by_path("tutu/hop", false, true, false)
            .unwrap();
        assert_eq!(host.gateways, vec!["hop", "titi", "direct", "1.2.3.4"]);
    }

    #[test]
    fn test_get_host() {
        let config = dummy_config();

        let host = config.get_host("titi").unwrap();
        assert_eq!(host.name, "titi");
        assert!(host.gateways.is_empty());

        assert!(config.get_host("dontexists").is_err());

        let host = config.get_host("regex.ddd").unwrap();
        assert_eq!(host.name, "regex.ddd");
        assert_eq!(host.host_name, "1.3.5.7");

        let host = config.get_host("titi/gateway").unwrap();
        assert_eq!(host.name, "titi");
        assert_eq!(host.gateways.len(), 1);
    }

    #[test]
    fn test_get_host_user_override() {
        let config = dummy_config();
        let host = config.get_host("bob@titi").unwrap();
        assert_eq!(host.name, "titi");
        assert_eq!(host.user, "bob");
    }

    #[test]
    fn test_inheritance() {
        let config = dummy_config();

        let host = config.get_host("tata").unwrap();
        let expected: BTreeSet<String> = ["tata", "tutu", "titi", "toto"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(host.inherited, expected);
        assert_eq!(host.proxy_command, "nc -v 4242");
        assert_eq!(host.user, "moul");
        assert_eq!(host.gateways, vec!["titi", "direct", "1.2.3.4"]);
        assert_eq!(host.password_authentication, "yes");

        let host = config.get_host("tutu").unwrap();
        let expected: BTreeSet<String> = ["tutu", "toto", "*.ddd"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(host.inherited, expected);
        assert_eq!(host.user, "root");
        assert_eq!(host.gateways, vec!["titi", "direct", "1.2.3.4"]);
        assert_eq!(host.password_authentication, "yes");

        let host = config.get_host("nnn").unwrap();
        let expected: BTreeSet<String> =
            ["nnn", "mmm"].iter().map(|s| s.to_string()).collect();
        assert_eq!(host.inherited, expected);
        assert_eq!(host.user, "mmmm");
        assert_eq!(host.port, "26");
        assert_eq!(host.gateways, vec!["titi", "direct", "1.2.3.4"]);
    }

    #[test]
    fn test_inheritance_terminates_on_cycles() {
        let mut config = Config::new();
        config
            .load_config(
                "hosts:\n  ping:\n    User: ping\n    Inherits: [pong]\n  pong:\n    Port: 2222\n    Inherits: [ping]\n",
            )
            .unwrap();

        let host = config.get_host("ping").unwrap();
        assert_eq!(host.user, "ping");
        assert_eq!(host.port, "2222");

        let host = config.get_host("pong").unwrap();
        assert_eq!(host.port, "2222");
        assert_eq!(host.user, "ping");
    }

    #[test]
    fn test_get_host_safe() {
        let config = dummy_config();

        let host = config.get_host_safe("dontexists");
        assert_eq!(host.name, "dontexists");
        assert!(host.gateways.is_empty());
        assert_eq!(host.port, "22");
        assert_eq!(host.user, "root");

        let host = config.get_host_safe("dontexists/gateway");
        assert_eq!(host.name, "dontexists");
        assert_eq!(host.gateways.len(), 1);

        let host = config.get_host_safe("regex.ddd/gateway");
        assert_eq!(host.name, "regex.ddd");
        assert_eq!(host.host_name, "1.3.5.7");
        assert_eq!(host.gateways.len(), 1);
    }

    #[test]
    fn test_get_gateway_safe() {
        let config = dummy_config();

        let host = config.get_gateway_safe("titi");
        assert_eq!(host.name, "titi");
        assert!(host.gateways.is_empty());

        let host = config.get_gateway_safe("dontexists");
        assert_eq!(host.name, "dontexists");
        assert!(host.gateways.is_empty());

        // No path parsing for gateway lookups.
        let host = config.get_gateway_safe("titi/gateway");
        assert_eq!(host.name, "titi/gateway");
        assert!(host.gateways.is_empty());
    }

    #[test]
    fn test_pattern_scan_follows_declaration_order() {
        // "web*" is declared first but sorts after "*.example.com"; the
        // first declared pattern must win for queries both accept.
        let mut config = Config::new();
        config
            .load_config(
                "hosts:\n  \"web*\":\n    HostName: from-webstar\n  \"*.example.com\":\n    HostName: from-star-example\n",
            )
            .unwrap();

        let host = config.get_host("web1.example.com").unwrap();
        assert_eq!(host.host_name, "from-webstar");

        let host = config.get_host("api.example.com").unwrap();
        assert_eq!(host.host_name, "from-star-example");
    }

    #[test]
    fn test_defaults_overlay_sets_port() {
        let mut config = Config::new();
        config.load_config(YAML_CONFIG).unwrap();
        for name in ["aaa", "ccc", "jjj", "test.kkk", "unknown-host"] {
            let host = config.get_host_safe(name);
            assert_ne!(host.port, "", "{name} has no port");
        }
    }

    #[test]
    fn test_wildcard_expansion() {
        let mut config = Config::new();
        config.load_config(YAML_CONFIG).unwrap();

        let host = config.get_host("jjj").unwrap();
        assert_eq!(host.host_name, "jjj.jjjjj");

        let host = config.get_host("test.kkk").unwrap();
        assert_eq!(host.name, "test.kkk");
        assert_eq!(host.host_name, "test.kkk.kkkkk");
    }

    #[test]
    fn test_environment_substitution() {
        let mut config = Config::new();
        config.load_config(YAML_CONFIG).unwrap();

        std::env::set_var("ASSH_TEST_HOSTNAME", "aaa");
        std::env::set_var("ASSH_TEST_PORT", "42");
        std::env::set_var("ASSH_TEST_USER", "ccc");
        std::env::remove_var("ASSH_TEST_NON_EXISTING");
        std::env::remove_var("ASSH_TEST_LOCALCOMMAND");

        let host = config.get_host("bbb").unwrap();
        assert_eq!(host.host_name, "aaa");
        assert_eq!(host.port, "42");
        assert_eq!(host.user, "user-ccc-user");
        assert_eq!(host.identity_file, "");
        assert_eq!(host.local_command, "hello");
    }

    #[test]
    fn test_resolution_idempotent() {
        let config = dummy_config();
        let first = config.get_host("tata").unwrap();

        let mut second_config = Config::new();
        second_config.defaults = config.defaults.clone();
        let mut literal = first.clone();
        literal.inherits.clear();
        second_config.add_host("tata".to_string(), literal);
        second_config.apply_missing_names();

        let second = second_config.get_host("tata").unwrap();
        assert_eq!(second.host_name, first.host_name);
        assert_eq!(second.port, first.port);
        assert_eq!(second.user, first.user);
        assert_eq!(second.proxy_command, first.proxy_command);
        assert_eq!(second.gateways, first.gateways);
        assert_eq!(second.password_authentication, first.password_authentication);
    }

    #[test]
    fn test_resolved_host_is_independent_clone() {
        let config = dummy_config();
        let mut host = config.get_host("titi").unwrap();
        host.host_name = "mutated".to_string();
        host.gateways.push("mutated".to_string());
        assert_eq!(config.hosts["titi"].host_name, "tata");
        assert!(config.hosts["titi"].gateways.is_empty());
    }
}
