use crate::config::Config;

/// Render the gateway graph in dot format: red edges for gateway hops
/// (labelled with their 1-based rank in the chain), blue nodes for
/// hosts. The `direct` sentinel is not a node.
pub fn graph(config: &Config) -> String {
    let mut out = String::from("digraph G {\n");

    for (name, host) in &config.hosts {
        for (rank, gateway) in host.gateways.iter().enumerate() {
            if gateway == "direct" {
                continue;
            }
            out.push_str(&format!(
                "\t{name}->{gateway}[ color=red, label={} ];\n",
                rank + 1
            ));
        }
    }
    for name in config.hosts.keys() {
        out.push_str(&format!("\t{name} [ color=blue ];\n"));
    }

    out.push_str("\n}\n");
    out
}
