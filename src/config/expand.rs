/// Values substituted for `%`-tokens during expansion.
pub struct Expansion<'a> {
    pub name: &'a str,
    pub host_name: &'a str,
    pub port: &'a str,
    pub gateway: &'a str,
}

/// Expand `%`-tokens and environment references in a single left-to-right
/// pass. Replacement text is never re-scanned.
///
/// Tokens: `%name`, `%h`, `%p`, `%g`; environment: `$VAR`, `${VAR}` and
/// `${VAR:-default}` (default applies when the variable is unset or empty).
pub fn expand_string(input: &str, ctx: &Expansion) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let rest = &input[i + 1..];
                if rest.starts_with("name") {
                    out.push_str(ctx.name);
                    i += 5;
                } else if rest.starts_with('h') {
                    out.push_str(ctx.host_name);
                    i += 2;
                } else if rest.starts_with('p') {
                    out.push_str(ctx.port);
                    i += 2;
                } else if rest.starts_with('g') {
                    out.push_str(ctx.gateway);
                    i += 2;
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            b'$' => {
                let (replacement, consumed) = expand_env_ref(&input[i..]);
                match replacement {
                    Some(value) => {
                        out.push_str(&value);
                        i += consumed;
                    }
                    None => {
                        out.push('$');
                        i += 1;
                    }
                }
            }
            _ => {
                let ch = input[i..].chars().next().unwrap();
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    out
}

/// Expand only environment references, leaving `%`-tokens untouched.
/// Used for include paths before globbing.
pub fn expand_env(input: &str) -> String {
    expand_string(
        input,
        &Expansion {
            name: "%name",
            host_name: "%h",
            port: "%p",
            gateway: "%g",
        },
    )
}

/// Parse one environment reference at the start of `input` (which begins
/// with `$`). Returns the replacement and the number of bytes consumed,
/// or `None` when no variable name follows.
fn expand_env_ref(input: &str) -> (Option<String>, usize) {
    let rest = &input[1..];

    if let Some(inner) = rest.strip_prefix('{') {
        let Some(end) = inner.find('}') else {
            return (None, 0);
        };
        let body = &inner[..end];
        let consumed = 1 + 1 + end + 1; // $, {, body, }
        if let Some((var, default)) = body.split_once(":-") {
            let value = std::env::var(var)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string());
            return (Some(value), consumed);
        }
        return (Some(std::env::var(body).unwrap_or_default()), consumed);
    }

    let len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if len == 0 {
        return (None, 0);
    }
    let var = &rest[..len];
    (Some(std::env::var(var).unwrap_or_default()), 1 + len)
}
