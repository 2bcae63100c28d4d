//! Broker configuration: command-line tokenizing, the optional `broker.toml`
//! file, and environment-driven transport bind settings (spec §2.3, §6.5).

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{BrokerError, Result};

/// Default HTTP bind port for the simple variant (spec §6.5).
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default port for the richer TCP JSON-RPC dispatcher (spec §6.5).
pub const DEFAULT_TCP_PORT: u16 = 8989;
/// Default port for the SSE dispatcher, when enabled alongside HTTP.
pub const DEFAULT_SSE_PORT: u16 = 8081;

/// One child to spawn: an optional explicit alias, its raw command line,
/// and an optional per-child handshake timeout override (spec §2.3
/// "per-child handshake timeout"). `None` defers to whatever default the
/// caller of `assign_names` supplies — the CLI's global `--handshake-timeout`
/// flag for positional commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    pub alias: Option<String>,
    pub command_line: String,
    pub handshake_timeout: Option<Duration>,
}

/// Parse one CLI positional argument into a `ChildSpec`.
///
/// Accepts either a bare command string (`"gh-mcp-server --flag"`, given a
/// position-derived name later) or an explicit `alias=command...` form
/// (`"gh=gh-mcp-server --flag"`). The alias, if present, must come before the
/// first whitespace and must not itself contain whitespace or `=`.
pub fn parse_child_arg(raw: &str) -> ChildSpec {
    if let Some(eq_idx) = raw.find('=') {
        let candidate_alias = &raw[..eq_idx];
        let looks_like_alias = !candidate_alias.is_empty()
            && !candidate_alias.contains(char::is_whitespace)
            && candidate_alias.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_');
        if looks_like_alias {
            return ChildSpec {
                alias: Some(candidate_alias.to_string()),
                command_line: raw[eq_idx + 1..].to_string(),
                handshake_timeout: None,
            };
        }
    }
    ChildSpec {
        alias: None,
        command_line: raw.to_string(),
        handshake_timeout: None,
    }
}

/// Assign final server names to a list of child specs, pairing each with
/// the handshake timeout to use when spawning it: the spec's own override
/// if it carries one (spec §2.3 per-child `broker.toml` override), else
/// `default_timeout` (the CLI's global `--handshake-timeout` flag).
///
/// Explicit aliases are used verbatim; specs without one get a
/// position-derived name `serverN` (1-indexed, counting only the
/// position-derived ones' own slot in the overall argument list). Startup
/// fails on any duplicate name rather than silently overwriting, per the
/// open question in spec §9.
pub fn assign_names(specs: &[ChildSpec], default_timeout: Duration) -> Result<Vec<(String, String, Duration)>> {
    let mut named = Vec::with_capacity(specs.len());
    let mut seen = HashSet::new();
    for (i, spec) in specs.iter().enumerate() {
        let name = spec
            .alias
            .clone()
            .unwrap_or_else(|| format!("server{}", i + 1));
        if !seen.insert(name.clone()) {
            return Err(BrokerError::Config(format!(
                "duplicate server name '{name}'"
            )));
        }
        let timeout = spec.handshake_timeout.unwrap_or(default_timeout);
        named.push((name, spec.command_line.clone(), timeout));
    }
    Ok(named)
}

/// Tokenize a command string shell-style: whitespace-separated, with single-
/// and double-quoted spans preserved as single tokens. No variable
/// interpolation or glob expansion is performed (spec §4.1 step 1).
pub fn tokenize_command_line(command: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                in_token = true;
                let quote = c;
                loop {
                    match chars.next() {
                        Some(c2) if c2 == quote => break,
                        Some(c2) => current.push(c2),
                        None => {
                            return Err(BrokerError::Config(format!(
                                "unterminated {quote} quote in command '{command}'"
                            )))
                        }
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    if tokens.is_empty() {
        return Err(BrokerError::Config(format!(
            "empty command string '{command}'"
        )));
    }
    Ok(tokens)
}

/// Optional `broker.toml` file, loaded only when no positional child
/// commands are given on the CLI (spec §2.3).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default, rename = "child")]
    pub children: Vec<ChildConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildConfig {
    pub alias: Option<String>,
    pub command: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

impl BrokerConfig {
    /// Each child carries its own `handshake_timeout_secs` from the TOML
    /// (or the field's own 30s default if the key was omitted) — unlike
    /// the CLI's single global `--handshake-timeout` flag, a `broker.toml`
    /// entry always has an explicit per-child timeout (spec §2.3).
    pub fn into_specs(self) -> Vec<ChildSpec> {
        self.children
            .into_iter()
            .map(|c| ChildSpec {
                alias: c.alias,
                command_line: c.command,
                handshake_timeout: Some(Duration::from_secs(c.handshake_timeout_secs)),
            })
            .collect()
    }
}

/// Resolve a bind port: an explicit CLI flag wins, then the named
/// environment variable, then `default`.
pub fn resolve_port(explicit: Option<u16>, env_var: &str, default: u16) -> u16 {
    if let Some(p) = explicit {
        return p;
    }
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
