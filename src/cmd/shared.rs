/*!
shared.rs - helpers shared by the subcommands.

Focus:
  - Connection: agent address / token / datacenter resolution
      (CLI flag > environment > config file > default)
  - FileConfig: optional YAML or JSON config file
  - parse_duration: Go-style durations for clap (`500ms`, `1m30s`)
*/

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::api::Client;

/* ---- Defaults / Environment ---- */

pub const DEFAULT_HTTP_ADDR: &str = "http://127.0.0.1:8500";
pub const ENV_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";
pub const ENV_TOKEN: &str = "CONSUL_HTTP_TOKEN";

/* ---- Config File ---- */

/// Keys accepted in a `--config` file. All optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub http_addr: Option<String>,
    pub token: Option<String>,
    pub datacenter: Option<String>,
}

impl FileConfig {
    /// Load a YAML (`.yaml` / `.yml`) or JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            serde_yaml::from_str(&raw).context("failed to parse YAML config file")
        } else {
            serde_json::from_str(&raw).context("failed to parse JSON config file")
        }
    }
}

/* ---- Connection ---- */

/// Resolved agent connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub http_addr: String,
    pub token: Option<String>,
    /// Datacenter from the config file; `exec --datacenter` wins over it.
    pub datacenter: Option<String>,
}

impl Connection {
    /// Resolve from flags, the process environment and an optional config file.
    pub fn resolve(
        http_addr: Option<String>,
        token: Option<String>,
        config: Option<&str>,
    ) -> Result<Self> {
        Self::resolve_with(http_addr, token, config, |k| std::env::var(k).ok())
    }

    pub fn resolve_with(
        http_addr: Option<String>,
        token: Option<String>,
        config: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = match config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let http_addr = non_empty(http_addr)
            .or_else(|| non_empty(env(ENV_HTTP_ADDR)))
            .or_else(|| non_empty(file.http_addr))
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let token = non_empty(token)
            .or_else(|| non_empty(env(ENV_TOKEN)))
            .or_else(|| non_empty(file.token));

        Ok(Self {
            http_addr,
            token,
            datacenter: non_empty(file.datacenter),
        })
    }

    /// HTTP client, scoped to `datacenter` when given.
    pub fn client(&self, datacenter: Option<&str>) -> Result<Client> {
        let mut client = Client::new(&self.http_addr)
            .with_context(|| format!("invalid agent address: {}", self.http_addr))?;
        if let Some(token) = &self.token {
            client = client.with_token(token.clone());
        }
        if let Some(dc) = datacenter {
            client = client.with_datacenter(dc);
        }
        Ok(client)
    }
}

/* ---- Durations ---- */

/// Parse a Go-style duration: a sequence of `<number><unit>` with units
/// `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let s = raw.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {raw:?}"))?;
        if num_len == 0 {
            return Err(format!("invalid duration {raw:?}"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: f64 = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
        };
        rest = &rest[unit_len..];
        total += Duration::from_nanos((value * nanos_per_unit).round() as u64);
    }
    Ok(total)
}

/* ---- Tests ---- */
