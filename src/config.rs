use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `BINSIGHT_SCAN_THREADS=4`.
pub const ENV_PREFIX: &str = "BINSIGHT_";

/// Keys accepted by [`Config::apply`], in listing order.
pub const KEYS: [&str; 5] = [
    "ASSEMBLER",
    "ASSEMBLER_TIMEOUT_MS",
    "MAX_GADGET_BYTES",
    "SCAN_THREADS",
    "SCAN_GADGETS",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Assembler executable, resolved through `PATH`.
    pub assembler: String,
    pub assembler_timeout_ms: u64,
    /// Overrides the per-architecture gadget window.
    pub max_gadget_bytes: Option<usize>,
    /// Worker count for the gadget scan. `None` uses the global rayon pool.
    pub scan_threads: Option<usize>,
    pub scan_gadgets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assembler: "nasm".to_string(),
            assembler_timeout_ms: 10_000,
            max_gadget_bytes: None,
            scan_threads: None,
            scan_gadgets: true,
        }
    }
}

impl Config {
    /// Apply `BINSIGHT_*` process variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(unicode_vars(std::env::vars_os()))
    }

    /// Apply every `BINSIGHT_<KEY>` pair, ignoring unrelated variables.
    pub fn apply_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                self.apply(key, &value)
                    .with_context(|| format!("Invalid environment variable {}", name))?;
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.to_uppercase().as_str() {
            "ASSEMBLER" => {
                if value.is_empty() {
                    return Err(anyhow!("ASSEMBLER must not be empty"));
                }
                self.assembler = value.to_string();
            }
            "ASSEMBLER_TIMEOUT_MS" => {
                self.assembler_timeout_ms = value
                    .parse()
                    .with_context(|| format!("ASSEMBLER_TIMEOUT_MS must be an integer, got {:?}", value))?;
            }
            "MAX_GADGET_BYTES" => {
                self.max_gadget_bytes = parse_optional_count("MAX_GADGET_BYTES", value)?;
            }
            "SCAN_THREADS" => {
                self.scan_threads = parse_optional_count("SCAN_THREADS", value)?;
            }
            "SCAN_GADGETS" => {
                self.scan_gadgets = parse_bool(value)
                    .ok_or_else(|| anyhow!("SCAN_GADGETS must be true or false, got {:?}", value))?;
            }
            _ => return Err(anyhow!("Unknown configuration key: {}", key)),
        }
        Ok(())
    }

    /// Current value of `key`, rendered the way [`Config::apply`] accepts it.
    pub fn get(&self, key: &str) -> Option<String> {
        let rendered = match key.to_uppercase().as_str() {
            "ASSEMBLER" => self.assembler.clone(),
            "ASSEMBLER_TIMEOUT_MS" => self.assembler_timeout_ms.to_string(),
            "MAX_GADGET_BYTES" => render_optional(self.max_gadget_bytes),
            "SCAN_THREADS" => render_optional(self.scan_threads),
            "SCAN_GADGETS" => self.scan_gadgets.to_string(),
            _ => return None,
        };
        Some(rendered)
    }

    pub fn assembler_timeout(&self) -> Duration {
        Duration::from_millis(self.assembler_timeout_ms)
    }
}

/// Pairs that are not valid Unicode are skipped.
fn unicode_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Empty or `auto` clears the override. Zero is rejected.
fn parse_optional_count(key: &str, value: &str) -> Result<Option<usize>> {
    if value.is_empty() || value.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    let count: usize = value
        .parse()
        .with_context(|| format!("{} must be a positive integer, got {:?}", key, value))?;
    if count == 0 {
        return Err(anyhow!("{} must be greater than zero", key));
    }
    Ok(Some(count))
}

fn render_optional(value: Option<usize>) -> String {
    value.map_or_else(|| "auto".to_string(), |v| v.to_string())
}
