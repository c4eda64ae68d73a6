//! Session configuration.
//!
//! Layered lowest to highest: an optional JSON file, `CRASHLENS_*`
//! environment variables, then command-line flags.

use crate::error::{CrashError, CrashResult};
use crate::memory::ImageFormat;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectConfig {
    /// Memory image: a kdump ELF core or a raw dump.
    pub vmcore: Option<PathBuf>,
    /// ISF symbol table for the dumped kernel, optionally `.xz`.
    pub symbols: Option<PathBuf>,
    pub format: ImageFormat,
    /// KASLR offset; overrides the one in the dump's VMCOREINFO.
    #[serde(deserialize_with = "deserialize_address")]
    pub kernel_offset: Option<u64>,
    /// Architecture ident or alias; defaults to the dump's `uname -m`.
    pub architecture: Option<String>,
    pub log_format: LogFormat,
}

impl InspectConfig {
    pub fn from_file(path: impl AsRef<Path>) -> CrashResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CrashError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> CrashResult<Self> {
        serde_json::from_str(text).map_err(|e| CrashError::Config(e.to_string()))
    }

    /// Apply `CRASHLENS_*` variables from the process environment.
    pub fn apply_env(&mut self) -> CrashResult<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> CrashResult<()> {
        if let Some(path) = var("CRASHLENS_VMCORE") {
            self.vmcore = Some(path.into());
        }
        if let Some(path) = var("CRASHLENS_SYMBOLS") {
            self.symbols = Some(path.into());
        }
        if let Some(offset) = var("CRASHLENS_KERNEL_OFFSET") {
            self.kernel_offset = Some(
                parse_address(&offset)
                    .map_err(|e| CrashError::Config(format!("CRASHLENS_KERNEL_OFFSET: {}", e)))?,
            );
        }
        if let Some(format) = var("CRASHLENS_LOG_FORMAT") {
            self.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(CrashError::Config(format!(
                        "CRASHLENS_LOG_FORMAT: unknown format '{}'",
                        other
                    )))
                }
            };
        }
        Ok(())
    }
}

/// `0x`-prefixed hex or decimal.
pub fn parse_address(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

fn deserialize_address<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Address {
        Number(u64),
        Text(String),
    }

    match Option::<Address>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Address::Number(n)) => Ok(Some(n)),
        Some(Address::Text(s)) => parse_address(&s).map(Some).map_err(serde::de::Error::custom),
    }
}
