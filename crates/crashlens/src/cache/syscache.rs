//! System-level facts read once from the image: kernel identity, the
//! embedded build configuration, and uptime.

use crate::error::{CrashError, CrashResult};
use crate::target::Target;
use flate2::read::DeflateDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Problems with the `kernel_config_data` blob itself.
#[derive(Debug, Clone, Error)]
pub enum ConfigDataError {
    #[error("Missing {marker} in kernel_config_data")]
    MissingMagic { marker: &'static str },

    #[error("kernel_config_data is too short ({0} bytes)")]
    Truncated(usize),

    #[error("Cannot inflate kernel_config_data: {0}")]
    Inflate(String),

    #[error("CONFIG_{0} is not set")]
    NotSet(String),

    #[error("CONFIG_{name} has non-numeric value '{value}'")]
    NotNumeric { name: String, value: String },
}

/// `init_uts_ns.name`: what `uname -a` prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utsname {
    /// Field name → value, in structure order.
    fields: Vec<(String, String)>,
}

const UTS_FIELD_LEN: usize = 65;

impl Utsname {
    pub fn load(target: &Target) -> CrashResult<Self> {
        let ns = target
            .symbol_reader("init_uts_ns", "uts_namespace")
            .map_err(|err| match err {
                CrashError::MissingSymbol(_) => {
                    CrashError::MissingSymbol("init_uts_ns (needed for utsname)".into())
                }
                other => other,
            })?;
        let name = ns.nested("name", "new_utsname")?;

        let layout = target
            .symbols()
            .get_type("new_utsname")
            .ok_or_else(|| CrashError::MissingType("new_utsname".into()))?;
        let mut field_names: Vec<(&String, usize)> = layout
            .fields
            .iter()
            .map(|(field, def)| (field, def.offset))
            .collect();
        field_names.sort_by_key(|&(_, offset)| offset);

        let fields = field_names
            .into_iter()
            .map(|(field, _)| -> CrashResult<(String, String)> {
                Ok((field.clone(), name.read_string(field, UTS_FIELD_LEN)?))
            })
            .collect::<CrashResult<Vec<_>>>()?;
        Ok(Utsname { fields })
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn sysname(&self) -> Option<&str> {
        self.get("sysname")
    }

    pub fn nodename(&self) -> Option<&str> {
        self.get("nodename")
    }

    pub fn release(&self) -> Option<&str> {
        self.get("release")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    pub fn machine(&self) -> Option<&str> {
        self.get("machine")
    }
}

/// The `.config` the kernel was built with (`CONFIG_IKCONFIG`).
#[derive(Debug, Clone)]
pub struct KernelConfig {
    text: String,
    options: BTreeMap<String, String>,
}

const MAGIC_START: &[u8; 8] = b"IKCFG_ST";
const MAGIC_END: &[u8; 8] = b"IKCFG_ED";
const GZIP_HEADER_LEN: usize = 10;

impl KernelConfig {
    pub fn load(target: &Target) -> CrashResult<Self> {
        let address = target.require_symbol("kernel_config_data")?;
        let length = target.symbol_size("kernel_config_data")?;
        let blob = target.read(address, length)?;
        Ok(Self::from_blob(&blob)?)
    }

    /// Decode the blob: `IKCFG_ST`, a gzip member, `IKCFG_ED` and a NUL.
    ///
    /// The gzip header is skipped and the deflate stream inflated raw.
    pub fn from_blob(blob: &[u8]) -> Result<Self, ConfigDataError> {
        let len = blob.len();
        if len < MAGIC_START.len() + GZIP_HEADER_LEN + MAGIC_END.len() + 1 {
            return Err(ConfigDataError::Truncated(len));
        }
        if &blob[..MAGIC_START.len()] != MAGIC_START {
            return Err(ConfigDataError::MissingMagic { marker: "IKCFG_ST" });
        }
        let end = len - MAGIC_END.len() - 1;
        if &blob[end..end + MAGIC_END.len()] != MAGIC_END {
            return Err(ConfigDataError::MissingMagic { marker: "IKCFG_ED" });
        }

        let compressed = &blob[MAGIC_START.len() + GZIP_HEADER_LEN..end];
        let mut raw = Vec::new();
        DeflateDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| ConfigDataError::Inflate(e.to_string()))?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        debug!("Inflated {} bytes of kernel config", text.len());

        Ok(Self::from_text(text))
    }

    pub fn from_text(text: String) -> Self {
        let options = parse_config(&text);
        KernelConfig { text, options }
    }

    /// The decompressed `.config`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Value of `CONFIG_<name>`, without the prefix.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, ConfigDataError> {
        self.get(name)
            .ok_or_else(|| ConfigDataError::NotSet(name.to_string()))
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

fn parse_config(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            let (name, value) = line.strip_prefix("CONFIG_")?.split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// `jiffies_64` starts at `INITIAL_JIFFIES`, five minutes before the
/// 32-bit wrap.
fn initial_jiffies(hz: u64) -> u64 {
    (1u64 << 32).wrapping_sub(hz.saturating_mul(300))
}

/// Tick rate and tick count at the time of the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelTimes {
    hz: u64,
    jiffies: u64,
}

impl KernelTimes {
    pub fn load(target: &Target, config: &KernelConfig) -> CrashResult<Self> {
        let value = config.require("HZ")?;
        let hz = value
            .parse::<u64>()
            .ok()
            .filter(|&hz| hz > 0)
            .ok_or_else(|| ConfigDataError::NotNumeric {
                name: "HZ".into(),
                value: value.to_string(),
            })?;

        let jiffies = if let Some(address) = target.symbol_address("jiffies_64") {
            target.read_u64(address)?.wrapping_sub(initial_jiffies(hz))
        } else if let Some(address) = target.symbol_address("jiffies") {
            target.read_u64(address)?
        } else {
            return Err(CrashError::MissingSymbol("jiffies_64 or jiffies".into()));
        };
        Ok(KernelTimes { hz, jiffies })
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    /// Ticks since boot.
    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_secs(self.jiffies / self.hz)
    }
}

/// `3 days, 4:05:06` style.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rest) = (secs / 86400, secs % 86400);
    let clock = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}
