//! Lazily loaded, session-wide kernel facts.

pub mod syscache;

use crate::error::CrashResult;
use crate::target::Target;
use std::cell::OnceCell;
use syscache::{KernelConfig, KernelTimes, Utsname};

/// Loads each fact on first request and keeps it. A failed load is not
/// cached, so a later request retries.
pub struct SystemCache<'t> {
    target: &'t Target,
    utsname: OnceCell<Utsname>,
    config: OnceCell<KernelConfig>,
    times: OnceCell<KernelTimes>,
}

impl<'t> SystemCache<'t> {
    pub fn new(target: &'t Target) -> Self {
        SystemCache {
            target,
            utsname: OnceCell::new(),
            config: OnceCell::new(),
            times: OnceCell::new(),
        }
    }

    pub fn utsname(&self) -> CrashResult<&Utsname> {
        if let Some(uts) = self.utsname.get() {
            return Ok(uts);
        }
        let uts = Utsname::load(self.target)?;
        Ok(self.utsname.get_or_init(|| uts))
    }

    pub fn config(&self) -> CrashResult<&KernelConfig> {
        if let Some(config) = self.config.get() {
            return Ok(config);
        }
        let config = KernelConfig::load(self.target)?;
        Ok(self.config.get_or_init(|| config))
    }

    pub fn kernel(&self) -> CrashResult<&KernelTimes> {
        if let Some(times) = self.times.get() {
            return Ok(times);
        }
        let times = KernelTimes::load(self.target, self.config()?)?;
        Ok(self.times.get_or_init(|| times))
    }
}
