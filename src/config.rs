//! Config file loading and the live settings snapshot the coordinator reads.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::channel::{ChannelId, TriggerInput, EMERGENCY_KEY};
use crate::coordinator::SettingsProvider;
use crate::error::{ClickerError, Result};
use crate::params::{ClickParameters, RawSettings, SETTING_KEYS};
use crate::timing::{SleepWait, SpinWait, WaitStrategy};

/// Contents of a `--config` TOML file. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub left: ChannelSection,
    #[serde(default)]
    pub right: ChannelSection,
    #[serde(default)]
    pub timing: TimingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSection {
    #[serde(default)]
    pub trigger: Option<String>,
    /// Raw settings keys, passed through as strings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    #[serde(default)]
    pub precise: bool,
    #[serde(default = "default_spin_margin_ms")]
    pub spin_margin_ms: u64,
}

fn default_spin_margin_ms() -> u64 {
    2
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            precise: false,
            spin_margin_ms: default_spin_margin_ms(),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ClickerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ClickerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Both channels' triggers. The same input on both channels is rejected.
    pub fn triggers(&self) -> Result<[Option<TriggerInput>; 2]> {
        let left = self.left.trigger()?;
        let right = self.right.trigger()?;
        if let (Some(l), Some(r)) = (&left, &right) {
            if l == r {
                return Err(ClickerError::BadTrigger(format!("{} is bound to both channels", l.label())));
            }
        }
        Ok([left, right])
    }

    pub fn shared_settings(&self) -> SharedSettings {
        SharedSettings::new(self.left.raw_settings(), self.right.raw_settings())
    }
}

impl ChannelSection {
    pub fn trigger(&self) -> Result<Option<TriggerInput>> {
        let Some(text) = self.trigger.as_deref() else {
            return Ok(None);
        };
        let input = text.parse::<TriggerInput>().map_err(ClickerError::BadTrigger)?;
        if input.is_key(EMERGENCY_KEY) {
            return Err(ClickerError::BadTrigger(format!("{EMERGENCY_KEY} is reserved for emergency stop")));
        }
        Ok(Some(input))
    }

    /// The file's values laid over the default settings.
    pub fn raw_settings(&self) -> RawSettings {
        let mut raw = ClickParameters::defaults_as_raw();
        for (key, value) in &self.settings {
            if !SETTING_KEYS.contains(&key.as_str()) {
                log::warn!("ignoring unknown setting '{key}'");
                continue;
            }
            raw.set(key, value_text(value));
        }
        raw
    }
}

fn value_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TimingSection {
    pub fn waiter(&self, precise: bool) -> Box<dyn WaitStrategy> {
        if precise || self.precise {
            log::info!("precise timing, spin margin {} ms", self.spin_margin_ms);
            Box::new(SpinWait::new(Duration::from_millis(self.spin_margin_ms)))
        } else {
            Box::new(SleepWait)
        }
    }
}

/// Both channels' raw settings behind one lock. The window writes, the
/// coordinator snapshots on activation.
#[derive(Clone, Debug)]
pub struct SharedSettings(Arc<Mutex<[RawSettings; 2]>>);

impl SharedSettings {
    pub fn new(left: RawSettings, right: RawSettings) -> Self {
        Self(Arc::new(Mutex::new([left, right])))
    }

    pub fn snapshot(&self, id: ChannelId) -> RawSettings {
        self.0.lock()[id.index()].clone()
    }

    pub fn update(&self, id: ChannelId, raw: RawSettings) {
        self.0.lock()[id.index()] = raw;
    }

    #[cfg(test)]
    pub fn set(&self, id: ChannelId, key: &str, value: impl ToString) {
        self.0.lock()[id.index()].set(key, value);
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(ClickParameters::defaults_as_raw(), ClickParameters::defaults_as_raw())
    }
}

impl SettingsProvider for SharedSettings {
    fn current_settings(&self, channel: ChannelId) -> Option<RawSettings> {
        Some(self.snapshot(channel))
    }
}
