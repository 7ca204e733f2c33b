use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PatternError, UnknownModeError, ValidationError};

/// Slowest accepted rate: one click every 100 s.
pub const MIN_RATE: f64 = 0.01;
pub const MAX_RATE: f64 = 1000.0;
pub const MAX_PATTERN_DELAY_MS: f64 = 60_000.0;
pub const MAX_TIMING_JITTER_MS: u32 = 1000;
pub const MAX_SPATIAL_JITTER_PX: u32 = 100;
pub const MAX_BURST_SECS: f64 = 300.0;

pub const KEY_MODE: &str = "mode";
pub const KEY_PEAK_RATE: &str = "peak_rate";
pub const KEY_TIMING_JITTER: &str = "timing_jitter_ms";
pub const KEY_SPATIAL_JITTER: &str = "spatial_jitter_px";
pub const KEY_BURST_DURATION: &str = "burst_duration_secs";
pub const KEY_MIN_RATE: &str = "min_rate";
pub const KEY_MAX_RATE: &str = "max_rate";
pub const KEY_PATTERN: &str = "pattern";

pub const SETTING_KEYS: [&str; 8] = [
    KEY_MODE,
    KEY_PEAK_RATE,
    KEY_TIMING_JITTER,
    KEY_SPATIAL_JITTER,
    KEY_BURST_DURATION,
    KEY_MIN_RATE,
    KEY_MAX_RATE,
    KEY_PATTERN,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ClickMode {
    #[default]
    Constant,
    SineWave,
    Burst,
    OrganicNoise,
    RandomRange,
    Pattern,
}

impl ClickMode {
    pub const ALL: [ClickMode; 6] = [
        ClickMode::Constant,
        ClickMode::SineWave,
        ClickMode::Burst,
        ClickMode::OrganicNoise,
        ClickMode::RandomRange,
        ClickMode::Pattern,
    ];

    /// Canonical name used in settings maps and config files.
    pub fn name(self) -> &'static str {
        match self {
            ClickMode::Constant => "constant",
            ClickMode::SineWave => "sine",
            ClickMode::Burst => "burst",
            ClickMode::OrganicNoise => "organic",
            ClickMode::RandomRange => "random",
            ClickMode::Pattern => "pattern",
        }
    }

    /// What `peak_rate` means for this mode, for display next to the rate control.
    pub fn rate_label(self) -> &'static str {
        match self {
            ClickMode::Constant => "Target rate (CPS)",
            ClickMode::SineWave | ClickMode::OrganicNoise => "Average rate (CPS)",
            ClickMode::Burst => "Peak rate (CPS)",
            ClickMode::RandomRange => "Reference rate (CPS)",
            ClickMode::Pattern => "Fallback rate (CPS)",
        }
    }
}

impl fmt::Display for ClickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClickMode::Constant => "Constant",
            ClickMode::SineWave => "Sine wave",
            ClickMode::Burst => "Burst",
            ClickMode::OrganicNoise => "Organic noise",
            ClickMode::RandomRange => "Random range",
            ClickMode::Pattern => "Pattern",
        };
        f.write_str(label)
    }
}

impl FromStr for ClickMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "constant" => Ok(ClickMode::Constant),
            "sine" | "sinewave" => Ok(ClickMode::SineWave),
            "burst" => Ok(ClickMode::Burst),
            "organic" | "organicnoise" => Ok(ClickMode::OrganicNoise),
            "random" | "randomrange" => Ok(ClickMode::RandomRange),
            "pattern" => Ok(ClickMode::Pattern),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

/// Per-channel settings exactly as the provider hands them over: strings only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSettings(BTreeMap<String, String>);

impl RawSettings {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn mode_name(&self) -> &str {
        self.get(KEY_MODE).unwrap_or("constant")
    }
}

/// Validated, immutable snapshot of one channel's settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ClickParameters {
    pub mode: ClickMode,
    pub peak_rate: f64,
    pub timing_jitter_ms: u32,
    pub spatial_jitter_px: u32,
    pub burst_duration_secs: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub pattern: String,
}

impl Default for ClickParameters {
    fn default() -> Self {
        Self {
            mode: ClickMode::Constant,
            peak_rate: 15.0,
            timing_jitter_ms: 15,
            spatial_jitter_px: 3,
            burst_duration_secs: 5.0,
            min_rate: 5.0,
            max_rate: 15.0,
            pattern: "100-80-120".to_string(),
        }
    }
}

impl ClickParameters {
    #[cfg(test)]
    pub fn constant(peak_rate: f64) -> Self {
        Self {
            peak_rate,
            timing_jitter_ms: 0,
            spatial_jitter_px: 0,
            ..Self::default()
        }
    }

    pub fn defaults_as_raw() -> RawSettings {
        let d = Self::default();
        RawSettings::new()
            .with(KEY_MODE, d.mode.name())
            .with(KEY_PEAK_RATE, d.peak_rate)
            .with(KEY_TIMING_JITTER, d.timing_jitter_ms)
            .with(KEY_SPATIAL_JITTER, d.spatial_jitter_px)
            .with(KEY_BURST_DURATION, d.burst_duration_secs)
            .with(KEY_MIN_RATE, d.min_rate)
            .with(KEY_MAX_RATE, d.max_rate)
            .with(KEY_PATTERN, d.pattern)
    }

    /// Coerces raw settings for `mode`, then range-checks them. Mode-specific
    /// fields are only read for their own mode; the rest keep their defaults.
    pub fn from_raw(raw: &RawSettings, mode: ClickMode) -> Result<Self, ValidationError> {
        let mut params = Self { mode, ..Self::default() };
        params.peak_rate = parse_f64(raw, KEY_PEAK_RATE)?;
        params.timing_jitter_ms = parse_u32(raw, KEY_TIMING_JITTER)?;
        params.spatial_jitter_px = parse_u32(raw, KEY_SPATIAL_JITTER)?;
        match mode {
            ClickMode::Burst => params.burst_duration_secs = parse_f64(raw, KEY_BURST_DURATION)?,
            ClickMode::RandomRange => {
                params.min_rate = parse_f64(raw, KEY_MIN_RATE)?;
                params.max_rate = parse_f64(raw, KEY_MAX_RATE)?;
            }
            ClickMode::Pattern => {
                params.pattern = field(raw, KEY_PATTERN)?.to_string();
            }
            ClickMode::Constant | ClickMode::SineWave | ClickMode::OrganicNoise => {}
        }
        params.validate()?;
        Ok(params)
    }

    /// Range checks, reporting the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !rate_in_range(self.peak_rate) {
            return Err(ValidationError::new(KEY_PEAK_RATE, format!("must be in [{MIN_RATE}, {MAX_RATE}]")));
        }
        if self.timing_jitter_ms > MAX_TIMING_JITTER_MS {
            return Err(ValidationError::new(
                KEY_TIMING_JITTER,
                format!("must be in [0, {MAX_TIMING_JITTER_MS}]"),
            ));
        }
        if self.spatial_jitter_px > MAX_SPATIAL_JITTER_PX {
            return Err(ValidationError::new(
                KEY_SPATIAL_JITTER,
                format!("must be in [0, {MAX_SPATIAL_JITTER_PX}]"),
            ));
        }

        match self.mode {
            ClickMode::Burst => {
                if !(self.burst_duration_secs > 0.0 && self.burst_duration_secs <= MAX_BURST_SECS) {
                    return Err(ValidationError::new(
                        KEY_BURST_DURATION,
                        format!("must be in (0, {MAX_BURST_SECS}]"),
                    ));
                }
            }
            ClickMode::RandomRange => {
                for (key, value) in [(KEY_MIN_RATE, self.min_rate), (KEY_MAX_RATE, self.max_rate)] {
                    if !rate_in_range(value) {
                        return Err(ValidationError::new(key, format!("must be in [{MIN_RATE}, {MAX_RATE}]")));
                    }
                }
                if self.min_rate > self.max_rate {
                    return Err(ValidationError::new(KEY_MIN_RATE, "must not exceed max_rate"));
                }
            }
            ClickMode::Pattern => {
                let delays = parse_pattern(&self.pattern)
                    .map_err(|e| ValidationError::new(KEY_PATTERN, e.to_string()))?;
                if !delays.iter().any(|d| *d > 0.0) {
                    return Err(ValidationError::new(KEY_PATTERN, "needs at least one positive delay"));
                }
                if delays.iter().any(|d| *d * 1000.0 > MAX_PATTERN_DELAY_MS) {
                    return Err(ValidationError::new(
                        KEY_PATTERN,
                        format!("delays must not exceed {MAX_PATTERN_DELAY_MS} ms"),
                    ));
                }
            }
            ClickMode::Constant | ClickMode::SineWave | ClickMode::OrganicNoise => {}
        }
        Ok(())
    }
}

fn rate_in_range(rate: f64) -> bool {
    (MIN_RATE..=MAX_RATE).contains(&rate)
}

/// Splits a `-` separated list of millisecond delays into seconds.
pub fn parse_pattern(pattern: &str) -> Result<Vec<f64>, PatternError> {
    let mut delays = Vec::new();
    for token in pattern.split('-').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<f64>() {
            Ok(ms) if ms.is_finite() => delays.push(ms / 1000.0),
            _ => return Err(PatternError::NotNumeric(token.to_string())),
        }
    }
    if delays.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(delays)
}

fn field<'a>(raw: &'a RawSettings, key: &'static str) -> Result<&'a str, ValidationError> {
    raw.get(key)
        .map(str::trim)
        .ok_or_else(|| ValidationError::new(key, "missing"))
}

fn parse_f64(raw: &RawSettings, key: &'static str) -> Result<f64, ValidationError> {
    let text = field(raw, key)?;
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::new(key, format!("'{text}' is not a number")))
}

fn parse_u32(raw: &RawSettings, key: &'static str) -> Result<u32, ValidationError> {
    let text = field(raw, key)?;
    text.parse::<u32>()
        .map_err(|_| ValidationError::new(key, format!("'{text}' is not a non-negative integer")))
}
