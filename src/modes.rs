//! Click timing profiles.
//!
//! Each engine maps the channel's parameters and the time since activation to an
//! instantaneous click rate plus a pixel offset. A rate of zero or below is the
//! stop signal: the channel must switch off without clicking.

use rand::Rng;

use crate::error::{PatternError, UnknownModeError};
use crate::noise::NoiseSource;
use crate::params::{parse_pattern, ClickMode, ClickParameters};

pub const SINE_ANGULAR_FREQ: f64 = 1.5;
pub const SINE_DEPTH: f64 = 0.25;
pub const BURST_RAMP_FRACTION: f64 = 0.3;
/// Lowest level of the burst envelope while ramping, as a fraction of peak rate.
pub const BURST_RAMP_FLOOR: f64 = 0.1;
const BURST_MIN_RAMP_SECS: f64 = 1e-3;
pub const ORGANIC_RATE_DEPTH: f64 = 0.4;
pub const PATTERN_ZERO_DELAY_RATE: f64 = 1000.0;

const RATE_OCTAVES: u32 = 2;
const OFFSET_OCTAVES: u32 = 4;

/// Side request raised by an engine alongside its output.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineSignal {
    /// Burst finished: wind the whole coordinator down after this action.
    CoordinatorStop,
    /// Pattern could not be parsed; report it and stop the channel.
    Fault(PatternError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModeOutput {
    pub rate: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub signal: Option<EngineSignal>,
}

impl ModeOutput {
    fn click(rate: f64, (offset_x, offset_y): (f64, f64)) -> Self {
        Self { rate, offset_x, offset_y, signal: None }
    }

    fn stop(signal: Option<EngineSignal>) -> Self {
        Self { rate: 0.0, offset_x: 0.0, offset_y: 0.0, signal }
    }

    pub fn is_stop(&self) -> bool {
        self.rate <= 0.0
    }
}

#[derive(Clone, Debug)]
pub struct OrganicState {
    cursor: f64,
    rate_noise: NoiseSource,
    x_noise: NoiseSource,
    y_noise: NoiseSource,
}

impl OrganicState {
    fn random() -> Self {
        let state = Self {
            cursor: 0.0,
            rate_noise: NoiseSource::random(RATE_OCTAVES),
            x_noise: NoiseSource::random(OFFSET_OCTAVES),
            y_noise: NoiseSource::random(OFFSET_OCTAVES),
        };
        log::debug!(
            "organic noise seeds: rate {} ({} octaves), x {}, y {}",
            state.rate_noise.seed(),
            state.rate_noise.octaves(),
            state.x_noise.seed(),
            state.y_noise.seed()
        );
        state
    }

    #[cfg(test)]
    fn seeded([rate, x, y]: [u64; 3]) -> Self {
        Self {
            cursor: 0.0,
            rate_noise: NoiseSource::new(rate, RATE_OCTAVES),
            x_noise: NoiseSource::new(x, OFFSET_OCTAVES),
            y_noise: NoiseSource::new(y, OFFSET_OCTAVES),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PatternState {
    delays: Vec<f64>,
    index: usize,
    faulted: bool,
}

/// One channel's click mode together with its phase state.
#[derive(Clone, Debug)]
pub enum ClickModeEngine {
    Constant,
    SineWave,
    Burst { finished: bool },
    OrganicNoise(OrganicState),
    RandomRange,
    Pattern(PatternState),
}

impl ClickModeEngine {
    pub fn new(mode: ClickMode) -> Self {
        match mode {
            ClickMode::Constant => ClickModeEngine::Constant,
            ClickMode::SineWave => ClickModeEngine::SineWave,
            ClickMode::Burst => ClickModeEngine::Burst { finished: false },
            ClickMode::OrganicNoise => ClickModeEngine::OrganicNoise(OrganicState::random()),
            ClickMode::RandomRange => ClickModeEngine::RandomRange,
            ClickMode::Pattern => ClickModeEngine::Pattern(PatternState::default()),
        }
    }

    /// Engine factory keyed by mode name.
    pub fn from_name(name: &str) -> Result<Self, UnknownModeError> {
        name.parse::<ClickMode>().map(Self::new)
    }

    /// Organic noise engine with fixed seeds for the rate, X and Y sources.
    #[cfg(test)]
    pub fn organic_seeded(seeds: [u64; 3]) -> Self {
        ClickModeEngine::OrganicNoise(OrganicState::seeded(seeds))
    }

    pub fn mode(&self) -> ClickMode {
        match self {
            ClickModeEngine::Constant => ClickMode::Constant,
            ClickModeEngine::SineWave => ClickMode::SineWave,
            ClickModeEngine::Burst { .. } => ClickMode::Burst,
            ClickModeEngine::OrganicNoise(_) => ClickMode::OrganicNoise,
            ClickModeEngine::RandomRange => ClickMode::RandomRange,
            ClickModeEngine::Pattern(_) => ClickMode::Pattern,
        }
    }

    /// Clears all phase state. Organic noise sources get fresh seeds.
    pub fn reset(&mut self) {
        match self {
            ClickModeEngine::Burst { finished } => *finished = false,
            ClickModeEngine::OrganicNoise(state) => *state = OrganicState::random(),
            ClickModeEngine::Pattern(state) => *state = PatternState::default(),
            ClickModeEngine::Constant | ClickModeEngine::SineWave | ClickModeEngine::RandomRange => {}
        }
    }

    /// Moves the organic noise cursor forward. Other modes ignore it.
    pub fn advance_cursor(&mut self, by: f64) {
        if let ClickModeEngine::OrganicNoise(state) = self {
            state.cursor += by;
        }
    }

    #[cfg(test)]
    pub fn noise_cursor(&self) -> Option<f64> {
        match self {
            ClickModeEngine::OrganicNoise(state) => Some(state.cursor),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn pattern_index(&self) -> Option<usize> {
        match self {
            ClickModeEngine::Pattern(state) => Some(state.index),
            _ => None,
        }
    }

    /// Rate and offset for the action at `elapsed` seconds since activation.
    pub fn compute_action<R: Rng>(
        &mut self,
        params: &ClickParameters,
        elapsed: f64,
        rng: &mut R,
    ) -> ModeOutput {
        let peak = params.peak_rate;
        let px = params.spatial_jitter_px;
        match self {
            ClickModeEngine::Constant => ModeOutput::click(peak, uniform_offsets(px, rng)),
            ClickModeEngine::SineWave => {
                let rate = peak + (elapsed * SINE_ANGULAR_FREQ).sin() * (peak * SINE_DEPTH);
                ModeOutput::click(rate, uniform_offsets(px, rng))
            }
            ClickModeEngine::Burst { finished } => {
                match burst_level(params.burst_duration_secs, elapsed) {
                    Some(level) => ModeOutput::click(level * peak, uniform_offsets(px, rng)),
                    None if *finished => ModeOutput::stop(None),
                    None => {
                        *finished = true;
                        ModeOutput::stop(Some(EngineSignal::CoordinatorStop))
                    }
                }
            }
            ClickModeEngine::OrganicNoise(state) => {
                let c = state.cursor;
                let rate = peak + state.rate_noise.sample(c) * (peak * ORGANIC_RATE_DEPTH);
                let offsets = (
                    state.x_noise.sample(c) * px as f64,
                    state.y_noise.sample(c) * px as f64,
                );
                ModeOutput::click(rate, offsets)
            }
            ClickModeEngine::RandomRange => {
                let (min, max) = (params.min_rate, params.max_rate);
                let rate = if min <= 0.0 || max <= 0.0 || min > max {
                    peak
                } else {
                    rng.gen_range(min..=max)
                };
                ModeOutput::click(rate, uniform_offsets(px, rng))
            }
            ClickModeEngine::Pattern(state) => {
                if state.faulted {
                    return ModeOutput::stop(None);
                }
                if state.delays.is_empty() {
                    match parse_pattern(&params.pattern) {
                        Ok(delays) => state.delays = delays,
                        Err(err) => {
                            state.faulted = true;
                            return ModeOutput::stop(Some(EngineSignal::Fault(err)));
                        }
                    }
                }
                let delay = state.delays[state.index];
                let rate = if delay <= 0.0 { PATTERN_ZERO_DELAY_RATE } else { 1.0 / delay };
                state.index = (state.index + 1) % state.delays.len();
                ModeOutput::click(rate, uniform_offsets(px, rng))
            }
        }
    }
}

/// Burst envelope level in [BURST_RAMP_FLOOR, 1], or `None` once the burst is over.
fn burst_level(duration: f64, elapsed: f64) -> Option<f64> {
    let t = elapsed.max(0.0);
    if t >= duration {
        return None;
    }

    let mut ramp = duration * BURST_RAMP_FRACTION;
    if ramp <= 0.0 {
        ramp = BURST_MIN_RAMP_SECS;
    }
    let mut plateau = duration - 2.0 * ramp;
    if plateau <= 0.0 {
        plateau = 0.0;
        ramp = duration / 2.0;
    }

    let level = if t < ramp {
        t / ramp
    } else if t < ramp + plateau {
        return Some(1.0);
    } else {
        1.0 - (t - ramp - plateau) / ramp
    };
    Some(level.max(BURST_RAMP_FLOOR))
}

fn uniform_offsets<R: Rng>(px: u32, rng: &mut R) -> (f64, f64) {
    if px == 0 {
        return (0.0, 0.0);
    }
    let px = px as i32;
    (rng.gen_range(-px..=px) as f64, rng.gen_range(-px..=px) as f64)
}
