use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::ValidationError;
use crate::modes::{ClickModeEngine, EngineSignal};
use crate::params::{ClickMode, ClickParameters};

/// Shortest gap between two clicks of one channel.
pub const MIN_DELAY_SECS: f64 = 0.001;
/// Longest gap between two clicks of one channel.
pub const MAX_DELAY_SECS: f64 = 3600.0;
/// Noise cursor advance per second of click delay.
pub const NOISE_CURSOR_DAMPING: f64 = 0.5;

pub const EMERGENCY_KEY: &str = "F12";
pub const CANCEL_KEY: &str = "ESCAPE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelId { Left, Right }

impl ChannelId {
    /// Service order within one loop iteration.
    pub const ALL: [ChannelId; 2] = [ChannelId::Left, ChannelId::Right];

    pub fn index(self) -> usize {
        match self {
            ChannelId::Left => 0,
            ChannelId::Right => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            ChannelId::Left => ChannelId::Right,
            ChannelId::Right => ChannelId::Left,
        }
    }

    pub fn button(self) -> ClickButton {
        match self {
            ChannelId::Left => ClickButton::Primary,
            ChannelId::Right => ClickButton::Secondary,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelId::Left => "Left",
            ChannelId::Right => "Right",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickButton { Primary, Secondary }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseTrigger { Left, Right, Middle, Other(u8) }

/// A key or mouse button that toggles a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TriggerInput {
    Key(String),
    Mouse(MouseTrigger),
}

impl TriggerInput {
    /// Key from a hook-reported name. `KeyA` style names shrink to their letter.
    pub fn key(name: &str) -> Self {
        let name = name.trim();
        let short = name
            .strip_prefix("Key")
            .filter(|rest| rest.chars().count() == 1)
            .unwrap_or(name);
        TriggerInput::Key(short.to_uppercase())
    }

    pub fn is_key(&self, name: &str) -> bool {
        matches!(self, TriggerInput::Key(k) if k == name)
    }

    pub fn label(&self) -> String {
        match self {
            TriggerInput::Key(name) => name.clone(),
            TriggerInput::Mouse(MouseTrigger::Left) => "MOUSE_LEFT".to_string(),
            TriggerInput::Mouse(MouseTrigger::Right) => "MOUSE_RIGHT".to_string(),
            TriggerInput::Mouse(MouseTrigger::Middle) => "MOUSE_MIDDLE".to_string(),
            TriggerInput::Mouse(MouseTrigger::Other(n)) => format!("MOUSE_{n}"),
        }
    }
}

impl FromStr for TriggerInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty trigger".to_string());
        }
        let upper = s.to_uppercase();
        match upper.strip_prefix("MOUSE_") {
            Some("LEFT") => Ok(TriggerInput::Mouse(MouseTrigger::Left)),
            Some("RIGHT") => Ok(TriggerInput::Mouse(MouseTrigger::Right)),
            Some("MIDDLE") => Ok(TriggerInput::Mouse(MouseTrigger::Middle)),
            Some(n) => n
                .parse::<u8>()
                .map(|n| TriggerInput::Mouse(MouseTrigger::Other(n)))
                .map_err(|_| format!("unknown mouse button '{s}'")),
            None => Ok(TriggerInput::key(s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    Emit {
        offset_x: f64,
        offset_y: f64,
        rate: f64,
        delay: Duration,
    },
    Deactivated {
        signal: Option<EngineSignal>,
    },
}

/// One click channel: its trigger, validated parameters and engine.
pub struct ChannelScheduler {
    id: ChannelId,
    trigger: Option<TriggerInput>,
    params: Option<ClickParameters>,
    engine: ClickModeEngine,
    active: bool,
    activated_at: Instant,
    next_due: Instant,
    last_action: Option<Instant>,
    rng: StdRng,
}

impl ChannelScheduler {
    pub fn new(id: ChannelId) -> Self {
        Self::with_rng(id, StdRng::from_entropy())
    }

    pub fn with_rng(id: ChannelId, rng: StdRng) -> Self {
        let now = Instant::now();
        Self {
            id,
            trigger: None,
            params: None,
            engine: ClickModeEngine::new(ClickMode::Constant),
            active: false,
            activated_at: now,
            next_due: now,
            last_action: None,
            rng,
        }
    }

    pub fn is_active(&self) -> bool { self.active }
    pub fn trigger(&self) -> Option<&TriggerInput> { self.trigger.as_ref() }
    #[cfg(test)]
    pub fn params(&self) -> Option<&ClickParameters> { self.params.as_ref() }
    #[cfg(test)]
    pub fn engine(&self) -> &ClickModeEngine { &self.engine }
    pub fn next_due(&self) -> Instant { self.next_due }
    #[cfg(test)]
    pub fn last_action(&self) -> Option<Instant> { self.last_action }

    pub fn set_trigger(&mut self, trigger: Option<TriggerInput>) {
        self.trigger = trigger;
    }

    /// Swaps in a new engine, starting from a clean phase.
    pub fn replace_engine(&mut self, mut engine: ClickModeEngine) {
        engine.reset();
        self.engine = engine;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.active && now >= self.next_due
    }

    /// Validates `params` and starts the channel. On error nothing changes.
    pub fn activate(&mut self, params: ClickParameters, now: Instant) -> Result<(), ValidationError> {
        params.validate()?;
        if self.engine.mode() != params.mode {
            self.engine = ClickModeEngine::new(params.mode);
        }
        self.engine.reset();
        self.params = Some(params);
        self.active = true;
        self.activated_at = now;
        self.next_due = now;
        log::info!("{} channel activated ({})", self.id, self.engine.mode());
        Ok(())
    }

    /// Runs one action. Only meaningful while active and due.
    pub fn tick(&mut self, now: Instant) -> ActionOutcome {
        let Some(params) = self.params.as_ref() else {
            self.active = false;
            return ActionOutcome::Deactivated { signal: None };
        };

        let elapsed = now.saturating_duration_since(self.activated_at).as_secs_f64();
        let out = self.engine.compute_action(params, elapsed, &mut self.rng);
        if out.is_stop() {
            self.active = false;
            log::info!("{} channel stopped by its {} engine", self.id, self.engine.mode());
            return ActionOutcome::Deactivated { signal: out.signal };
        }

        let jitter = params.timing_jitter_ms as f64 / 1000.0;
        let noise = if jitter > 0.0 { self.rng.gen_range(-jitter..=jitter) } else { 0.0 };
        let delay = clamp_delay(1.0 / out.rate + noise);
        let step = Duration::from_secs_f64(delay);

        let since_last = self
            .last_action
            .map_or(0.0, |prev| now.saturating_duration_since(prev).as_secs_f64());
        log::debug!(
            "{} tick: rate {:.2}/s, {:.1} ms since last, next in {:.1} ms",
            self.id,
            out.rate,
            since_last * 1000.0,
            delay * 1000.0
        );
        self.next_due = now.checked_add(step).unwrap_or(now);
        self.last_action = Some(now);
        self.engine.advance_cursor(delay * NOISE_CURSOR_DAMPING);

        ActionOutcome::Emit {
            offset_x: out.offset_x,
            offset_y: out.offset_y,
            rate: out.rate,
            delay: step,
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Keeps a computed delay within [MIN_DELAY_SECS, MAX_DELAY_SECS]; NaN maps to the maximum.
fn clamp_delay(secs: f64) -> f64 {
    if secs.is_nan() {
        MAX_DELAY_SECS
    } else {
        secs.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS)
    }
}
