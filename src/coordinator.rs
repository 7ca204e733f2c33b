//! The single owner of all channel state.
//!
//! One coordinator thread holds both channels. Everything else (the settings
//! window, the global input hook) talks to it through the `Command` inbox and
//! listens to `StatusEvent`s. While idle the thread just waits for commands;
//! while a channel is active it runs the scheduling loop, whose only blocking
//! point is the bounded wait between due-checks.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::channel::{
    ActionOutcome, ChannelId, ChannelScheduler, TriggerInput, CANCEL_KEY, EMERGENCY_KEY,
};
use crate::error::{ClickerError, InjectError};
use crate::injector::InputSink;
use crate::modes::{ClickModeEngine, EngineSignal};
use crate::params::{ClickMode, ClickParameters, RawSettings};
use crate::timing::{Wake, WaitStrategy};

pub const MIN_IDLE_WAIT: Duration = Duration::from_millis(1);
pub const MAX_IDLE_WAIT: Duration = Duration::from_millis(10);
pub const CLICK_YIELD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum Command {
    Toggle(ChannelId),
    BeginAssign(ChannelId),
    /// A raw key or mouse-button press from the global listener.
    #[cfg_attr(not(feature = "hooks"), allow(dead_code))]
    Input(TriggerInput),
    SetTrigger(ChannelId, Option<TriggerInput>),
    SetMode(ChannelId, String),
    EmergencyStop,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Stopped,
    Active(ChannelId),
    BothActive,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Active(_) | RunStatus::BothActive)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => f.write_str("Idle"),
            RunStatus::Stopped => f.write_str("Stopped"),
            RunStatus::Active(id) => write!(f, "{id} active"),
            RunStatus::BothActive => f.write_str("Both active"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    StatusChanged { status: RunStatus, active: bool },
    RealtimeRate { rate: f64, channel: ChannelId },
    ClickCount(u64),
    Error { title: String, message: String },
    Warning { title: String, message: String },
    AssignPrompt { channel: ChannelId },
    TriggerAssigned { channel: ChannelId, label: Option<String> },
    ModeChanged { channel: ChannelId, mode: ClickMode },
    Shutdown { emergency: bool },
}

/// Receives status events. Fire-and-forget.
pub trait StatusSink: Send {
    fn emit(&self, event: StatusEvent);
}

impl StatusSink for Sender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        if let Err(err) = self.send(event) {
            log::debug!("status receiver gone, dropped {:?}", err.into_inner());
        }
    }
}

/// Supplies a channel's raw settings on demand.
pub trait SettingsProvider: Send {
    fn current_settings(&self, channel: ChannelId) -> Option<RawSettings>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase { Idle, Active }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow { Continue, Exit }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Clicked,
    Waiting(Duration),
    Finished,
}

struct CoordinatorState {
    phase: Phase,
    status: RunStatus,
    total_clicks: u64,
    stop_requested: bool,
    assigning: Option<ChannelId>,
}

pub struct Coordinator {
    channels: [ChannelScheduler; 2],
    state: CoordinatorState,
    injector: Box<dyn InputSink>,
    status: Box<dyn StatusSink>,
    settings: Box<dyn SettingsProvider>,
}

impl Coordinator {
    pub fn new(
        injector: Box<dyn InputSink>,
        status: Box<dyn StatusSink>,
        settings: Box<dyn SettingsProvider>,
    ) -> Self {
        Self {
            channels: [ChannelScheduler::new(ChannelId::Left), ChannelScheduler::new(ChannelId::Right)],
            state: CoordinatorState {
                phase: Phase::Idle,
                status: RunStatus::Idle,
                total_clicks: 0,
                stop_requested: false,
                assigning: None,
            },
            injector,
            status,
            settings,
        }
    }

    #[cfg(test)]
    pub fn channel(&self, id: ChannelId) -> &ChannelScheduler {
        &self.channels[id.index()]
    }

    #[cfg(test)]
    pub fn status(&self) -> RunStatus { self.state.status }
    #[cfg(test)]
    pub fn total_clicks(&self) -> u64 { self.state.total_clicks }
    #[cfg(test)]
    pub fn is_running(&self) -> bool { self.state.phase == Phase::Active }
    #[cfg(test)]
    pub fn assigning(&self) -> Option<ChannelId> { self.state.assigning }

    fn any_active(&self) -> bool {
        self.channels.iter().any(ChannelScheduler::is_active)
    }

    fn warn(&self, title: &str, message: String) {
        log::warn!("{title}: {message}");
        self.status.emit(StatusEvent::Warning { title: title.to_string(), message });
    }

    fn error(&self, title: &str, message: String) {
        log::error!("{title}: {message}");
        self.status.emit(StatusEvent::Error { title: title.to_string(), message });
    }

    pub fn handle(&mut self, cmd: Command, now: Instant) -> Flow {
        log::debug!("command: {cmd:?}");
        match cmd {
            Command::Toggle(id) => self.toggle_channel(id, now),
            Command::BeginAssign(id) => {
                self.state.assigning = Some(id);
                self.status.emit(StatusEvent::AssignPrompt { channel: id });
            }
            Command::Input(input) => return self.on_input(input, now),
            Command::SetTrigger(id, trigger) => {
                self.channels[id.index()].set_trigger(trigger);
                self.announce_trigger(id);
            }
            Command::SetMode(id, name) => self.set_mode(id, &name),
            Command::EmergencyStop => return self.shutdown(true),
            Command::Shutdown => return self.shutdown(false),
        }
        Flow::Continue
    }

    /// Starts an inactive channel or stops an active one.
    pub fn toggle_channel(&mut self, id: ChannelId, now: Instant) {
        if self.channels[id.index()].is_active() {
            self.deactivate_channel(id);
            log::info!("{id} channel deactivated");
        } else if self.try_activate(id, now) {
            self.recompute_global_status();
        }
    }

    /// Stops one channel. Repeated calls announce the status only once.
    pub fn deactivate_channel(&mut self, id: ChannelId) {
        self.channels[id.index()].deactivate();
        self.recompute_global_status();
    }

    fn try_activate(&mut self, id: ChannelId, now: Instant) -> bool {
        if self.channels[id.index()].trigger().is_none() {
            self.warn("No trigger", format!("Assign a trigger to the {id} channel first"));
            return false;
        }
        let Some(raw) = self.settings.current_settings(id) else {
            self.error("Settings unavailable", format!("No settings for the {id} channel"));
            return false;
        };
        let mode = match raw.mode_name().parse::<ClickMode>() {
            Ok(mode) => mode,
            Err(err) => {
                self.warn("Unknown mode", format!("{err}; the {id} channel falls back to Constant"));
                ClickMode::Constant
            }
        };
        let params = match ClickParameters::from_raw(&raw, mode) {
            Ok(params) => params,
            Err(err) => {
                self.error(&format!("Invalid {id} settings"), err.to_string());
                return false;
            }
        };

        let was_idle = !self.any_active();
        if let Err(err) = self.channels[id.index()].activate(params, now) {
            self.error(&format!("Invalid {id} settings"), err.to_string());
            return false;
        }
        if was_idle {
            self.state.total_clicks = 0;
            self.state.stop_requested = false;
            self.state.phase = Phase::Active;
            self.status.emit(StatusEvent::ClickCount(0));
            log::info!("click loop started");
        }
        true
    }

    /// Derives the run status from the channels and announces it if it changed.
    pub fn recompute_global_status(&mut self) {
        let left = self.channels[ChannelId::Left.index()].is_active();
        let right = self.channels[ChannelId::Right.index()].is_active();
        let status = match (left, right) {
            (true, true) => RunStatus::BothActive,
            (true, false) => RunStatus::Active(ChannelId::Left),
            (false, true) => RunStatus::Active(ChannelId::Right),
            (false, false) if self.state.phase == Phase::Active => RunStatus::Stopped,
            (false, false) => RunStatus::Idle,
        };
        if status != self.state.status {
            self.state.status = status;
            self.status.emit(StatusEvent::StatusChanged { status, active: status.is_active() });
        }
    }

    fn on_input(&mut self, input: TriggerInput, now: Instant) -> Flow {
        if input.is_key(EMERGENCY_KEY) {
            log::warn!("emergency stop key pressed");
            return self.shutdown(true);
        }
        if let Some(id) = self.state.assigning.take() {
            self.assign(id, input);
            return Flow::Continue;
        }
        if let Some(id) = ChannelId::ALL
            .into_iter()
            .find(|id| self.channels[id.index()].trigger() == Some(&input))
        {
            self.toggle_channel(id, now);
        }
        Flow::Continue
    }

    fn assign(&mut self, id: ChannelId, input: TriggerInput) {
        let other = id.other();
        if input.is_key(CANCEL_KEY) {
            log::info!("trigger assignment for {id} cancelled");
        } else if self.channels[other.index()].trigger() == Some(&input) {
            self.warn(
                "Trigger in use",
                format!("{} already toggles the {other} channel", input.label()),
            );
        } else {
            log::info!("{id} trigger set to {}", input.label());
            self.channels[id.index()].set_trigger(Some(input));
        }
        self.announce_trigger(id);
    }

    fn announce_trigger(&self, id: ChannelId) {
        let label = self.channels[id.index()].trigger().map(TriggerInput::label);
        self.status.emit(StatusEvent::TriggerAssigned { channel: id, label });
    }

    fn set_mode(&mut self, id: ChannelId, name: &str) {
        if self.channels[id.index()].is_active() {
            self.warn("Channel running", format!("Stop the {id} channel before changing its mode"));
            return;
        }
        let engine = ClickModeEngine::from_name(name).unwrap_or_else(|err| {
            self.warn("Unknown mode", format!("{err}; the {id} channel falls back to Constant"));
            ClickModeEngine::new(ClickMode::Constant)
        });
        let mode = engine.mode();
        self.channels[id.index()].replace_engine(engine);
        self.status.emit(StatusEvent::ModeChanged { channel: id, mode });
    }

    /// One pass of the scheduling loop: serves every due channel, left first.
    pub fn step(&mut self, now: Instant) -> Step {
        if self.state.phase == Phase::Idle {
            return Step::Finished;
        }
        if self.state.stop_requested {
            log::info!("burst complete, stopping all channels");
            for ch in &mut self.channels {
                ch.deactivate();
            }
            self.recompute_global_status();
            self.finish_session();
            return Step::Finished;
        }

        let mut clicked = false;
        for id in ChannelId::ALL {
            if !self.channels[id.index()].is_due(now) {
                continue;
            }
            match self.channels[id.index()].tick(now) {
                ActionOutcome::Emit { offset_x, offset_y, rate, .. } => {
                    match self.inject(id, offset_x, offset_y) {
                        Ok(()) => {}
                        Err(InjectError::ShutDown) => {
                            log::debug!("click suppressed, shutdown in progress");
                            self.stop_all();
                            return Step::Finished;
                        }
                        Err(err) => {
                            self.fail(&err.to_string());
                            return Step::Finished;
                        }
                    }
                    self.state.total_clicks += 1;
                    self.status.emit(StatusEvent::RealtimeRate { rate, channel: id });
                    self.status.emit(StatusEvent::ClickCount(self.state.total_clicks));
                    clicked = true;
                }
                ActionOutcome::Deactivated { signal } => {
                    match signal {
                        Some(EngineSignal::CoordinatorStop) => self.state.stop_requested = true,
                        Some(EngineSignal::Fault(err)) => self.error("Pattern error", err.to_string()),
                        None => {}
                    }
                    self.recompute_global_status();
                }
            }
        }

        if !self.any_active() {
            self.finish_session();
            return Step::Finished;
        }
        if clicked {
            Step::Clicked
        } else {
            Step::Waiting(self.next_wait(now))
        }
    }

    /// Time until the earliest due channel, kept within [1 ms, 10 ms].
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.channels
            .iter()
            .filter(|ch| ch.is_active())
            .map(|ch| ch.next_due().saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_IDLE_WAIT)
            .clamp(MIN_IDLE_WAIT, MAX_IDLE_WAIT)
    }

    fn inject(&mut self, id: ChannelId, offset_x: f64, offset_y: f64) -> Result<(), InjectError> {
        let (x, y) = self.injector.cursor_position()?;
        let x = x + offset_x.round() as i32;
        let y = y + offset_y.round() as i32;
        self.injector.click(x, y, id.button())
    }

    fn stop_all(&mut self) {
        for ch in &mut self.channels {
            ch.deactivate();
        }
        self.recompute_global_status();
        self.finish_session();
    }

    /// A tick went wrong: everything stops, the session ends, the user is told.
    fn fail(&mut self, message: &str) {
        self.stop_all();
        self.error("Loop error", format!("Click loop stopped: {message}"));
    }

    fn finish_session(&mut self) {
        if self.state.phase == Phase::Active {
            log::info!("click loop finished after {} clicks", self.state.total_clicks);
        }
        self.state.phase = Phase::Idle;
        self.state.stop_requested = false;
        self.recompute_global_status();
    }

    fn shutdown(&mut self, emergency: bool) -> Flow {
        self.stop_all();
        self.state.assigning = None;
        self.status.emit(StatusEvent::Shutdown { emergency });
        log::info!("coordinator shut down (emergency: {emergency})");
        Flow::Exit
    }

    /// Thread body: waits for commands while idle, runs the loop while active.
    pub fn run(mut self, inbox: Receiver<Command>, waiter: Box<dyn WaitStrategy>) {
        log::info!("coordinator started");
        'outer: loop {
            if self.state.phase == Phase::Idle {
                match inbox.recv() {
                    Ok(cmd) => {
                        if self.handle(cmd, Instant::now()) == Flow::Exit {
                            break;
                        }
                    }
                    Err(_) => {
                        self.shutdown(false);
                        break;
                    }
                }
                continue;
            }

            let now = Instant::now();
            let step = match panic::catch_unwind(AssertUnwindSafe(|| self.step(now))) {
                Ok(step) => step,
                Err(payload) => {
                    self.fail(&panic_message(payload.as_ref()));
                    Step::Finished
                }
            };
            let wait = match step {
                Step::Clicked => CLICK_YIELD,
                Step::Waiting(wait) => wait,
                Step::Finished => continue,
            };

            match waiter.wait_until(Instant::now() + wait, &inbox) {
                Wake::Elapsed => {}
                Wake::Command(cmd) => {
                    if self.handle(cmd, Instant::now()) == Flow::Exit {
                        break;
                    }
                    for cmd in inbox.try_iter() {
                        if self.handle(cmd, Instant::now()) == Flow::Exit {
                            break 'outer;
                        }
                    }
                }
                Wake::Disconnected => {
                    self.shutdown(false);
                    break;
                }
            }
        }
        log::info!("coordinator stopped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owner-side handle to the coordinator thread.
pub struct ClickerHandle {
    inbox: Sender<Command>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClickerHandle {
    /// Starts the coordinator thread. The injector is built on that thread, so
    /// it does not have to be `Send`; it gets the liveness flag to refuse clicks
    /// once shutdown has begun.
    pub fn spawn<F>(
        make_injector: F,
        status: Box<dyn StatusSink>,
        settings: Box<dyn SettingsProvider>,
        waiter: Box<dyn WaitStrategy>,
    ) -> Result<Self, ClickerError>
    where
        F: FnOnce(Arc<AtomicBool>) -> Box<dyn InputSink> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = Arc::clone(&alive);

        let handle = thread::Builder::new()
            .name("click-coordinator".to_string())
            .spawn(move || {
                let injector = make_injector(Arc::clone(&alive_clone));
                Coordinator::new(injector, status, settings).run(rx, waiter);
                alive_clone.store(false, Ordering::Relaxed);
            })
            .map_err(ClickerError::Spawn)?;

        Ok(Self { inbox: tx, alive, handle: Some(handle) })
    }

    #[cfg_attr(not(feature = "hooks"), allow(dead_code))]
    pub fn sender(&self) -> Sender<Command> {
        self.inbox.clone()
    }

    pub fn send(&self, cmd: Command) {
        if self.inbox.send(cmd).is_err() {
            log::warn!("coordinator is gone, command dropped");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Stops all clicking and joins the coordinator thread.
    pub fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        let _ = self.inbox.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("coordinator thread panicked");
            }
        }
    }
}

impl Drop for ClickerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
