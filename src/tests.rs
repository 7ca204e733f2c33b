use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;

use crate::channel::{ChannelId, ClickButton, MouseTrigger, TriggerInput};
use crate::config::SharedSettings;
use crate::coordinator::{
    ClickerHandle, Command, Coordinator, Flow, RunStatus, StatusEvent, Step, MAX_IDLE_WAIT,
    MIN_IDLE_WAIT,
};
use crate::error::InjectError;
use crate::injector::InputSink;
use crate::params::{
    ClickMode, ClickParameters, RawSettings, KEY_BURST_DURATION, KEY_MODE, KEY_PATTERN,
    KEY_PEAK_RATE, KEY_SPATIAL_JITTER, KEY_TIMING_JITTER,
};
use crate::timing::SleepWait;

const CURSOR: (i32, i32) = (400, 300);

#[derive(Clone, Default)]
struct RecordingSink {
    clicks: Arc<Mutex<Vec<(i32, i32, ClickButton)>>>,
    broken: bool,
}

impl RecordingSink {
    fn clicks(&self) -> Vec<(i32, i32, ClickButton)> {
        self.clicks.lock().clone()
    }
}

impl InputSink for RecordingSink {
    fn cursor_position(&mut self) -> Result<(i32, i32), InjectError> {
        Ok(CURSOR)
    }

    fn click(&mut self, x: i32, y: i32, button: ClickButton) -> Result<(), InjectError> {
        if self.broken {
            return Err(InjectError::Backend("device unplugged".to_string()));
        }
        self.clicks.lock().push((x, y, button));
        Ok(())
    }
}

/// Panics on its first click, then records like [`RecordingSink`].
#[derive(Clone)]
struct FaultySink {
    inner: RecordingSink,
    armed: Arc<AtomicBool>,
}

impl InputSink for FaultySink {
    fn cursor_position(&mut self) -> Result<(i32, i32), InjectError> {
        self.inner.cursor_position()
    }

    fn click(&mut self, x: i32, y: i32, button: ClickButton) -> Result<(), InjectError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("driver fault");
        }
        self.inner.click(x, y, button)
    }
}

/// Defaults without any jitter.
fn steady(rate: f64) -> RawSettings {
    ClickParameters::defaults_as_raw()
        .with(KEY_PEAK_RATE, rate)
        .with(KEY_TIMING_JITTER, 0)
        .with(KEY_SPATIAL_JITTER, 0)
}

struct Rig {
    coord: Coordinator,
    events: Receiver<StatusEvent>,
    sink: RecordingSink,
    settings: SharedSettings,
}

impl Rig {
    fn with_sink(sink: RecordingSink) -> Self {
        let (tx, rx) = unbounded();
        let settings = SharedSettings::new(steady(10.0), steady(10.0));
        let mut coord = Coordinator::new(Box::new(sink.clone()), Box::new(tx), Box::new(settings.clone()));
        let now = Instant::now();
        coord.handle(Command::SetTrigger(ChannelId::Left, Some(TriggerInput::key("A"))), now);
        coord.handle(
            Command::SetTrigger(ChannelId::Right, Some(TriggerInput::Mouse(MouseTrigger::Middle))),
            now,
        );
        let rig = Self { coord, events: rx, sink, settings };
        rig.drain();
        rig
    }

    fn new() -> Self {
        Self::with_sink(RecordingSink::default())
    }

    fn drain(&self) -> Vec<StatusEvent> {
        self.events.try_iter().collect()
    }

    fn toggle(&mut self, id: ChannelId, now: Instant) {
        self.coord.handle(Command::Toggle(id), now);
    }
}

fn statuses(events: &[StatusEvent]) -> Vec<RunStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::StatusChanged { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

fn warnings(events: &[StatusEvent]) -> usize {
    events.iter().filter(|e| matches!(e, StatusEvent::Warning { .. })).count()
}

#[test]
fn test_toggle_without_trigger_warns_once() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.coord.handle(Command::SetTrigger(ChannelId::Left, None), now);
    rig.drain();

    rig.toggle(ChannelId::Left, now);
    let events = rig.drain();
    assert!(!rig.coord.channel(ChannelId::Left).is_active());
    assert_eq!(events.len(), 1);
    assert_eq!(warnings(&events), 1);
    assert_eq!(rig.coord.status(), RunStatus::Idle);
}

#[test]
fn test_both_active_status() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.toggle(ChannelId::Right, now);

    let events = rig.drain();
    assert_eq!(
        statuses(&events),
        vec![RunStatus::Active(ChannelId::Left), RunStatus::BothActive]
    );
    assert_eq!(rig.coord.status().to_string(), "Both active");
    // the counter resets once, when the loop starts
    let resets = events.iter().filter(|e| **e == StatusEvent::ClickCount(0)).count();
    assert_eq!(resets, 1);
}

#[test]
fn test_one_channel_off_keeps_the_other() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.toggle(ChannelId::Right, now);
    rig.drain();

    rig.toggle(ChannelId::Left, now);
    let events = rig.drain();
    assert_eq!(statuses(&events), vec![RunStatus::Active(ChannelId::Right)]);
    assert_eq!(rig.coord.status().to_string(), "Right active");
    assert!(rig.coord.is_running());
}

#[test]
fn test_constant_end_to_end() {
    let mut rig = Rig::new();
    let start = Instant::now();
    rig.toggle(ChannelId::Left, start);
    rig.drain();

    assert_eq!(rig.coord.step(start), Step::Clicked);
    assert_eq!(rig.sink.clicks(), vec![(CURSOR.0, CURSOR.1, ClickButton::Primary)]);
    let due = rig.coord.channel(ChannelId::Left).next_due() - start;
    assert!((due.as_secs_f64() - 0.1).abs() < 1e-6);

    let events = rig.drain();
    assert!(events.contains(&StatusEvent::RealtimeRate { rate: 10.0, channel: ChannelId::Left }));
    assert!(events.contains(&StatusEvent::ClickCount(1)));

    match rig.coord.step(start + Duration::from_millis(50)) {
        Step::Waiting(wait) => assert!(wait >= MIN_IDLE_WAIT && wait <= MAX_IDLE_WAIT),
        other => panic!("expected a wait, got {other:?}"),
    }
    assert_eq!(rig.coord.step(start + Duration::from_millis(101)), Step::Clicked);
    assert_eq!(rig.coord.total_clicks(), 2);
}

#[test]
fn test_left_is_served_first() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Right, now);
    rig.toggle(ChannelId::Left, now);

    assert_eq!(rig.coord.step(now), Step::Clicked);
    let buttons: Vec<_> = rig.sink.clicks().into_iter().map(|c| c.2).collect();
    assert_eq!(buttons, vec![ClickButton::Primary, ClickButton::Secondary]);
}

#[test]
fn test_next_wait_is_clamped() {
    let mut rig = Rig::new();
    rig.settings.update(ChannelId::Left, steady(1.0));
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.coord.step(now);

    assert_eq!(rig.coord.next_wait(now), MAX_IDLE_WAIT);
    let due = rig.coord.channel(ChannelId::Left).next_due();
    assert_eq!(rig.coord.next_wait(due), MIN_IDLE_WAIT);
}

#[test]
fn test_deactivate_twice_emits_once() {
    let mut rig = Rig::new();
    rig.toggle(ChannelId::Left, Instant::now());
    rig.drain();

    rig.coord.deactivate_channel(ChannelId::Left);
    rig.coord.deactivate_channel(ChannelId::Left);
    assert_eq!(statuses(&rig.drain()), vec![RunStatus::Stopped]);
}

#[test]
fn test_loop_ends_when_last_channel_stops() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.coord.step(now);
    rig.toggle(ChannelId::Left, now);

    assert_eq!(rig.coord.step(now), Step::Finished);
    assert!(!rig.coord.is_running());
    let events = rig.drain();
    let seen = statuses(&events);
    assert_eq!(seen[seen.len() - 2..], [RunStatus::Stopped, RunStatus::Idle]);
}

#[test]
fn test_burst_end_stops_everything() {
    let mut rig = Rig::new();
    rig.settings.update(
        ChannelId::Left,
        steady(10.0).with(KEY_MODE, "burst").with(KEY_BURST_DURATION, 0.5),
    );
    let start = Instant::now();
    rig.toggle(ChannelId::Left, start);
    rig.toggle(ChannelId::Right, start);
    assert_eq!(rig.coord.step(start), Step::Clicked);
    rig.drain();

    // the burst channel is next due after its ramp-floor delay, past the window
    let late = start + Duration::from_millis(1001);
    assert_eq!(rig.coord.step(late), Step::Clicked);
    assert!(!rig.coord.channel(ChannelId::Left).is_active());
    assert!(rig.coord.channel(ChannelId::Right).is_active());

    assert_eq!(rig.coord.step(late), Step::Finished);
    assert!(!rig.coord.channel(ChannelId::Right).is_active());
    assert_eq!(
        statuses(&rig.drain()),
        vec![RunStatus::Active(ChannelId::Right), RunStatus::Stopped, RunStatus::Idle]
    );
}

#[test]
fn test_invalid_pattern_reports_error() {
    let mut rig = Rig::new();
    rig.settings.update(ChannelId::Left, steady(10.0).with(KEY_MODE, "pattern").with(KEY_PATTERN, "abc-def"));
    rig.toggle(ChannelId::Left, Instant::now());

    let events = rig.drain();
    assert!(!rig.coord.channel(ChannelId::Left).is_active());
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StatusEvent::Error { title, .. } if title == "Invalid Left settings"));
}

#[test]
fn test_unknown_mode_falls_back_to_constant() {
    let mut rig = Rig::new();
    rig.settings.update(ChannelId::Right, steady(10.0).with(KEY_MODE, "warp"));
    rig.toggle(ChannelId::Right, Instant::now());

    let events = rig.drain();
    assert_eq!(warnings(&events), 1);
    let right = rig.coord.channel(ChannelId::Right);
    assert!(right.is_active());
    assert_eq!(right.engine().mode(), ClickMode::Constant);
}

#[test]
fn test_injection_failure_stops_loop() {
    let mut rig = Rig::with_sink(RecordingSink { broken: true, ..Default::default() });
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.toggle(ChannelId::Right, now);

    assert_eq!(rig.coord.step(now), Step::Finished);
    assert!(ChannelId::ALL.iter().all(|id| !rig.coord.channel(*id).is_active()));
    assert_eq!(rig.coord.status(), RunStatus::Idle);

    let events = rig.drain();
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StatusEvent::Error { title, .. } if title == "Loop error"))
        .collect();
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_trigger_assignment() {
    let mut rig = Rig::new();
    let now = Instant::now();

    rig.coord.handle(Command::BeginAssign(ChannelId::Left), now);
    rig.coord.handle(Command::Input(TriggerInput::key("KeyZ")), now);
    assert_eq!(
        rig.drain(),
        vec![
            StatusEvent::AssignPrompt { channel: ChannelId::Left },
            StatusEvent::TriggerAssigned { channel: ChannelId::Left, label: Some("Z".to_string()) },
        ]
    );

    // escape cancels and keeps the binding
    rig.coord.handle(Command::BeginAssign(ChannelId::Left), now);
    rig.coord.handle(Command::Input(TriggerInput::key("Escape")), now);
    assert_eq!(rig.coord.channel(ChannelId::Left).trigger(), Some(&TriggerInput::key("Z")));
    assert_eq!(rig.coord.assigning(), None);

    // the right channel's button is refused
    rig.drain();
    rig.coord.handle(Command::BeginAssign(ChannelId::Left), now);
    rig.coord.handle(Command::Input(TriggerInput::Mouse(MouseTrigger::Middle)), now);
    let events = rig.drain();
    assert_eq!(warnings(&events), 1);
    assert_eq!(rig.coord.channel(ChannelId::Left).trigger(), Some(&TriggerInput::key("Z")));
}

#[test]
fn test_trigger_input_toggles_channel() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.coord.handle(Command::Input(TriggerInput::key("a")), now);
    assert!(rig.coord.channel(ChannelId::Left).is_active());

    rig.coord.handle(Command::Input(TriggerInput::Mouse(MouseTrigger::Middle)), now);
    assert_eq!(rig.coord.status(), RunStatus::BothActive);

    rig.coord.handle(Command::Input(TriggerInput::key("B")), now);
    assert_eq!(rig.coord.status(), RunStatus::BothActive);

    rig.coord.handle(Command::Input(TriggerInput::key("A")), now);
    assert_eq!(rig.coord.status(), RunStatus::Active(ChannelId::Right));
}

#[test]
fn test_emergency_key() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.toggle(ChannelId::Right, now);

    let flow = rig.coord.handle(Command::Input(TriggerInput::key("F12")), now);
    assert_eq!(flow, Flow::Exit);
    assert!(ChannelId::ALL.iter().all(|id| !rig.coord.channel(*id).is_active()));
    let events = rig.drain();
    assert_eq!(events.last(), Some(&StatusEvent::Shutdown { emergency: true }));
}

#[test]
fn test_emergency_key_is_never_assigned() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.coord.handle(Command::BeginAssign(ChannelId::Right), now);
    let flow = rig.coord.handle(Command::Input(TriggerInput::key("F12")), now);
    assert_eq!(flow, Flow::Exit);
    assert_eq!(
        rig.coord.channel(ChannelId::Right).trigger(),
        Some(&TriggerInput::Mouse(MouseTrigger::Middle))
    );
}

#[test]
fn test_click_count_resets_per_session() {
    let mut rig = Rig::new();
    let now = Instant::now();
    rig.toggle(ChannelId::Left, now);
    rig.coord.step(now);
    assert_eq!(rig.coord.total_clicks(), 1);
    rig.toggle(ChannelId::Left, now);
    rig.coord.step(now);
    rig.drain();

    rig.toggle(ChannelId::Left, now);
    assert_eq!(rig.coord.total_clicks(), 0);
    assert!(rig.drain().contains(&StatusEvent::ClickCount(0)));
}

#[test]
fn test_set_mode() {
    let mut rig = Rig::new();
    let now = Instant::now();

    rig.coord.handle(Command::SetMode(ChannelId::Left, "sine".to_string()), now);
    assert_eq!(
        rig.drain(),
        vec![StatusEvent::ModeChanged { channel: ChannelId::Left, mode: ClickMode::SineWave }]
    );
    assert_eq!(rig.coord.channel(ChannelId::Left).engine().mode(), ClickMode::SineWave);

    rig.coord.handle(Command::SetMode(ChannelId::Right, "bogus".to_string()), now);
    let events = rig.drain();
    assert_eq!(warnings(&events), 1);
    assert!(events.contains(&StatusEvent::ModeChanged { channel: ChannelId::Right, mode: ClickMode::Constant }));

    rig.toggle(ChannelId::Right, now);
    rig.drain();
    rig.coord.handle(Command::SetMode(ChannelId::Right, "pattern".to_string()), now);
    assert_eq!(warnings(&rig.drain()), 1);
    assert_eq!(rig.coord.channel(ChannelId::Right).engine().mode(), ClickMode::Constant);
}

fn wait_for(events: &Receiver<StatusEvent>, wanted: &StatusEvent) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if &event == wanted => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

/// Everything received up to and including the first event matching `done`.
fn collect_until(
    events: &Receiver<StatusEvent>,
    done: impl Fn(&StatusEvent) -> bool,
) -> Option<Vec<StatusEvent>> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        let event = events.recv_timeout(left).ok()?;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return Some(seen);
        }
    }
    None
}

fn is_loop_error(event: &StatusEvent) -> bool {
    matches!(event, StatusEvent::Error { title, .. } if title == "Loop error")
}

#[test]
fn test_threaded_session() {
    let sink = RecordingSink::default();
    let (tx, rx) = unbounded();
    let settings = SharedSettings::new(steady(40.0), steady(40.0));
    let recorder = sink.clone();
    let mut handle = ClickerHandle::spawn(
        move |_alive| Box::new(recorder) as Box<dyn InputSink>,
        Box::new(tx),
        Box::new(settings),
        Box::new(SleepWait),
    )
    .unwrap();

    handle.send(Command::SetTrigger(ChannelId::Left, Some(TriggerInput::key("A"))));
    handle.send(Command::Toggle(ChannelId::Left));
    std::thread::sleep(Duration::from_millis(200));
    handle.send(Command::Toggle(ChannelId::Left));
    assert!(wait_for(&rx, &StatusEvent::StatusChanged { status: RunStatus::Idle, active: false }));

    let clicks = sink.clicks().len();
    assert!(clicks >= 2, "only {clicks} clicks");
    assert!(handle.is_alive());

    handle.shutdown();
    assert!(!handle.is_alive());
    assert!(wait_for(&rx, &StatusEvent::Shutdown { emergency: false }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.clicks().len(), clicks);
}

#[test]
fn test_emergency_stop_ends_thread() {
    let (tx, rx) = unbounded();
    let mut handle = ClickerHandle::spawn(
        |_alive| Box::new(RecordingSink::default()) as Box<dyn InputSink>,
        Box::new(tx),
        Box::new(SharedSettings::default()),
        Box::new(SleepWait),
    )
    .unwrap();

    handle.send(Command::Input(TriggerInput::key("F12")));
    assert!(wait_for(&rx, &StatusEvent::Shutdown { emergency: true }));
    handle.shutdown();
    assert!(!handle.is_alive());
}

#[test]
fn test_panicking_click_is_reported_once() {
    let sink = FaultySink { inner: RecordingSink::default(), armed: Arc::new(AtomicBool::new(true)) };
    let recorder = sink.inner.clone();
    let (tx, rx) = unbounded();
    let mut handle = ClickerHandle::spawn(
        move |_alive| Box::new(sink) as Box<dyn InputSink>,
        Box::new(tx),
        Box::new(SharedSettings::new(steady(40.0), steady(40.0))),
        Box::new(SleepWait),
    )
    .unwrap();

    handle.send(Command::SetTrigger(ChannelId::Left, Some(TriggerInput::key("A"))));
    handle.send(Command::Toggle(ChannelId::Left));
    let mut events = collect_until(&rx, is_loop_error).expect("no loop error reported");
    std::thread::sleep(Duration::from_millis(100));
    events.extend(rx.try_iter());

    assert_eq!(events.iter().filter(|e| is_loop_error(e)).count(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        StatusEvent::Error { message, .. } if message.contains("driver fault")
    )));
    assert_eq!(statuses(&events).last(), Some(&RunStatus::Idle));
    assert!(recorder.clicks().is_empty());
    assert!(handle.is_alive());

    // the thread keeps serving commands after the failed session
    handle.send(Command::Toggle(ChannelId::Left));
    std::thread::sleep(Duration::from_millis(200));
    handle.send(Command::Toggle(ChannelId::Left));
    let events = collect_until(&rx, |e| {
        *e == StatusEvent::StatusChanged { status: RunStatus::Idle, active: false }
    })
    .expect("second session never finished");
    assert!(!events.iter().any(is_loop_error));
    assert!(!recorder.clicks().is_empty());

    handle.shutdown();
    assert!(!handle.is_alive());
}
