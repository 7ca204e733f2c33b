use std::time::Duration;

use crossbeam_channel::Receiver;
use eframe::egui::{self, Color32};

use crate::channel::ChannelId;
use crate::config::SharedSettings;
use crate::coordinator::{ClickerHandle, Command, RunStatus, StatusEvent};
use crate::params::{
    ClickMode, ClickParameters, RawSettings, KEY_BURST_DURATION, KEY_MAX_RATE, KEY_MIN_RATE,
    KEY_MODE, KEY_PATTERN, KEY_PEAK_RATE, KEY_SPATIAL_JITTER, KEY_TIMING_JITTER, MAX_BURST_SECS,
    MAX_RATE, MAX_SPATIAL_JITTER_PX, MAX_TIMING_JITTER_MS,
};

const MAX_NOTICES: usize = 4;

pub const CONFIG_TRIGGER_HINT: &str =
    "Built without global hooks: triggers can only be set with --config, e.g. [left] trigger = \"q\".";

/// Where triggers come from when they cannot be assigned in the window.
pub fn trigger_hint() -> Option<&'static str> {
    (!cfg!(feature = "hooks")).then_some(CONFIG_TRIGGER_HINT)
}

// -------------- Channel form --------------
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelForm {
    pub mode: ClickMode,
    pub peak_rate: f64,
    pub timing_jitter_ms: u32,
    pub spatial_jitter_px: u32,
    pub burst_duration_secs: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub pattern: String,
}

impl Default for ChannelForm {
    fn default() -> Self {
        Self::from_params(&ClickParameters::default())
    }
}

impl ChannelForm {
    fn from_params(p: &ClickParameters) -> Self {
        Self {
            mode: p.mode,
            peak_rate: p.peak_rate,
            timing_jitter_ms: p.timing_jitter_ms,
            spatial_jitter_px: p.spatial_jitter_px,
            burst_duration_secs: p.burst_duration_secs,
            min_rate: p.min_rate,
            max_rate: p.max_rate,
            pattern: p.pattern.clone(),
        }
    }

    /// Fills the form from raw settings; unreadable values keep the defaults.
    pub fn from_raw(raw: &RawSettings) -> Self {
        let mut form = Self::default();
        form.mode = raw.mode_name().parse().unwrap_or_default();
        let num = |key: &str, fallback: f64| {
            raw.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(fallback)
        };
        form.peak_rate = num(KEY_PEAK_RATE, form.peak_rate);
        form.burst_duration_secs = num(KEY_BURST_DURATION, form.burst_duration_secs);
        form.min_rate = num(KEY_MIN_RATE, form.min_rate);
        form.max_rate = num(KEY_MAX_RATE, form.max_rate);
        let int = |key: &str, fallback: u32| {
            raw.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(fallback)
        };
        form.timing_jitter_ms = int(KEY_TIMING_JITTER, form.timing_jitter_ms);
        form.spatial_jitter_px = int(KEY_SPATIAL_JITTER, form.spatial_jitter_px);
        if let Some(pattern) = raw.get(KEY_PATTERN) {
            form.pattern = pattern.to_string();
        }
        form
    }

    pub fn to_raw(&self) -> RawSettings {
        RawSettings::new()
            .with(KEY_MODE, self.mode.name())
            .with(KEY_PEAK_RATE, self.peak_rate)
            .with(KEY_TIMING_JITTER, self.timing_jitter_ms)
            .with(KEY_SPATIAL_JITTER, self.spatial_jitter_px)
            .with(KEY_BURST_DURATION, self.burst_duration_secs)
            .with(KEY_MIN_RATE, self.min_rate)
            .with(KEY_MAX_RATE, self.max_rate)
            .with(KEY_PATTERN, &self.pattern)
    }

    /// Draws the controls. Returns `true` when the mode was changed.
    fn show(&mut self, ui: &mut egui::Ui, id: ChannelId) -> bool {
        let before = self.mode;
        egui::ComboBox::from_id_source(("mode", id.index()))
            .selected_text(self.mode.to_string())
            .show_ui(ui, |ui| {
                for mode in ClickMode::ALL {
                    ui.selectable_value(&mut self.mode, mode, mode.to_string());
                }
            });

        ui.horizontal(|ui| {
            ui.label(self.mode.rate_label());
            ui.add(egui::Slider::new(&mut self.peak_rate, 0.1..=MAX_RATE).logarithmic(true));
        });
        ui.horizontal(|ui| {
            ui.label("Timing jitter (ms):");
            ui.add(egui::DragValue::new(&mut self.timing_jitter_ms).clamp_range(0..=MAX_TIMING_JITTER_MS));
            ui.label("Spatial jitter (px):");
            ui.add(egui::DragValue::new(&mut self.spatial_jitter_px).clamp_range(0..=MAX_SPATIAL_JITTER_PX));
        });

        match self.mode {
            ClickMode::Burst => {
                ui.horizontal(|ui| {
                    ui.label("Burst duration (s):");
                    ui.add(
                        egui::DragValue::new(&mut self.burst_duration_secs)
                            .clamp_range(0.1..=MAX_BURST_SECS)
                            .speed(0.1),
                    );
                });
            }
            ClickMode::RandomRange => {
                ui.horizontal(|ui| {
                    ui.label("Rate range (CPS):");
                    ui.add(egui::DragValue::new(&mut self.min_rate).clamp_range(0.1..=MAX_RATE).speed(0.1));
                    ui.label("to");
                    ui.add(egui::DragValue::new(&mut self.max_rate).clamp_range(0.1..=MAX_RATE).speed(0.1));
                });
            }
            ClickMode::Pattern => {
                ui.horizontal(|ui| {
                    ui.label("Delays (ms):");
                    ui.text_edit_singleline(&mut self.pattern);
                });
            }
            ClickMode::Constant | ClickMode::SineWave | ClickMode::OrganicNoise => {}
        }
        self.mode != before
    }
}

// -------------- UI State --------------
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub error: bool,
    pub title: String,
    pub message: String,
}

/// Window-side view of the coordinator, rebuilt from status events.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusView {
    pub status: RunStatus,
    pub clicks: u64,
    pub rates: [Option<f64>; 2],
    pub triggers: [Option<String>; 2],
    pub assigning: Option<ChannelId>,
    pub notices: Vec<Notice>,
    pub modes: [Option<ClickMode>; 2],
    pub closed: bool,
}

impl Default for StatusView {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            clicks: 0,
            rates: [None, None],
            triggers: [None, None],
            assigning: None,
            notices: Vec::new(),
            modes: [None, None],
            closed: false,
        }
    }
}

impl StatusView {
    pub fn is_active(&self, id: ChannelId) -> bool {
        match self.status {
            RunStatus::BothActive => true,
            RunStatus::Active(active) => active == id,
            RunStatus::Idle | RunStatus::Stopped => false,
        }
    }

    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::StatusChanged { status, .. } => {
                self.status = status;
                for id in ChannelId::ALL {
                    if !self.is_active(id) {
                        self.rates[id.index()] = None;
                    }
                }
            }
            StatusEvent::RealtimeRate { rate, channel } => self.rates[channel.index()] = Some(rate),
            StatusEvent::ClickCount(count) => self.clicks = count,
            StatusEvent::Error { title, message } => self.notice(true, title, message),
            StatusEvent::Warning { title, message } => self.notice(false, title, message),
            StatusEvent::AssignPrompt { channel } => self.assigning = Some(channel),
            StatusEvent::TriggerAssigned { channel, label } => {
                self.assigning = None;
                self.triggers[channel.index()] = label;
            }
            StatusEvent::ModeChanged { channel, mode } => self.modes[channel.index()] = Some(mode),
            StatusEvent::Shutdown { .. } => self.closed = true,
        }
    }

    fn notice(&mut self, error: bool, title: String, message: String) {
        self.notices.push(Notice { error, title, message });
        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }
}

pub struct ClickerApp {
    handle: ClickerHandle,
    events: Receiver<StatusEvent>,
    settings: SharedSettings,
    forms: [ChannelForm; 2],
    view: StatusView,
}

impl ClickerApp {
    pub fn new(handle: ClickerHandle, events: Receiver<StatusEvent>, settings: SharedSettings) -> Self {
        let forms = [
            ChannelForm::from_raw(&settings.snapshot(ChannelId::Left)),
            ChannelForm::from_raw(&settings.snapshot(ChannelId::Right)),
        ];
        Self { handle, events, settings, forms, view: StatusView::default() }
    }

    fn drain_events(&mut self, ctx: &egui::Context) {
        for event in self.events.try_iter() {
            if let StatusEvent::ModeChanged { channel, mode } = &event {
                self.forms[channel.index()].mode = *mode;
            }
            self.view.apply(event);
        }
        if self.view.closed || !self.handle.is_alive() {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn channel_panel(&mut self, ui: &mut egui::Ui, id: ChannelId) {
        let active = self.view.is_active(id);
        ui.group(|ui| {
            ui.vertical(|ui| {
                ui.heading(format!("{id} click"));

                let form = &mut self.forms[id.index()];
                let before = form.clone();
                let mode_changed = ui.add_enabled_ui(!active, |ui| form.show(ui, id)).inner;
                if *form != before {
                    self.settings.update(id, form.to_raw());
                }
                if mode_changed {
                    self.handle.send(Command::SetMode(id, form.mode.name().to_string()));
                }

                ui.horizontal(|ui| {
                    let trigger = self.view.triggers[id.index()].as_deref().unwrap_or("none");
                    ui.label(format!("Trigger: {trigger}"));
                    let assign_label = if self.view.assigning == Some(id) { "Press a key…" } else { "Assign" };
                    let can_assign = trigger_hint().is_none() && !active;
                    let assign = ui
                        .add_enabled(can_assign, egui::Button::new(assign_label))
                        .on_disabled_hover_text(trigger_hint().unwrap_or("Stop the channel first"));
                    if assign.clicked() {
                        self.handle.send(Command::BeginAssign(id));
                    }
                });

                ui.horizontal(|ui| {
                    let label = if active { "Stop" } else { "Start" };
                    if ui.button(label).clicked() {
                        self.handle.send(Command::Toggle(id));
                    }
                    match self.view.rates[id.index()] {
                        Some(rate) => ui.monospace(format!("{rate:.1} CPS")),
                        None => ui.monospace("-"),
                    };
                });
            });
        });
    }
}

impl eframe::App for ClickerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events(ctx);

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Twin Clicker");
                ui.separator();
                let color = if self.view.status.is_active() { Color32::LIGHT_GREEN } else { Color32::GRAY };
                ui.colored_label(color, format!("Status: {}", self.view.status));
                ui.separator();
                ui.label(format!("Clicks: {}", self.view.clicks));
                ui.separator();
                if ui.button("Emergency stop").clicked() {
                    self.handle.send(Command::EmergencyStop);
                }
            });
        });

        egui::TopBottomPanel::bottom("notices").show(ctx, |ui| {
            ui.small("F12 stops everything and closes the clicker.");
            if let Some(hint) = trigger_hint() {
                ui.colored_label(Color32::YELLOW, hint);
            }
            for notice in &self.view.notices {
                let color = if notice.error { Color32::LIGHT_RED } else { Color32::YELLOW };
                ui.colored_label(color, format!("{}: {}", notice.title, notice.message));
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                self.channel_panel(ui, ChannelId::Left);
                ui.separator();
                self.channel_panel(ui, ChannelId::Right);
            });
        });

        // keep draining status events while the window is idle
        ctx.request_repaint_after(Duration::from_millis(50));
    }
}

pub fn run(handle: ClickerHandle, events: Receiver<StatusEvent>, settings: SharedSettings) -> eframe::Result<()> {
    let mut opts = eframe::NativeOptions::default();
    opts.viewport.inner_size = Some(egui::vec2(760.0, 360.0));
    opts.viewport.resizable = Some(true);
    opts.follow_system_theme = true;

    eframe::run_native(
        "Twin Clicker",
        opts,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Box::new(ClickerApp::new(handle, events, settings))
        }),
    )
}
