//! Global keyboard and mouse hook (`hooks` feature).

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use rdev::{Button, Event, EventType, Key};

use crate::channel::{MouseTrigger, TriggerInput, EMERGENCY_KEY};
use crate::coordinator::Command;
use crate::error::{ClickerError, Result};

pub fn key_input(key: Key) -> TriggerInput {
    TriggerInput::key(&format!("{key:?}"))
}

pub fn button_input(button: Button) -> TriggerInput {
    TriggerInput::Mouse(match button {
        Button::Left => MouseTrigger::Left,
        Button::Right => MouseTrigger::Right,
        Button::Middle => MouseTrigger::Middle,
        Button::Unknown(n) => MouseTrigger::Other(n),
    })
}

fn translate(event: &Event) -> Option<TriggerInput> {
    match event.event_type {
        EventType::KeyPress(key) => Some(key_input(key)),
        EventType::ButtonPress(button) => Some(button_input(button)),
        _ => None,
    }
}

/// F12 stops everything; any other press goes to the coordinator as input.
pub fn command_for(input: TriggerInput) -> Command {
    if input.is_key(EMERGENCY_KEY) {
        Command::EmergencyStop
    } else {
        Command::Input(input)
    }
}

/// Forwards every key and button press to the coordinator.
/// When the hook cannot be installed and `exit_on_failure` is set, the
/// coordinator is told to shut down.
pub fn spawn_listener(inbox: Sender<Command>, exit_on_failure: bool) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("input-listener".to_string())
        .spawn(move || {
            let events = inbox.clone();
            let callback = move |event: Event| {
                if let Some(input) = translate(&event) {
                    log::debug!("input {}", input.label());
                    // coordinator gone; nothing left to notify
                    let _ = events.send(command_for(input));
                }
            };
            if let Err(err) = rdev::listen(callback) {
                let err = ClickerError::Listener(format!("{err:?}"));
                log::error!("{err}");
                if exit_on_failure {
                    let _ = inbox.send(Command::Shutdown);
                }
            }
        })
        .map_err(ClickerError::Spawn)
}
