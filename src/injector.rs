use std::sync::{atomic::{AtomicBool, Ordering}, Arc};

use enigo::{MouseButton, MouseControllable};

use crate::channel::ClickButton;
use crate::error::InjectError;

/// Where clicks go. Implementations run on the coordinator thread only.
pub trait InputSink {
    fn cursor_position(&mut self) -> Result<(i32, i32), InjectError>;
    fn click(&mut self, x: i32, y: i32, button: ClickButton) -> Result<(), InjectError>;
}

impl ClickButton {
    fn to_enigo(self) -> MouseButton {
        match self {
            ClickButton::Primary => MouseButton::Left,
            ClickButton::Secondary => MouseButton::Right,
        }
    }
}

/// OS click injection through enigo. Refuses to click once `alive` drops.
pub struct EnigoSink {
    enigo: enigo::Enigo,
    alive: Arc<AtomicBool>,
}

impl EnigoSink {
    pub fn new(alive: Arc<AtomicBool>) -> Self {
        Self { enigo: enigo::Enigo::new(), alive }
    }
}

impl InputSink for EnigoSink {
    fn cursor_position(&mut self) -> Result<(i32, i32), InjectError> {
        Ok(self.enigo.mouse_location())
    }

    fn click(&mut self, x: i32, y: i32, button: ClickButton) -> Result<(), InjectError> {
        if !self.alive.load(Ordering::Relaxed) {
            return Err(InjectError::ShutDown);
        }
        self.enigo.mouse_move_to(x, y);
        self.enigo.mouse_click(button.to_enigo());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_mapping() {
        assert!(matches!(ClickButton::Primary.to_enigo(), MouseButton::Left));
        assert!(matches!(ClickButton::Secondary.to_enigo(), MouseButton::Right));
    }
}
