//! How the scheduling loop waits between due-checks.
//!
//! The wait doubles as the coordinator's inbox read, so a stop or toggle posted
//! while the loop waits is picked up as soon as it arrives.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::coordinator::Command;

pub enum Wake {
    Elapsed,
    Command(Command),
    Disconnected,
}

pub trait WaitStrategy: Send {
    fn wait_until(&self, deadline: Instant, inbox: &Receiver<Command>) -> Wake;
}

/// Blocks on the inbox until the deadline. Cheap on CPU, accurate to the OS
/// timer granularity.
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepWait;

impl WaitStrategy for SleepWait {
    fn wait_until(&self, deadline: Instant, inbox: &Receiver<Command>) -> Wake {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match inbox.recv_timeout(timeout) {
            Ok(cmd) => Wake::Command(cmd),
            Err(RecvTimeoutError::Timeout) => Wake::Elapsed,
            Err(RecvTimeoutError::Disconnected) => Wake::Disconnected,
        }
    }
}

/// Sleeps until `margin` before the deadline, then spins on the clock.
/// Sub-millisecond accuracy at the cost of one busy core during the margin.
#[derive(Clone, Copy, Debug)]
pub struct SpinWait {
    margin: Duration,
}

impl SpinWait {
    pub fn new(margin: Duration) -> Self {
        Self { margin }
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new(Duration::from_millis(2))
    }
}

impl WaitStrategy for SpinWait {
    fn wait_until(&self, deadline: Instant, inbox: &Receiver<Command>) -> Wake {
        let coarse = deadline.checked_sub(self.margin).unwrap_or(deadline);
        let now = Instant::now();
        if coarse > now {
            match inbox.recv_timeout(coarse - now) {
                Ok(cmd) => return Wake::Command(cmd),
                Err(RecvTimeoutError::Disconnected) => return Wake::Disconnected,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        loop {
            match inbox.try_recv() {
                Ok(cmd) => return Wake::Command(cmd),
                Err(TryRecvError::Disconnected) => return Wake::Disconnected,
                Err(TryRecvError::Empty) => {}
            }
            if Instant::now() >= deadline {
                return Wake::Elapsed;
            }
            std::hint::spin_loop();
        }
    }
}
