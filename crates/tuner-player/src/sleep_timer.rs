//! Sleep timer with a volume fade over the final window.
//!
//! Pure state; the caller supplies `now` and owns the scheduling (a deferred
//! stop at `ends_at` plus a periodic tick).  `generation` identifies the
//! timer those scheduled tasks belong to, so a late event from a cancelled
//! timer is recognisable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tuner_proto::protocol::SleepTimerInfo;

pub const DEFAULT_FADE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum TimerUpdate {
    Cancelled {
        restore_volume: Option<f32>,
    },
    Scheduled {
        generation: u64,
        ends_at: DateTime<Utc>,
        /// Delay until the deferred stop.
        delay: Duration,
        /// Set when a previous timer was fading.
        restore_volume: Option<f32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerTick {
    pub remaining: Duration,
    /// `MM:SS`, rounded up.
    pub display: String,
    /// Volume to apply while fading.
    pub volume: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expiry {
    /// Pre-fade volume, when a fade had started.
    pub restore_volume: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SleepTimer {
    fade_window_ms: i64,
    ends_at: Option<DateTime<Utc>>,
    /// Captured once, on the first tick inside the fade window.
    original_volume: Option<f32>,
    generation: u64,
}

impl Default for SleepTimer {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_WINDOW)
    }
}

impl SleepTimer {
    pub fn new(fade_window: Duration) -> Self {
        Self {
            fade_window_ms: fade_window.as_millis().min(i64::MAX as u128) as i64,
            ends_at: None,
            original_volume: None,
            generation: 0,
        }
    }

    /// `0` cancels.  Any other value replaces the running timer.
    pub fn set(&mut self, minutes: u32, now: DateTime<Utc>) -> TimerUpdate {
        let restore_volume = self.cancel();
        if minutes == 0 {
            return TimerUpdate::Cancelled { restore_volume };
        }

        let delay = Duration::from_secs(u64::from(minutes) * 60);
        let ends_at = now + chrono::Duration::minutes(i64::from(minutes));
        self.ends_at = Some(ends_at);
        TimerUpdate::Scheduled {
            generation: self.generation,
            ends_at,
            delay,
            restore_volume,
        }
    }

    pub fn tick(&mut self, now: DateTime<Utc>, current_volume: f32) -> Option<TimerTick> {
        let ends_at = self.ends_at?;
        let remaining_ms = (ends_at - now).num_milliseconds().max(0);

        let volume = if self.fade_window_ms > 0 && remaining_ms <= self.fade_window_ms {
            let original = *self.original_volume.get_or_insert(current_volume);
            let ratio = remaining_ms as f32 / self.fade_window_ms as f32;
            Some((original * ratio).max(0.0))
        } else {
            None
        };

        Some(TimerTick {
            remaining: Duration::from_millis(remaining_ms as u64),
            display: format_remaining(remaining_ms),
            volume,
        })
    }

    /// The deferred stop fired.  `None` when `generation` is not the running
    /// timer.
    pub fn expire(&mut self, generation: u64) -> Option<Expiry> {
        if generation != self.generation || self.ends_at.is_none() {
            return None;
        }
        let restore_volume = self.cancel();
        Some(Expiry { restore_volume })
    }

    /// Returns the volume to restore when a fade was in progress.
    pub fn cancel(&mut self) -> Option<f32> {
        self.generation += 1;
        self.ends_at = None;
        self.original_volume.take()
    }

    pub fn is_active(&self) -> bool {
        self.ends_at.is_some()
    }

    pub fn is_fading(&self) -> bool {
        self.original_volume.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.is_active() && generation == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn info(&self, now: DateTime<Utc>) -> Option<SleepTimerInfo> {
        let ends_at = self.ends_at?;
        let remaining_ms = (ends_at - now).num_milliseconds().max(0);
        Some(SleepTimerInfo {
            ends_at,
            remaining: Some(format_remaining(remaining_ms)),
            fading: self.is_fading(),
        })
    }
}

fn format_remaining(remaining_ms: i64) -> String {
    let secs = (remaining_ms.max(0) + 999) / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
