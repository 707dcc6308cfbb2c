use chrono::{DateTime, Local, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    /// The user toggled the timer off.
    Manual,
    /// The target process disappeared; the session was finalized on the spot.
    TargetExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused { cause: PauseCause },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First start of the session, manual or automatic.
    Started,
    /// Continued after a manual pause with the accumulated time intact.
    Resumed,
    /// New session begun from a finalized one; elapsed time was reset.
    Restarted,
    Paused(PauseCause),
}

/// Idle -> Running -> Paused -> Running ... for one tracking session.
///
/// Time is always passed in as wall-clock seconds so the arithmetic can be
/// driven deterministically. `elapsed` never decreases within a session.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    phase: Phase,
    session_start: Option<f64>,
    interval_start: f64,
    elapsed: f64,
    finalized: bool,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTimer {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            session_start: None,
            interval_start: 0.0,
            elapsed: 0.0,
            finalized: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn has_started(&self) -> bool {
        self.session_start.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Wall-clock time the session first started.
    pub fn session_start(&self) -> Option<f64> {
        self.session_start
    }

    /// Authoritative accumulated time as of the last state change or refresh.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed
    }

    /// Elapsed time as it should be shown at `now`. Does not touch state.
    pub fn display_elapsed(&self, now: f64) -> f64 {
        match self.phase {
            Phase::Running => self.elapsed.max(now - self.interval_start),
            Phase::Idle | Phase::Paused { .. } => self.elapsed,
        }
    }

    /// Fast tick: folds the running interval into `elapsed`. Never changes phase.
    pub fn refresh(&mut self, now: f64) -> f64 {
        self.elapsed = self.display_elapsed(now);
        self.elapsed
    }

    /// A finalized session is never continued: its time is already recorded,
    /// so resuming from it starts a new one.
    pub fn resume(&mut self, now: f64) -> Option<Transition> {
        let closed = self.finalized
            || matches!(
                self.phase,
                Phase::Paused {
                    cause: PauseCause::TargetExited
                }
            );
        let transition = match self.phase {
            Phase::Running => return None,
            Phase::Idle if !self.has_started() => {
                self.session_start = Some(now);
                self.elapsed = 0.0;
                Transition::Started
            }
            Phase::Idle | Phase::Paused { .. } if closed => {
                self.session_start = Some(now);
                self.elapsed = 0.0;
                self.finalized = false;
                Transition::Restarted
            }
            Phase::Idle | Phase::Paused { .. } => Transition::Resumed,
        };
        self.interval_start = now - self.elapsed;
        self.phase = Phase::Running;
        Some(transition)
    }

    pub fn pause(&mut self, now: f64, cause: PauseCause) -> Option<Transition> {
        if self.phase != Phase::Running {
            return None;
        }
        self.refresh(now);
        self.phase = Phase::Paused { cause };
        Some(Transition::Paused(cause))
    }

    pub fn toggle(&mut self, now: f64) -> Option<Transition> {
        if self.is_running() {
            self.pause(now, PauseCause::Manual)
        } else {
            self.resume(now)
        }
    }

    /// Applies one liveness observation.
    ///
    /// Only two observations move the phase: the target showing up before the
    /// session ever started, and the target vanishing while running. A paused
    /// session stays paused whatever the process does.
    pub fn observe(&mut self, alive: bool, now: f64) -> Option<Transition> {
        match (alive, self.phase) {
            (true, Phase::Idle) if !self.has_started() => self.resume(now),
            (false, Phase::Running) => self.pause(now, PauseCause::TargetExited),
            _ => None,
        }
    }

    /// Closes out the accumulated time as a [`SessionRecord`].
    ///
    /// Stops the clock first if it is running. Yields nothing when the session
    /// was already finalized or has no positive duration.
    pub fn finalize(&mut self, now: f64) -> Option<SessionRecord> {
        self.pause(now, PauseCause::Manual);
        if self.finalized || self.elapsed <= 0.0 {
            return None;
        }
        self.finalized = true;

        let start = self.session_start.unwrap_or(now - self.elapsed);
        Some(SessionRecord {
            date: format_local(now, "%Y-%m-%d"),
            duration_seconds: self.elapsed.floor() as u64,
            start_time: format_local(start, "%H:%M:%S"),
        })
    }

    /// Finalizes whatever is left and returns to a fresh Idle session.
    pub fn end(&mut self, now: f64) -> Option<SessionRecord> {
        let record = self.finalize(now);
        *self = Self::new();
        record
    }
}

/// `HH:MM:SS`; hours keep counting past 24.
pub fn format_elapsed(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

pub fn unix_seconds_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn format_local(ts: f64, pattern: &str) -> String {
    DateTime::<Utc>::from_timestamp(ts.floor() as i64, 0)
        .map(|dt| dt.with_timezone(&Local).format(pattern).to_string())
        .unwrap_or_default()
}
