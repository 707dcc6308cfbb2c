use tracing::{debug, info};

use crate::monitor::PollResult;
use crate::session::{format_elapsed, PauseCause, Phase, SessionTimer, Transition};
use crate::store::{SessionRecord, Store, TargetApp};

/// Couples one target application with its session timer and hands finished
/// sessions to the [`Store`].
///
/// All mutation goes through `&mut self`, so whoever owns the recorder is the
/// single writer for both ticks.
pub struct Recorder {
    target: TargetApp,
    timer: SessionTimer,
}

impl Recorder {
    pub fn new(target: TargetApp) -> Self {
        Self {
            target,
            timer: SessionTimer::new(),
        }
    }

    pub fn target(&self) -> &TargetApp {
        &self.target
    }

    pub fn timer(&self) -> &SessionTimer {
        &self.timer
    }

    pub fn phase(&self) -> Phase {
        self.timer.phase()
    }

    /// Path the poll worker should watch, if there is one.
    pub fn poll_target(&self) -> Option<String> {
        let path = self.target.path.trim();
        if path.is_empty() {
            None
        } else {
            Some(path.to_owned())
        }
    }

    pub fn display_elapsed(&self, now: f64) -> f64 {
        self.timer.display_elapsed(now)
    }

    /// Fast tick.
    pub fn refresh(&mut self, now: f64) -> f64 {
        self.timer.refresh(now)
    }

    /// Slow tick, timed at the moment the poll was taken. Results for a
    /// different target are stale and ignored.
    pub fn ingest(&mut self, result: &PollResult, store: &mut Store) -> Option<Transition> {
        if result.target_path.trim() != self.target.path.trim() {
            debug!(stale = %result.target_path, "ignoring poll result for previous target");
            return None;
        }
        self.observe(result.alive, result.polled_at, store)
    }

    pub fn observe(&mut self, alive: bool, now: f64, store: &mut Store) -> Option<Transition> {
        let transition = self.timer.observe(alive, now)?;
        match transition {
            Transition::Started => {
                info!(app = %self.target.display_name, "target running, timer started");
            }
            Transition::Paused(PauseCause::TargetExited) => {
                info!(
                    app = %self.target.display_name,
                    elapsed = %format_elapsed(self.timer.elapsed_seconds()),
                    "target exited, timer stopped"
                );
                let record = self.timer.finalize(now);
                self.hand_off(record, store);
            }
            Transition::Resumed | Transition::Restarted | Transition::Paused(PauseCause::Manual) => {}
        }
        Some(transition)
    }

    /// User pause/resume.
    pub fn toggle(&mut self, now: f64) -> Option<Transition> {
        let transition = self.timer.toggle(now)?;
        info!(
            app = %self.target.display_name,
            elapsed = %format_elapsed(self.timer.elapsed_seconds()),
            ?transition,
            "timer toggled"
        );
        Some(transition)
    }

    /// Back/close: persists unsaved time, then leaves the timer Idle.
    ///
    /// Must run before the ticks are torn down so the final elapsed value is
    /// read from a live session.
    pub fn close(&mut self, now: f64, store: &mut Store) -> Option<SessionRecord> {
        let record = self.timer.end(now);
        self.hand_off(record, store)
    }

    fn hand_off(&self, record: Option<SessionRecord>, store: &mut Store) -> Option<SessionRecord> {
        let record = record?;
        if self.target.display_name.trim().is_empty() {
            debug!("session has no target name, not recorded");
            return None;
        }
        info!(
            app = %self.target.display_name,
            duration = record.duration_seconds,
            "session recorded"
        );
        store.record_session(&self.target.display_name, record.clone());
        Some(record)
    }
}
