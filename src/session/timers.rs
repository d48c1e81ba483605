//! Deadline bookkeeping for the session controller.
//!
//! Timers are plain records; the host asks for the next deadline, sleeps until
//! then and hands the current instant back to the controller. Each record is
//! stamped with the session generation and passage epoch it was armed in, so a
//! record that outlived its passage is recognised and dropped.

use log::debug;
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Difficult passage not completed in time; raises the escape prompt.
    VerseTimeout,
    /// Engine still not listening while the session expects it to be.
    MicWatchdog,
    /// Delayed engine start.
    EngineRestart,
    /// Minimum time the saving screen stays up.
    SavingHold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerScope {
    /// Cancelled on every passage transition and retry.
    Passage,
    /// Lives until the session ends.
    Session,
}

impl TimerKind {
    pub fn scope(self) -> TimerScope {
        match self {
            TimerKind::VerseTimeout | TimerKind::MicWatchdog => TimerScope::Passage,
            TimerKind::EngineRestart | TimerKind::SavingHold => TimerScope::Session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub kind: TimerKind,
    pub at: Instant,
    pub session: u64,
    pub epoch: u64,
}

impl Deadline {
    /// Whether this deadline still belongs to the given session and passage.
    pub fn is_current(&self, session: u64, epoch: u64) -> bool {
        match self.kind.scope() {
            TimerScope::Passage => self.session == session && self.epoch == epoch,
            TimerScope::Session => self.session == session,
        }
    }
}

/// At most one pending deadline per kind.
#[derive(Debug, Default)]
pub struct TimerSet {
    deadlines: Vec<Deadline>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind`, replacing any pending deadline of the same kind.
    pub fn arm(&mut self, kind: TimerKind, at: Instant, session: u64, epoch: u64) {
        self.deadlines.retain(|d| d.kind != kind);
        self.deadlines.push(Deadline {
            kind,
            at,
            session,
            epoch,
        });
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let before = self.deadlines.len();
        self.deadlines.retain(|d| d.kind != kind);
        before != self.deadlines.len()
    }

    pub fn cancel_scope(&mut self, scope: TimerScope) {
        let before = self.deadlines.len();
        self.deadlines.retain(|d| d.kind.scope() != scope);
        let cancelled = before - self.deadlines.len();
        if cancelled > 0 {
            debug!("TimerSet: cancelled {} {:?} timer(s)", cancelled, scope);
        }
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.iter().any(|d| d.kind == kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().map(|d| d.at).min()
    }

    /// Remove and return every deadline due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<Deadline> {
        let mut due: Vec<Deadline> = self
            .deadlines
            .iter()
            .filter(|d| d.at <= now)
            .copied()
            .collect();
        self.deadlines.retain(|d| d.at > now);
        due.sort_by_key(|d| d.at);
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_arm_replaces_same_kind() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::MicWatchdog, now + Duration::from_secs(3), 1, 1);
        timers.arm(TimerKind::MicWatchdog, now + Duration::from_secs(5), 1, 2);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_take_due_in_order() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::VerseTimeout, now + Duration::from_secs(2), 1, 1);
        timers.arm(
            TimerKind::EngineRestart,
            now + Duration::from_millis(100),
            1,
            1,
        );
        timers.arm(TimerKind::SavingHold, now + Duration::from_secs(9), 1, 1);

        let due = timers.take_due(now + Duration::from_secs(2));
        let kinds: Vec<TimerKind> = due.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![TimerKind::EngineRestart, TimerKind::VerseTimeout]
        );
        assert!(timers.is_armed(TimerKind::SavingHold));
        assert!(timers.take_due(now).is_empty());
    }

    #[test]
    fn test_cancel_scope_keeps_session_timers() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::VerseTimeout, now, 1, 1);
        timers.arm(TimerKind::MicWatchdog, now, 1, 1);
        timers.arm(TimerKind::EngineRestart, now, 1, 1);
        timers.cancel_scope(TimerScope::Passage);
        assert!(!timers.is_armed(TimerKind::VerseTimeout));
        assert!(!timers.is_armed(TimerKind::MicWatchdog));
        assert!(timers.is_armed(TimerKind::EngineRestart));
    }

    #[test]
    fn test_staleness_by_scope() {
        let now = Instant::now();
        let passage = Deadline {
            kind: TimerKind::VerseTimeout,
            at: now,
            session: 1,
            epoch: 4,
        };
        assert!(passage.is_current(1, 4));
        assert!(!passage.is_current(1, 5));

        let session = Deadline {
            kind: TimerKind::EngineRestart,
            ..passage
        };
        assert!(session.is_current(1, 5));
        assert!(!session.is_current(2, 4));
    }
}
