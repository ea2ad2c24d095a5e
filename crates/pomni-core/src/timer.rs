//! Countdown and breathing-phase timers for the exercise screens.
//!
//! Each screen runs its own loop against an absolute deadline and recomputes
//! the remaining time on every wake, so tick jitter never accumulates.
//! Pausing records the pause start; resuming shifts the deadline forward by
//! the paused duration. Loops are per-screen, uncoordinated, and stop via
//! explicit cancellation when the screen goes away.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Deadline-based countdown. Pure state; the caller supplies the clock.
#[derive(Clone, Debug)]
pub struct Countdown {
    deadline: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
}

impl Countdown {
    pub fn new(total: Duration, now: DateTime<Utc>) -> Self {
        Self {
            deadline: now + chrono::Duration::milliseconds(total.as_millis() as i64),
            paused_at: None,
        }
    }

    /// Time left, clamped at zero. While paused this is frozen at the value
    /// it had when the pause started.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let basis = self.paused_at.unwrap_or(now);
        (self.deadline - basis).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Shift the deadline forward by the elapsed pause duration.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.deadline += now - paused_at;
        }
    }

    pub fn finished(&self, now: DateTime<Utc>) -> bool {
        !self.is_paused() && self.remaining(now).is_zero()
    }
}

/// One step of a breathing cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub duration: Duration,
}

impl Phase {
    pub fn new(name: impl Into<String>, secs: u64) -> Self {
        Self {
            name: name.into(),
            duration: Duration::from_secs(secs),
        }
    }
}

/// A repeating cycle of phases (inhale / hold / exhale ...).
#[derive(Clone, Debug)]
pub struct PhasePattern {
    phases: Vec<Phase>,
    cycle: Duration,
}

impl PhasePattern {
    pub fn new(phases: Vec<Phase>) -> Self {
        let cycle = phases.iter().map(|p| p.duration).sum();
        Self { phases, cycle }
    }

    /// Box breathing: 4-4-4-4.
    pub fn breath_4444() -> Self {
        Self::new(vec![
            Phase::new("inhale", 4),
            Phase::new("hold", 4),
            Phase::new("exhale", 4),
            Phase::new("hold", 4),
        ])
    }

    /// Relaxing breath: 4-7-8.
    pub fn breath_478() -> Self {
        Self::new(vec![
            Phase::new("inhale", 4),
            Phase::new("hold", 7),
            Phase::new("exhale", 8),
        ])
    }

    /// Extended exhale: 4-6.
    pub fn breath_46() -> Self {
        Self::new(vec![Phase::new("inhale", 4), Phase::new("exhale", 6)])
    }

    /// Triangle breath: 3-3-3.
    pub fn breath_333() -> Self {
        Self::new(vec![
            Phase::new("inhale", 3),
            Phase::new("hold", 3),
            Phase::new("exhale", 3),
        ])
    }

    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    /// Phase active at `elapsed` since the exercise started, plus the time
    /// left inside that phase. `None` only for an empty pattern.
    pub fn at(&self, elapsed: Duration) -> Option<(&Phase, Duration)> {
        if self.cycle.is_zero() {
            return None;
        }
        let mut offset =
            Duration::from_nanos((elapsed.as_nanos() % self.cycle.as_nanos()) as u64);
        for phase in &self.phases {
            if offset < phase.duration {
                return Some((phase, phase.duration - offset));
            }
            offset -= phase.duration;
        }
        None
    }
}

/// Spawned countdown loop for one screen: publishes the remaining time over
/// a watch channel and stops on cancellation or when the deadline passes.
pub struct CountdownTask {
    countdown: Arc<Mutex<Countdown>>,
    clock: Arc<dyn Clock>,
    remaining: watch::Receiver<Duration>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CountdownTask {
    pub fn spawn(total: Duration, tick: Duration, clock: Arc<dyn Clock>) -> Self {
        let countdown = Arc::new(Mutex::new(Countdown::new(total, clock.now())));
        let (tx, rx) = watch::channel(total);
        let cancel = CancellationToken::new();

        let loop_countdown = Arc::clone(&countdown);
        let loop_clock = Arc::clone(&clock);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {}
                }

                let now = loop_clock.now();
                let cd = loop_countdown.lock().await;
                let left = cd.remaining(now);
                let done = cd.finished(now);
                drop(cd);

                if tx.send(left).is_err() {
                    break;
                }
                if done {
                    break;
                }
            }
        });

        Self {
            countdown,
            clock,
            remaining: rx,
            cancel,
            handle,
        }
    }

    /// Channel carrying the latest remaining time.
    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining.clone()
    }

    pub async fn pause(&self) {
        let now = self.clock.now();
        self.countdown.lock().await.pause(now);
    }

    pub async fn resume(&self) {
        let now = self.clock.now();
        self.countdown.lock().await.resume(now);
    }

    /// Stop the loop (screen unmounted or the user hit stop).
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, secs).unwrap()
    }

    #[test]
    fn countdown_recomputes_remaining_from_deadline() {
        let cd = Countdown::new(Duration::from_secs(30), at(0));
        assert_eq!(cd.remaining(at(0)), Duration::from_secs(30));
        assert_eq!(cd.remaining(at(12)), Duration::from_secs(18));
        assert_eq!(cd.remaining(at(31)), Duration::ZERO);
        assert!(cd.finished(at(31)));
    }

    #[test]
    fn pause_freezes_and_resume_shifts_the_deadline() {
        let mut cd = Countdown::new(Duration::from_secs(30), at(0));
        cd.pause(at(10));
        assert!(cd.is_paused());
        assert_eq!(cd.remaining(at(25)), Duration::from_secs(20));
        assert!(!cd.finished(at(59)));

        // 15 s paused: the deadline moves from t+30 to t+45.
        cd.resume(at(25));
        assert_eq!(cd.remaining(at(25)), Duration::from_secs(20));
        assert_eq!(cd.remaining(at(45)), Duration::ZERO);
    }

    #[test]
    fn double_pause_keeps_the_first_pause_start() {
        let mut cd = Countdown::new(Duration::from_secs(30), at(0));
        cd.pause(at(5));
        cd.pause(at(9));
        cd.resume(at(15));
        // Paused 10 s, not 6.
        assert_eq!(cd.remaining(at(15)), Duration::from_secs(25));
    }

    #[test]
    fn phase_pattern_cycles_through_phases() {
        let pat = PhasePattern::breath_478();
        assert_eq!(pat.cycle(), Duration::from_secs(19));

        let (phase, left) = pat.at(Duration::from_secs(0)).unwrap();
        assert_eq!(phase.name, "inhale");
        assert_eq!(left, Duration::from_secs(4));

        let (phase, left) = pat.at(Duration::from_secs(5)).unwrap();
        assert_eq!(phase.name, "hold");
        assert_eq!(left, Duration::from_secs(6));

        let (phase, _) = pat.at(Duration::from_secs(12)).unwrap();
        assert_eq!(phase.name, "exhale");

        // Wraps into the second cycle.
        let (phase, left) = pat.at(Duration::from_secs(20)).unwrap();
        assert_eq!(phase.name, "inhale");
        assert_eq!(left, Duration::from_secs(3));
    }

    #[test]
    fn empty_pattern_has_no_phase() {
        assert!(PhasePattern::new(Vec::new()).at(Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn countdown_task_publishes_and_finishes() {
        let task = CountdownTask::spawn(
            Duration::from_millis(30),
            Duration::from_millis(5),
            Arc::new(SystemClock),
        );
        let mut rx = task.subscribe();

        // The loop stops by itself once the deadline passes.
        while rx.changed().await.is_ok() {
            if rx.borrow().is_zero() {
                break;
            }
        }
        assert!(rx.borrow().is_zero());
        task.join().await;
    }

    #[tokio::test]
    async fn countdown_task_stops_on_cancellation() {
        let task = CountdownTask::spawn(
            Duration::from_secs(3600),
            Duration::from_millis(5),
            Arc::new(SystemClock),
        );
        task.stop();
        task.join().await;
    }
}
