//! Idle timeout for an interactive session.
//!
//! The timer owns no clocks or callbacks. Callers feed it `Instant`s from
//! whatever event loop drives them and act on the returned state. The CLI
//! has no interactive session, so this is a library API; front ends build
//! it from `Config::idle_timeout` and `Config::idle_warning`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Warning { since: Instant },
    LoggedOut,
}

#[derive(Debug, Clone)]
pub struct IdleTimer {
    idle_timeout: Duration,
    warning: Duration,
    last_activity: Instant,
    state: SessionState,
}

impl IdleTimer {
    pub fn new(idle_timeout: Duration, warning: Duration, now: Instant) -> Self {
        Self {
            idle_timeout,
            warning,
            last_activity: now,
            state: SessionState::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records user activity. Only resets the idle clock while Active; a
    /// pending warning must be dismissed with [`IdleTimer::extend`].
    pub fn record_activity(&mut self, now: Instant) {
        if self.state == SessionState::Active {
            self.last_activity = now;
        }
    }

    pub fn tick(&mut self, now: Instant) -> SessionState {
        self.state = match self.state {
            SessionState::Active => {
                if now.saturating_duration_since(self.last_activity) >= self.idle_timeout {
                    tracing::debug!("session idle, starting logout countdown");
                    SessionState::Warning { since: now }
                } else {
                    SessionState::Active
                }
            }
            SessionState::Warning { since }
                if now.saturating_duration_since(since) >= self.warning =>
            {
                tracing::info!("session logged out after idle countdown");
                SessionState::LoggedOut
            }
            other => other,
        };
        self.state
    }

    pub fn extend(&mut self, now: Instant) -> SessionState {
        if let SessionState::Warning { .. } = self.state {
            self.state = SessionState::Active;
            self.last_activity = now;
        }
        self.state
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.state {
            SessionState::Warning { since } => {
                Some(self.warning.saturating_sub(now.saturating_duration_since(since)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(15 * 60);
    const WARN: Duration = Duration::from_secs(60);

    #[test]
    fn stays_active_before_idle_threshold() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);
        assert_eq!(timer.tick(start + IDLE - Duration::from_secs(1)), SessionState::Active);
        assert_eq!(timer.remaining(start), None);
    }

    #[test]
    fn activity_resets_idle_clock() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);
        timer.record_activity(start + Duration::from_secs(600));
        assert_eq!(timer.tick(start + IDLE), SessionState::Active);
    }

    #[test]
    fn warns_then_logs_out_after_countdown() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);

        let warned_at = start + IDLE;
        assert!(matches!(timer.tick(warned_at), SessionState::Warning { .. }));
        assert_eq!(
            timer.remaining(warned_at + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
        assert!(matches!(
            timer.tick(warned_at + WARN - Duration::from_secs(1)),
            SessionState::Warning { .. }
        ));
        assert_eq!(timer.tick(warned_at + WARN), SessionState::LoggedOut);
    }

    #[test]
    fn extend_returns_to_active_and_restarts_clock() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);
        let warned_at = start + IDLE;
        timer.tick(warned_at);

        let extended_at = warned_at + Duration::from_secs(30);
        assert_eq!(timer.extend(extended_at), SessionState::Active);
        assert_eq!(timer.tick(extended_at + IDLE - Duration::from_secs(1)), SessionState::Active);
        assert!(matches!(timer.tick(extended_at + IDLE), SessionState::Warning { .. }));
    }

    #[test]
    fn activity_during_warning_does_not_cancel_countdown() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);
        let warned_at = start + IDLE;
        timer.tick(warned_at);
        timer.record_activity(warned_at + Duration::from_secs(5));
        assert_eq!(timer.tick(warned_at + WARN), SessionState::LoggedOut);
    }

    #[test]
    fn huge_countdown_never_overflows() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, Duration::from_secs(u64::MAX), start);
        let warned_at = start + IDLE;
        assert!(matches!(timer.tick(warned_at), SessionState::Warning { .. }));
        assert!(matches!(
            timer.tick(warned_at + Duration::from_secs(86_400)),
            SessionState::Warning { .. }
        ));
        assert_eq!(
            timer.remaining(warned_at + Duration::from_secs(1)),
            Some(Duration::from_secs(u64::MAX - 1))
        );
    }

    #[test]
    fn logged_out_is_terminal() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(IDLE, WARN, start);
        timer.tick(start + IDLE);
        timer.tick(start + IDLE + WARN);

        assert_eq!(timer.extend(start + IDLE + WARN * 2), SessionState::LoggedOut);
        timer.record_activity(start + IDLE + WARN * 2);
        assert_eq!(timer.tick(start + IDLE * 3), SessionState::LoggedOut);
    }
}
