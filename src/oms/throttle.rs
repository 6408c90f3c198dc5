use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::clock::Clock;

/// Verdict for one strategy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleGate {
    Run,
    /// A backoff was registered since the last cycle; sit this one out.
    Skip,
    /// Still inside the pause window.
    Paused,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub initial_pause: Duration,
    /// Ceiling for the exponential pause window.
    pub max_pause: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            initial_pause: Duration::from_secs(3),
            max_pause: Duration::from_secs(120),
        }
    }
}

/// Cycle throttle driven by venue backoff signals. Every 429 observed
/// anywhere in a cycle compounds an exponential pause; clean cycles
/// reset it.
pub struct RateLimitController {
    cfg: ThrottleConfig,
    clock: Arc<dyn Clock>,
    strikes: u32,
    paused_until: Option<Instant>,
    fresh_backoff: bool,
}

impl RateLimitController {
    pub fn new(cfg: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            strikes: 0,
            paused_until: None,
            fresh_backoff: false,
        }
    }

    pub fn strikes(&self) -> u32 {
        self.strikes
    }

    /// Record a venue rate-limit signal and extend the pause window.
    pub fn register_rate_limit(&mut self, source: &str) {
        self.strikes += 1;
        let pause = self.pause_for(self.strikes);
        self.paused_until = Some(self.clock.now() + pause);
        self.fresh_backoff = true;
        warn!(
            "rate limit from {source}: strike {}, pausing {:?}",
            self.strikes, pause
        );
    }

    pub fn before_cycle(&mut self) -> CycleGate {
        if let Some(until) = self.paused_until {
            if self.clock.now() < until {
                return CycleGate::Paused;
            }
            self.paused_until = None;
        }
        if self.fresh_backoff {
            self.fresh_backoff = false;
            return CycleGate::Skip;
        }
        CycleGate::Run
    }

    pub fn on_cycle_complete(&mut self, had_rate_limit: bool) {
        if had_rate_limit {
            // register_rate_limit already compounded the window
            return;
        }
        if self.strikes > 0 {
            info!("clean cycle, clearing {} rate-limit strikes", self.strikes);
        }
        self.strikes = 0;
    }

    fn pause_for(&self, strikes: u32) -> Duration {
        let factor = 1u32 << strikes.saturating_sub(1).min(16);
        (self.cfg.initial_pause * factor).min(self.cfg.max_pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn controller(clock: Arc<ManualClock>) -> RateLimitController {
        RateLimitController::new(ThrottleConfig::default(), clock)
    }

    #[test]
    fn runs_when_idle() {
        let clock = Arc::new(ManualClock::new());
        let mut ctl = controller(clock);
        assert_eq!(ctl.before_cycle(), CycleGate::Run);
    }

    #[test]
    fn pause_then_skip_then_run() {
        let clock = Arc::new(ManualClock::new());
        let mut ctl = controller(clock.clone());

        ctl.register_rate_limit("create_order");
        assert_eq!(ctl.before_cycle(), CycleGate::Paused);

        clock.advance(Duration::from_secs(4));
        assert_eq!(ctl.before_cycle(), CycleGate::Skip);
        assert_eq!(ctl.before_cycle(), CycleGate::Run);
    }

    #[test]
    fn strikes_compound_and_cap() {
        let clock = Arc::new(ManualClock::new());
        let mut ctl = controller(clock.clone());

        // second strike doubles the window: 6s
        ctl.register_rate_limit("a");
        ctl.register_rate_limit("b");
        clock.advance(Duration::from_secs(4));
        assert_eq!(ctl.before_cycle(), CycleGate::Paused);
        clock.advance(Duration::from_secs(3));
        assert_eq!(ctl.before_cycle(), CycleGate::Skip);

        // strikes keep compounding but the window is bounded
        for _ in 0..20 {
            ctl.register_rate_limit("x");
        }
        clock.advance(Duration::from_secs(121));
        assert_eq!(ctl.before_cycle(), CycleGate::Skip);
    }

    #[test]
    fn clean_cycle_resets() {
        let clock = Arc::new(ManualClock::new());
        let mut ctl = controller(clock.clone());

        ctl.register_rate_limit("a");
        clock.advance(Duration::from_secs(4));
        ctl.before_cycle(); // Skip
        ctl.on_cycle_complete(false);
        assert_eq!(ctl.strikes(), 0);

        // next strike starts from the initial window again
        ctl.register_rate_limit("b");
        clock.advance(Duration::from_secs(4));
        assert_eq!(ctl.before_cycle(), CycleGate::Skip);
    }
}
