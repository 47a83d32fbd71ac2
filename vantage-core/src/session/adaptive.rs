//! Adaptive bitrate control driven by send-queue occupancy.
//!
//! Queue length is the sole congestion signal: the TCP socket is the
//! bottleneck sensor, the bounded queue in front of it the gauge. The
//! controller walks a fixed bitrate ladder with asymmetric dwell
//! (two seconds of sustained congestion steps down, five seconds of
//! an empty queue steps up), biasing toward latency. A 2 s
//! minimum interval between adjustments keeps a flapping link from
//! sawing the encoder; the encoder's own 750 ms guard is the second
//! damper, so the two clocks cannot thrash.

use std::time::{Duration, Instant};

/// Bitrate ladder in kbps, lowest first.
pub const BITRATE_LEVELS_KBPS: [u32; 6] = [500, 800, 1200, 1800, 2500, 4000];

/// Ladder index every session starts at (1800 kbps).
pub const INITIAL_LEVEL: usize = 3;

/// Queue occupancy treated as congestion.
const CONGESTED_LEN: usize = 3;
/// How long congestion must persist before stepping down.
const CONGESTION_DWELL: Duration = Duration::from_secs(2);
/// How long the queue must stay empty before stepping up.
const RELAXATION_DWELL: Duration = Duration::from_secs(5);
/// Minimum spacing between two adjustments.
const MIN_ADJUST_INTERVAL: Duration = Duration::from_secs(2);

/// Queue-occupancy-driven bitrate ladder walker.
///
/// Pure state machine: callers feed it `(queue_len, now)` at every
/// send step and apply the returned bitrate to the encoder.
#[derive(Debug)]
pub struct AdaptiveController {
    level_idx: usize,
    congested_since: Option<Instant>,
    relaxed_since: Option<Instant>,
    last_adjust: Instant,
}

impl AdaptiveController {
    pub fn new(now: Instant) -> Self {
        Self {
            level_idx: INITIAL_LEVEL,
            congested_since: None,
            relaxed_since: None,
            last_adjust: now,
        }
    }

    /// Current ladder position.
    pub fn level_idx(&self) -> usize {
        self.level_idx
    }

    /// Current target bitrate in kbps.
    pub fn level_kbps(&self) -> u32 {
        BITRATE_LEVELS_KBPS[self.level_idx]
    }

    /// Observe the queue at one send step. Returns the new bitrate
    /// when the ladder moved, `None` otherwise.
    pub fn observe(&mut self, queue_len: usize, now: Instant) -> Option<u32> {
        if queue_len >= CONGESTED_LEN {
            self.relaxed_since = None;
            let since = *self.congested_since.get_or_insert(now);

            if now.duration_since(since) > CONGESTION_DWELL
                && now.duration_since(self.last_adjust) >= MIN_ADJUST_INTERVAL
                && self.level_idx > 0
            {
                self.level_idx -= 1;
                self.congested_since = None;
                self.last_adjust = now;
                return Some(self.level_kbps());
            }
        } else if queue_len == 0 {
            self.congested_since = None;
            let since = *self.relaxed_since.get_or_insert(now);

            if now.duration_since(since) > RELAXATION_DWELL
                && now.duration_since(self.last_adjust) >= MIN_ADJUST_INTERVAL
                && self.level_idx < BITRATE_LEVELS_KBPS.len() - 1
            {
                self.level_idx += 1;
                self.relaxed_since = None;
                self.last_adjust = now;
                return Some(self.level_kbps());
            }
        } else {
            // Intermediate occupancy: neither trend is trusted.
            self.congested_since = None;
            self.relaxed_since = None;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    /// Drive the controller with a constant queue length over a time
    /// span, sampling every 100 ms; returns every applied bitrate.
    fn drive(
        ctl: &mut AdaptiveController,
        queue_len: usize,
        start: Instant,
        span: Duration,
    ) -> Vec<u32> {
        let mut out = Vec::new();
        let mut t = start;
        let end = start + span;
        while t <= end {
            if let Some(kbps) = ctl.observe(queue_len, t) {
                out.push(kbps);
            }
            t += 100 * MS;
        }
        out
    }

    #[test]
    fn starts_at_1800() {
        let ctl = AdaptiveController::new(Instant::now());
        assert_eq!(ctl.level_idx(), 3);
        assert_eq!(ctl.level_kbps(), 1800);
    }

    #[test]
    fn sustained_congestion_steps_down() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);

        let applied = drive(&mut ctl, 4, t0, Duration::from_secs(10));
        // 1800 → 1200 → 800 → 500 within ten seconds.
        assert_eq!(applied, vec![1200, 800, 500]);
        assert_eq!(ctl.level_idx(), 0);

        // Already at the floor: congestion cannot underflow the ladder.
        let more = drive(&mut ctl, 5, t0 + Duration::from_secs(10), Duration::from_secs(10));
        assert!(more.is_empty());
        assert_eq!(ctl.level_idx(), 0);
    }

    #[test]
    fn congestion_reaches_low_level_within_ten_seconds() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);
        drive(&mut ctl, 4, t0, Duration::from_secs(10));
        assert!(ctl.level_idx() <= 1);
    }

    #[test]
    fn idle_queue_steps_up_slowly() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);

        let applied = drive(&mut ctl, 0, t0, Duration::from_secs(11));
        // One step per five-second dwell.
        assert_eq!(applied, vec![2500, 4000]);
        assert_eq!(ctl.level_idx(), BITRATE_LEVELS_KBPS.len() - 1);

        // Ceiling holds.
        let more = drive(&mut ctl, 0, t0 + Duration::from_secs(11), Duration::from_secs(20));
        assert!(more.is_empty());
    }

    #[test]
    fn intermediate_occupancy_clears_both_timers() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);

        // 1.9 s of congestion, almost enough to fire...
        drive(&mut ctl, 4, t0, Duration::from_millis(1900));
        // ...interrupted by one intermediate sample...
        assert!(ctl.observe(2, t0 + Duration::from_millis(1950)).is_none());
        // ...so another 1.9 s of congestion still does not fire.
        let applied = drive(
            &mut ctl,
            4,
            t0 + Duration::from_secs(2),
            Duration::from_millis(1900),
        );
        assert!(applied.is_empty());
        assert_eq!(ctl.level_idx(), 3);
    }

    #[test]
    fn flapping_link_is_damped() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);
        let mut changes = 0;

        // Alternate one second congested, one second empty, for 30 s.
        let mut t = t0;
        for _ in 0..15 {
            for _ in 0..10 {
                if ctl.observe(4, t).is_some() {
                    changes += 1;
                }
                t += 100 * MS;
            }
            for _ in 0..10 {
                if ctl.observe(0, t).is_some() {
                    changes += 1;
                }
                t += 100 * MS;
            }
        }

        // The 2 s minimum interval bounds the churn.
        assert!(changes <= 15, "changed {changes} times");
        // Level stays inside the ladder whatever happened.
        assert!(ctl.level_idx() < BITRATE_LEVELS_KBPS.len());
    }

    #[test]
    fn adjustments_respect_minimum_interval() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);

        let mut applied_at = Vec::new();
        let mut t = t0;
        for _ in 0..200 {
            if ctl.observe(5, t).is_some() {
                applied_at.push(t);
            }
            t += 100 * MS;
        }

        for pair in applied_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= MIN_ADJUST_INTERVAL);
        }
    }

    #[test]
    fn recovery_after_congestion() {
        let t0 = Instant::now();
        let mut ctl = AdaptiveController::new(t0);

        drive(&mut ctl, 4, t0, Duration::from_secs(5));
        let lowered = ctl.level_idx();
        assert!(lowered < 3);

        let applied = drive(&mut ctl, 0, t0 + Duration::from_secs(5), Duration::from_secs(12));
        assert!(!applied.is_empty());
        assert!(ctl.level_idx() > lowered);
    }
}
