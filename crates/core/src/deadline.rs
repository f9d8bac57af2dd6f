//! Invocation deadlines.
//!
//! The host grants each invocation a hard wall-clock budget. A [`Deadline`] is
//! derived once at invocation start (start + remaining budget − safety buffer)
//! and then consulted cooperatively: nothing is ever interrupted, callers poll
//! between units of work.
//!
//! Two polling styles are supported:
//! - **fixed-cost**: [`Deadline::is_expired`] before each unit
//! - **predictive**: [`PredictivePoll::permits_next`] after each unit, which
//!   extrapolates the next unit's cost from the last one

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default time kept in reserve between the deadline and the host's hard kill.
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(60);

/// Default multiplier applied to the last unit's duration by [`PredictivePoll`].
pub const DEFAULT_PREDICTIVE_MULTIPLIER: f64 = 1.2;

/// Monotonic time source.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
///
/// Safe to advance from several worker threads at once.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

/// Host query for the remaining invocation budget.
pub trait RemainingTime {
    fn remaining(&self) -> Duration;
}

/// A constant budget, as reported once by the host.
impl RemainingTime for Duration {
    fn remaining(&self) -> Duration {
        *self
    }
}

/// Budget that shrinks as the given clock advances.
#[derive(Debug, Clone)]
pub struct HostBudget {
    clock: Arc<dyn Clock>,
    expires_at: Instant,
}

impl HostBudget {
    pub fn new(clock: Arc<dyn Clock>, budget: Duration) -> Self {
        let expires_at = clock.now() + budget;
        Self { clock, expires_at }
    }
}

impl RemainingTime for HostBudget {
    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.clock.now())
    }
}

/// Derives per-invocation deadlines.
#[derive(Debug, Clone)]
pub struct DeadlineClock {
    clock: Arc<dyn Clock>,
    safety_buffer: Duration,
}

impl DeadlineClock {
    pub fn new(clock: Arc<dyn Clock>, safety_buffer: Duration) -> Self {
        Self {
            clock,
            safety_buffer,
        }
    }

    pub fn safety_buffer(&self) -> Duration {
        self.safety_buffer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Compute the deadline for an invocation starting now.
    ///
    /// A budget smaller than the safety buffer yields an already-expired
    /// deadline.
    pub fn start(&self, host: &dyn RemainingTime) -> Deadline {
        let started_at = self.clock.now();
        let usable = host.remaining().saturating_sub(self.safety_buffer);
        Deadline {
            started_at,
            at: started_at + usable,
            clock: self.clock.clone(),
        }
    }
}

/// Absolute stop time for one invocation. Cheap to clone into workers.
#[derive(Clone)]
pub struct Deadline {
    started_at: Instant,
    at: Instant,
    clock: Arc<dyn Clock>,
}

impl Deadline {
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// `true` once no new unit of work may start.
    pub fn is_expired(&self) -> bool {
        self.clock.now() >= self.at
    }

    /// Time left until the deadline (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(self.clock.now())
    }

    /// Usable budget of this invocation.
    pub fn budget(&self) -> Duration {
        self.at.saturating_duration_since(self.started_at)
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("budget", &self.budget())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Predictive continuation check for variable-cost units.
///
/// After a unit finishes, the next one is assumed to cost up to
/// `last_elapsed × multiplier`; it only starts if that still fits before the
/// deadline. Budget is traded for never being killed mid-unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictivePoll {
    multiplier: f64,
}

impl PredictivePoll {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Worst-case estimate for the next unit.
    pub fn projected(&self, last_elapsed: Duration) -> Duration {
        last_elapsed.mul_f64(self.multiplier)
    }

    pub fn permits_next(&self, deadline: &Deadline, last_elapsed: Duration) -> bool {
        !deadline.is_expired() && self.projected(last_elapsed) <= deadline.remaining()
    }
}

impl Default for PredictivePoll {
    fn default() -> Self {
        Self::new(DEFAULT_PREDICTIVE_MULTIPLIER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> (Arc<ManualClock>, DeadlineClock) {
        let clock = ManualClock::arc();
        let deadlines = DeadlineClock::new(clock.clone(), DEFAULT_SAFETY_BUFFER);
        (clock, deadlines)
    }

    #[test]
    fn deadline_subtracts_safety_buffer() {
        let (clock, deadlines) = manual();
        let deadline = deadlines.start(&Duration::from_secs(90));

        assert_eq!(deadline.budget(), Duration::from_secs(30));
        assert!(!deadline.is_expired());

        clock.advance(Duration::from_secs(29));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn budget_below_buffer_is_expired_immediately() {
        let (_clock, deadlines) = manual();
        let deadline = deadlines.start(&Duration::from_secs(45));
        assert!(deadline.is_expired());
        assert_eq!(deadline.budget(), Duration::ZERO);
    }

    #[test]
    fn host_budget_shrinks_with_clock() {
        let clock = ManualClock::arc();
        let host = HostBudget::new(clock.clone(), Duration::from_secs(900));
        clock.advance(Duration::from_secs(100));
        assert_eq!(host.remaining(), Duration::from_secs(800));

        let deadline = DeadlineClock::new(clock.clone(), DEFAULT_SAFETY_BUFFER).start(&host);
        assert_eq!(deadline.budget(), Duration::from_secs(740));
    }

    #[test]
    fn clones_share_the_same_instant() {
        let (clock, deadlines) = manual();
        let deadline = deadlines.start(&Duration::from_secs(70));
        let copy = deadline.clone();
        clock.advance(Duration::from_secs(10));
        assert!(deadline.is_expired());
        assert!(copy.is_expired());
    }

    #[test]
    fn predictive_poll_stops_before_an_expensive_unit() {
        let (clock, deadlines) = manual();
        let poll = PredictivePoll::default();
        let deadline = deadlines.start(&Duration::from_secs(60 + 70));

        clock.advance(Duration::from_secs(40));
        // 30s left, last unit took 40s: 48s projected does not fit.
        assert!(!poll.permits_next(&deadline, Duration::from_secs(40)));
        // A cheap unit still fits.
        assert!(poll.permits_next(&deadline, Duration::from_secs(2)));
    }

    #[test]
    fn predictive_multiplier_never_shrinks_estimates() {
        let poll = PredictivePoll::new(0.5);
        assert_eq!(poll.multiplier(), 1.0);
        assert_eq!(poll.projected(Duration::from_secs(10)), Duration::from_secs(10));
    }
}
