//! # Store Circuit
//!
//! Guards round-trips into the shared atomic store. Consecutive
//! unavailability failures trip the circuit; while tripped callers skip the
//! store until the cool-down elapses, then a bounded number of probes decide
//! whether it resets.
//!
//! Time is passed in by the caller as epoch milliseconds, so the circuit
//! follows whatever clock drives bucket refill.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Externally visible circuit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("{guarded} circuit is open, retry in {retry_in_ms}ms")]
    Open { guarded: String, retry_in_ms: u64 },

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// Cool-down before the first probe
    pub open_for_ms: u64,
    /// Probe successes needed to close again
    pub probe_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for_ms: 30_000,
            probe_successes: 1,
        }
    }
}

/// Counters since construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub admitted: u64,
    pub short_circuited: u64,
    pub successes: u64,
    pub failures: u64,
    pub trips: u64,
    /// Probes that ended without success or failure
    pub released_probes: u64,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { streak: u32 },
    Open { until_ms: u64 },
    Probing { in_flight: u32, passed: u32 },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Probing { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Ledger {
    phase: Phase,
    metrics: CircuitBreakerMetrics,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    guarded: String,
    config: CircuitBreakerConfig,
    ledger: Mutex<Ledger>,
}

impl CircuitBreaker {
    pub fn new(guarded: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let guarded = guarded.into();
        debug!(
            guarded = %guarded,
            failure_threshold = config.failure_threshold,
            open_for_ms = config.open_for_ms,
            "🛡️ CIRCUIT: Guarding store access"
        );

        Self {
            guarded,
            config,
            ledger: Mutex::new(Ledger {
                phase: Phase::Closed { streak: 0 },
                metrics: CircuitBreakerMetrics::default(),
            }),
        }
    }

    pub fn guarded(&self) -> &str {
        &self.guarded
    }

    pub fn state(&self) -> CircuitState {
        self.ledger.lock().phase.state()
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.ledger.lock().metrics.clone()
    }

    /// Whether a store call may go out at `now_ms`
    ///
    /// An expired cool-down moves the circuit to probing. Probing admits at
    /// most `probe_successes` concurrent calls. Callers that may not reach
    /// `on_success`/`on_failure` should use [`try_acquire`](Self::try_acquire).
    pub fn admit(&self, now_ms: u64) -> bool {
        self.enter(now_ms).is_some()
    }

    /// Admit a call and hand back a permit that settles it
    ///
    /// A permit dropped without [`CallPermit::succeed`] or
    /// [`CallPermit::fail`] gives its probe slot back, so cancelled calls and
    /// calls that end in a non-availability error cannot wedge probing.
    pub fn try_acquire(&self, now_ms: u64) -> Option<CallPermit<'_>> {
        self.enter(now_ms).map(|probe| CallPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Returns `Some(is_probe)` when admitted
    fn enter(&self, now_ms: u64) -> Option<bool> {
        let mut ledger = self.ledger.lock();
        let admitted = match ledger.phase {
            Phase::Closed { .. } => Some(false),
            Phase::Open { until_ms } if now_ms >= until_ms => {
                info!(guarded = %self.guarded, "🟡 CIRCUIT: Cool-down elapsed, probing store");
                ledger.phase = Phase::Probing {
                    in_flight: 1,
                    passed: 0,
                };
                Some(true)
            }
            Phase::Open { .. } => None,
            Phase::Probing { in_flight, passed } => {
                if in_flight + passed < self.config.probe_successes.max(1) {
                    ledger.phase = Phase::Probing {
                        in_flight: in_flight + 1,
                        passed,
                    };
                    Some(true)
                } else {
                    None
                }
            }
        };

        if admitted.is_some() {
            ledger.metrics.admitted += 1;
        } else {
            ledger.metrics.short_circuited += 1;
        }
        admitted
    }

    /// Give back a probe slot whose call ended without a verdict
    fn release_probe(&self) {
        let mut ledger = self.ledger.lock();
        if let Phase::Probing { in_flight, passed } = ledger.phase {
            ledger.phase = Phase::Probing {
                in_flight: in_flight.saturating_sub(1),
                passed,
            };
            ledger.metrics.released_probes += 1;
            debug!(guarded = %self.guarded, "🟡 CIRCUIT: Probe ended without a verdict, slot released");
        }
    }

    /// Milliseconds left in the cool-down, zero unless open
    pub fn retry_in_ms(&self, now_ms: u64) -> u64 {
        match self.ledger.lock().phase {
            Phase::Open { until_ms } => until_ms.saturating_sub(now_ms),
            _ => 0,
        }
    }

    pub fn on_success(&self) {
        let mut ledger = self.ledger.lock();
        ledger.metrics.successes += 1;
        ledger.phase = match ledger.phase {
            Phase::Closed { .. } => Phase::Closed { streak: 0 },
            Phase::Probing { in_flight, passed } => {
                let passed = passed + 1;
                if passed >= self.config.probe_successes.max(1) {
                    info!(guarded = %self.guarded, "🟢 CIRCUIT: Store recovered, closed");
                    Phase::Closed { streak: 0 }
                } else {
                    Phase::Probing {
                        in_flight: in_flight.saturating_sub(1),
                        passed,
                    }
                }
            }
            open @ Phase::Open { .. } => open,
        };
    }

    /// Record an unavailability failure observed at `now_ms`
    pub fn on_failure(&self, now_ms: u64) {
        let mut ledger = self.ledger.lock();
        ledger.metrics.failures += 1;
        match ledger.phase {
            Phase::Closed { streak } if streak + 1 >= self.config.failure_threshold => {
                self.trip_locked(&mut ledger, now_ms, streak + 1);
            }
            Phase::Closed { streak } => ledger.phase = Phase::Closed { streak: streak + 1 },
            Phase::Probing { .. } => self.trip_locked(&mut ledger, now_ms, 1),
            Phase::Open { .. } => {}
        }
    }

    /// Open the circuit regardless of the failure streak
    pub fn trip(&self, now_ms: u64) {
        warn!(guarded = %self.guarded, "🚨 CIRCUIT: Tripped manually");
        let mut ledger = self.ledger.lock();
        self.trip_locked(&mut ledger, now_ms, 0);
    }

    pub fn reset(&self) {
        warn!(guarded = %self.guarded, "🚨 CIRCUIT: Reset manually");
        self.ledger.lock().phase = Phase::Closed { streak: 0 };
    }

    /// Run `call` behind the circuit, counting any `Err` as a failure
    pub async fn guard<F, Fut, T, E>(&self, now_ms: u64, call: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire(now_ms) else {
            return Err(CircuitBreakerError::Open {
                guarded: self.guarded.clone(),
                retry_in_ms: self.retry_in_ms(now_ms),
            });
        };

        match call().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail(now_ms);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn trip_locked(&self, ledger: &mut Ledger, now_ms: u64, streak: u32) {
        ledger.phase = Phase::Open {
            until_ms: now_ms.saturating_add(self.config.open_for_ms),
        };
        ledger.metrics.trips += 1;
        error!(
            guarded = %self.guarded,
            streak,
            open_for_ms = self.config.open_for_ms,
            "🔴 CIRCUIT: Store calls short-circuited"
        );
    }
}

/// One admitted call through a [`CircuitBreaker`]
#[derive(Debug)]
#[must_use = "dropping a permit releases it without a verdict"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    /// Count an unavailability failure observed at `now_ms`
    pub fn fail(mut self, now_ms: u64) {
        self.settled = true;
        self.breaker.on_failure(now_ms);
    }

    /// End the call without judging store availability
    pub fn release(self) {}
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
