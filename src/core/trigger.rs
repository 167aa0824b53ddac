//! Trigger policies and next fire time evaluation.
//!
//! A [`TriggerSpec`] is the external, serializable description handed to
//! `register`. It is validated into an immutable [`Trigger`], which computes
//! fire times as a pure function of a [`TriggerContext`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cron::{CronError, CronExpression};

/// Errors raised while validating a [`TriggerSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// A period or delay was negative.
    #[error("{field} must not be negative, got {value_ms}ms")]
    NegativeDuration { field: &'static str, value_ms: i64 },

    /// The cron expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    Cron(#[from] CronError),
}

impl TriggerError {
    /// True for configuration errors (bad durations) as opposed to parse errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TriggerError::NegativeDuration { .. })
    }
}

/// Serializable trigger description.
///
/// Durations are signed milliseconds so that negative input can be
/// represented and rejected instead of silently wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire every `period_ms` measured from the previous scheduled fire.
    FixedRate { period_ms: i64 },
    /// Fire `delay_ms` after the previous execution completed.
    FixedDelay { delay_ms: i64 },
    /// Delay the first fire of `inner` by `delay_ms` after registration.
    InitialDelay {
        delay_ms: i64,
        inner: Box<TriggerSpec>,
    },
    /// Fire on a six-field calendar expression.
    Cron { expression: String },
    /// Fire once at the given instant.
    OneShotAt { at: DateTime<Utc> },
}

impl TriggerSpec {
    pub fn fixed_rate(period_ms: i64) -> Self {
        TriggerSpec::FixedRate { period_ms }
    }

    pub fn fixed_delay(delay_ms: i64) -> Self {
        TriggerSpec::FixedDelay { delay_ms }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        TriggerSpec::Cron {
            expression: expression.into(),
        }
    }

    pub fn one_shot_at(at: DateTime<Utc>) -> Self {
        TriggerSpec::OneShotAt { at }
    }

    /// Wrap this spec so its first fire happens `delay_ms` after registration.
    pub fn with_initial_delay(self, delay_ms: i64) -> Self {
        TriggerSpec::InitialDelay {
            delay_ms,
            inner: Box::new(self),
        }
    }
}

/// Inputs to a fire time calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerContext {
    /// Current wall-clock time (registration time for the first fire).
    pub now: DateTime<Utc>,
    /// Scheduled instant of the previous fire, if any.
    pub last_scheduled: Option<DateTime<Utc>>,
    /// Completion time of the previous execution, if any.
    pub last_completed: Option<DateTime<Utc>>,
}

impl TriggerContext {
    /// Context for the first fire of a task registered at `now`.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            now,
            last_scheduled: None,
            last_completed: None,
        }
    }
}

/// A validated, immutable trigger policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    FixedRate { period: Duration },
    FixedDelay { delay: Duration },
    InitialDelay { delay: Duration, inner: Box<Trigger> },
    Cron(CronExpression),
    OneShotAt(DateTime<Utc>),
}

impl Trigger {
    /// Validate a spec. Negative durations and unparseable expressions fail here.
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self, TriggerError> {
        match spec {
            TriggerSpec::FixedRate { period_ms } => Ok(Trigger::FixedRate {
                period: non_negative("period_ms", *period_ms)?,
            }),
            TriggerSpec::FixedDelay { delay_ms } => Ok(Trigger::FixedDelay {
                delay: non_negative("delay_ms", *delay_ms)?,
            }),
            TriggerSpec::InitialDelay { delay_ms, inner } => Ok(Trigger::InitialDelay {
                delay: non_negative("initial delay_ms", *delay_ms)?,
                inner: Box::new(Trigger::from_spec(inner)?),
            }),
            TriggerSpec::Cron { expression } => Ok(Trigger::Cron(CronExpression::parse(expression)?)),
            TriggerSpec::OneShotAt { at } => Ok(Trigger::OneShotAt(*at)),
        }
    }

    /// Short name of the policy, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::FixedRate { .. } => "fixed_rate",
            Trigger::FixedDelay { .. } => "fixed_delay",
            Trigger::InitialDelay { .. } => "initial_delay",
            Trigger::Cron(_) => "cron",
            Trigger::OneShotAt(_) => "one_shot_at",
        }
    }

    /// Compute the next fire instant, or `None` once the trigger is exhausted.
    ///
    /// Without a previous fire, rate and delay triggers fire at `now`.
    /// `FixedDelay` needs `last_completed` for every later fire and yields
    /// `None` without it. Cron fires are always strictly after the previous
    /// scheduled second. A `OneShotAt` instant that is already past fires
    /// immediately.
    pub fn next_fire(&self, ctx: &TriggerContext) -> Result<Option<DateTime<Utc>>, CronError> {
        match self {
            Trigger::FixedRate { period } => Ok(match ctx.last_scheduled {
                None => Some(ctx.now),
                Some(last) => last.checked_add_signed(*period),
            }),
            Trigger::FixedDelay { delay } => Ok(match (ctx.last_scheduled, ctx.last_completed) {
                (None, _) => Some(ctx.now),
                (Some(_), Some(completed)) => completed.checked_add_signed(*delay),
                (Some(_), None) => None,
            }),
            Trigger::InitialDelay { delay, inner } => match ctx.last_scheduled {
                None => Ok(ctx.now.checked_add_signed(*delay)),
                Some(_) => inner.next_fire(ctx),
            },
            Trigger::Cron(expr) => {
                let from = match ctx.last_scheduled {
                    Some(last) => ctx.now.max(last + Duration::seconds(1)),
                    None => ctx.now,
                };
                expr.next_fire(from).map(Some)
            }
            Trigger::OneShotAt(at) => Ok(match ctx.last_scheduled {
                None => Some(*at),
                Some(_) => None,
            }),
        }
    }

    /// Apply the skip-and-reschedule overlap policy.
    ///
    /// `next` is the instant computed after an execution that finished at
    /// `completed_at`. For rate triggers every instant on the original cadence
    /// that fell inside the execution is dropped except the most recent one,
    /// which is returned together with the number of dropped instants. The
    /// cadence itself never shifts. Other triggers return `next` unchanged.
    pub fn collapse_overdue(
        &self,
        next: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> (DateTime<Utc>, u64) {
        match self {
            Trigger::FixedRate { period } => latest_on_cadence(*period, next, completed_at),
            Trigger::InitialDelay { inner, .. } => inner.collapse_overdue(next, completed_at),
            _ => (next, 0),
        }
    }
}

impl TryFrom<TriggerSpec> for Trigger {
    type Error = TriggerError;

    fn try_from(spec: TriggerSpec) -> Result<Self, Self::Error> {
        Trigger::from_spec(&spec)
    }
}

fn non_negative(field: &'static str, value_ms: i64) -> Result<Duration, TriggerError> {
    if value_ms < 0 {
        return Err(TriggerError::NegativeDuration { field, value_ms });
    }
    Ok(Duration::milliseconds(value_ms))
}

fn latest_on_cadence(
    period: Duration,
    next: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> (DateTime<Utc>, u64) {
    if period <= Duration::zero() || next >= completed_at {
        return (next, 0);
    }
    let (Some(behind), Some(step)) = ((completed_at - next).num_nanoseconds(), period.num_nanoseconds())
    else {
        return (next, 0);
    };

    let missed = behind / step;
    let latest = missed
        .checked_mul(step)
        .map(Duration::nanoseconds)
        .and_then(|offset| next.checked_add_signed(offset));

    match latest {
        Some(latest) => (latest, missed as u64),
        None => (next, 0),
    }
}
