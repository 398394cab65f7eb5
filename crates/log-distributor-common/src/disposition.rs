//! §7 Error Handling Design — the two-axis error taxonomy and the per-notification
//! verdict the orchestrator reports to the host runtime.

use std::fmt;

/// How a failure should be handled, independent of which component raised it.
#[derive(Debug)]
pub enum Disposition {
    /// Retrying is guaranteed to re-fail. The notification is acknowledged.
    NonRecoverable {
        reason: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Transient failure, nothing was delivered. Host-runtime native retry applies.
    RecoverableNoProgress {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Transient failure after partial success. Feeds the re-queue offset protocol.
    RecoverableWithProgress {
        events_delivered: u64,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonRecoverable { reason, source } => {
                write!(f, "non-recoverable ({reason}): {source}")
            }
            Self::RecoverableNoProgress { source } => {
                write!(f, "recoverable, no progress: {source}")
            }
            Self::RecoverableWithProgress {
                events_delivered,
                source,
            } => write!(
                f,
                "recoverable, {events_delivered} events delivered before failure: {source}"
            ),
        }
    }
}

impl Disposition {
    pub fn non_recoverable(
        reason: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::NonRecoverable {
            reason,
            source: Box::new(source),
        }
    }

    pub fn recoverable_no_progress(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::RecoverableNoProgress {
            source: Box::new(source),
        }
    }

    pub fn recoverable_with_progress(
        events_delivered: u64,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RecoverableWithProgress {
            events_delivered,
            source: Box::new(source),
        }
    }

    /// Severity ranking used to pick the maximum-severity outcome across
    /// the independent per-config sub-attempts of one notification (§4.8.6, §7).
    fn severity(&self) -> u8 {
        match self {
            Self::NonRecoverable { .. } => 1,
            Self::RecoverableWithProgress { .. } => 2,
            Self::RecoverableNoProgress { .. } => 2,
        }
    }
}

/// The final per-notification outcome reported to the host runtime (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// All sub-attempts succeeded or were classified dead; delete the message.
    Acked,
    /// At least one sub-attempt had partial progress and retry budget remained;
    /// a fresh message carrying the advanced offset was enqueued. Delete the original.
    Requeued,
    /// Non-recoverable at envelope/key/resolver stage, or retry budget exhausted
    /// with no further re-enqueue possible. Delete the message.
    Dead,
    /// Recoverable with no progress; let the host runtime's native redelivery retry.
    /// Do not delete the message.
    SurfaceRecoverable,
}

impl Verdict {
    /// True for verdicts that tell the host runtime to delete/ack the message.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acked | Self::Dead)
    }
}

/// Per-config-attempt outcome, before being folded into the notification-level [`Verdict`].
#[derive(Debug)]
pub enum AttemptOutcome {
    Success,
    Requeued,
    Dead,
    SurfaceRecoverable,
}

/// Folds the independent per-config outcomes of one notification into a single
/// verdict, picking the maximum severity across them (§4.8.6, §7): any
/// recoverable-surfacing outcome wins over requeue, which wins over dead/success.
pub fn fold_outcomes(outcomes: &[AttemptOutcome]) -> Verdict {
    // Zero sub-attempts means every matching config (if any) was filtered out
    // by the application filter (§8 scenario 6) — trivially successful, not dead.
    if outcomes.is_empty() {
        return Verdict::Acked;
    }

    let mut saw_requeued = false;
    let mut saw_dead = false;

    for outcome in outcomes {
        match outcome {
            AttemptOutcome::SurfaceRecoverable => return Verdict::SurfaceRecoverable,
            AttemptOutcome::Requeued => saw_requeued = true,
            AttemptOutcome::Dead => saw_dead = true,
            AttemptOutcome::Success => {}
        }
    }

    if saw_requeued {
        Verdict::Requeued
    } else if saw_dead {
        Verdict::Dead.max_with_success(outcomes)
    } else {
        Verdict::Acked
    }
}

impl Verdict {
    /// `dead` only wins the final verdict when *no* config succeeded; per spec §7
    /// "the final verdict ... any recoverable ⇒ retry; else if any dead ⇒ still ack
    /// (dead means don't retry)" — so a mix of dead + success is still Acked.
    fn max_with_success(self, outcomes: &[AttemptOutcome]) -> Verdict {
        let any_success = outcomes
            .iter()
            .any(|o| matches!(o, AttemptOutcome::Success));
        if any_success {
            Verdict::Acked
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_success_is_acked() {
        let outcomes = vec![AttemptOutcome::Success, AttemptOutcome::Success];
        assert_eq!(fold_outcomes(&outcomes), Verdict::Acked);
    }

    #[test]
    fn dead_and_success_is_still_acked() {
        let outcomes = vec![AttemptOutcome::Dead, AttemptOutcome::Success];
        assert_eq!(fold_outcomes(&outcomes), Verdict::Acked);
    }

    #[test]
    fn no_sub_attempts_is_acked() {
        assert_eq!(fold_outcomes(&[]), Verdict::Acked);
    }

    #[test]
    fn all_dead_is_dead() {
        let outcomes = vec![AttemptOutcome::Dead, AttemptOutcome::Dead];
        assert_eq!(fold_outcomes(&outcomes), Verdict::Dead);
    }

    #[test]
    fn any_requeue_wins_over_success() {
        let outcomes = vec![AttemptOutcome::Success, AttemptOutcome::Requeued];
        assert_eq!(fold_outcomes(&outcomes), Verdict::Requeued);
    }

    #[test]
    fn surface_recoverable_is_maximum_severity() {
        let outcomes = vec![
            AttemptOutcome::Requeued,
            AttemptOutcome::SurfaceRecoverable,
        ];
        assert_eq!(fold_outcomes(&outcomes), Verdict::SurfaceRecoverable);
    }

    #[test]
    fn disposition_severity_orders_recoverable_over_non_recoverable() {
        let a = Disposition::non_recoverable("x", std::io::Error::other("x"));
        let b = Disposition::recoverable_no_progress(std::io::Error::other("y"));
        assert!(b.severity() > a.severity());
    }
}
