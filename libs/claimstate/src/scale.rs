//! The autoscaler target state machine.
//!
//! The pool autoscaler maintains an effective claim target between a
//! base and a maximum. The target grows while the pool is close to
//! exhaustion (rate-limited by a cooldown so one scale-up can take
//! effect before the next) and shrinks back to base only after claims
//! have been freely available for a sustained period (hysteresis, so a
//! brief burst of availability does not flap the target).
//!
//! The state machine is pure: callers feed it observations and a clock.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

/// Autoscaler tuning parameters.
#[derive(Debug, Clone)]
pub struct ScalePolicy {
    /// Baseline claim target.
    pub base: usize,

    /// Upper bound on the claim target.
    pub max: usize,

    /// How many claims each scale-up adds.
    pub increment: usize,

    /// Scale up once the available count drops to this threshold.
    pub available_threshold: usize,

    /// Minimum spacing between scale-ups.
    pub scale_up_cooldown: Duration,

    /// How long claims must stay available before scaling back down.
    pub scale_down_after: Duration,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            base: 4,
            max: 10,
            increment: 1,
            available_threshold: 1,
            scale_up_cooldown: Duration::minutes(25),
            scale_down_after: Duration::minutes(10),
        }
    }
}

/// What a single observation decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Nothing changed.
    Hold,

    /// The target was raised.
    ScaleUp { from: usize, to: usize },

    /// Scale-up wanted but a previous one is still taking effect.
    CoolingDown { since_last: Duration },

    /// Availability was first observed; the scale-down timer started.
    AvailabilityTimerStarted { available: usize },

    /// The target was reset to base after sustained availability.
    ScaleDown { from: usize, to: usize },
}

/// Mutable autoscaler state: the effective target plus the two timers.
#[derive(Debug, Clone)]
pub struct ScaleState {
    target: usize,
    available_since: Option<DateTime<Utc>>,
    last_scale_up: Option<DateTime<Utc>>,
}

impl ScaleState {
    pub fn new(policy: &ScalePolicy) -> Self {
        Self {
            target: policy.base,
            available_since: None,
            last_scale_up: None,
        }
    }

    /// The current effective claim target.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Feed one observation of the pool into the state machine.
    ///
    /// `available` counts sealed, unassigned claims; `ready` counts all
    /// sealed claims. Scale-up is only considered once at least one
    /// claim has ever been sealed, so a cold pool does not grow past
    /// its base before the first cluster is even usable.
    pub fn observe(
        &mut self,
        policy: &ScalePolicy,
        now: DateTime<Utc>,
        available: usize,
        ready: usize,
    ) -> ScaleDecision {
        if available <= policy.available_threshold && ready > 0 {
            // Exhaustion zone: any pending scale-down is abandoned.
            self.available_since = None;

            if self.target >= policy.max {
                return ScaleDecision::Hold;
            }
            if let Some(last) = self.last_scale_up {
                let since_last = now - last;
                if since_last < policy.scale_up_cooldown {
                    return ScaleDecision::CoolingDown { since_last };
                }
            }
            let from = self.target;
            self.target = (self.target + policy.increment).min(policy.max);
            self.last_scale_up = Some(now);
            return ScaleDecision::ScaleUp {
                from,
                to: self.target,
            };
        }

        if available > policy.available_threshold {
            match self.available_since {
                None => {
                    self.available_since = Some(now);
                    return ScaleDecision::AvailabilityTimerStarted { available };
                }
                Some(since) => {
                    if self.target > policy.base && now - since >= policy.scale_down_after {
                        let from = self.target;
                        self.target = policy.base;
                        self.available_since = None;
                        return ScaleDecision::ScaleDown {
                            from,
                            to: self.target,
                        };
                    }
                }
            }
        }

        ScaleDecision::Hold
    }
}

/// How many claims must be created to reach the effective target,
/// never asking for more claims than provisioned clusters exist.
pub fn claims_needed(target: usize, provisioned: usize, existing: usize) -> usize {
    target.min(provisioned).saturating_sub(existing)
}

/// Produce the next `needed` claim names of the form `<prefix>1`,
/// `<prefix>2`, …, skipping names that already exist.
pub fn missing_claim_names(
    prefix: &str,
    existing: &HashSet<String>,
    needed: usize,
) -> Vec<String> {
    let mut out = Vec::with_capacity(needed);
    let mut i = 1usize;
    while out.len() < needed {
        let name = format!("{prefix}{i}");
        if !existing.contains(&name) {
            out.push(name);
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> ScalePolicy {
        ScalePolicy::default()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn starts_at_base() {
        let state = ScaleState::new(&policy());
        assert_eq!(state.target(), 4);
    }

    #[test]
    fn scales_up_on_exhaustion() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);

        let decision = state.observe(&policy, t0(), 1, 4);
        assert_eq!(decision, ScaleDecision::ScaleUp { from: 4, to: 5 });
        assert_eq!(state.target(), 5);
    }

    #[test]
    fn scale_up_respects_cooldown() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);

        state.observe(&policy, t0(), 0, 3);
        let too_soon = t0() + Duration::minutes(10);
        assert!(matches!(
            state.observe(&policy, too_soon, 0, 3),
            ScaleDecision::CoolingDown { .. }
        ));
        assert_eq!(state.target(), 5);

        // One second past the cooldown the next increment lands.
        let later = t0() + Duration::minutes(25) + Duration::seconds(1);
        assert_eq!(
            state.observe(&policy, later, 1, 4),
            ScaleDecision::ScaleUp { from: 5, to: 6 }
        );
    }

    #[test]
    fn scale_up_never_exceeds_max() {
        let policy = ScalePolicy {
            max: 5,
            increment: 3,
            ..policy()
        };
        let mut state = ScaleState::new(&policy);

        assert_eq!(
            state.observe(&policy, t0(), 0, 2),
            ScaleDecision::ScaleUp { from: 4, to: 5 }
        );
        let later = t0() + Duration::minutes(30);
        assert_eq!(state.observe(&policy, later, 0, 2), ScaleDecision::Hold);
        assert_eq!(state.target(), 5);
    }

    #[test]
    fn no_scale_up_before_first_ready_claim() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);

        assert_eq!(state.observe(&policy, t0(), 0, 0), ScaleDecision::Hold);
        assert_eq!(state.target(), 4);
    }

    #[test]
    fn scales_down_after_sustained_availability() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);

        state.observe(&policy, t0(), 1, 4);
        assert_eq!(state.target(), 5);

        let seen = t0() + Duration::minutes(1);
        assert_eq!(
            state.observe(&policy, seen, 3, 5),
            ScaleDecision::AvailabilityTimerStarted { available: 3 }
        );

        let not_yet = seen + Duration::minutes(5);
        assert_eq!(state.observe(&policy, not_yet, 3, 5), ScaleDecision::Hold);

        let enough = seen + Duration::minutes(10);
        assert_eq!(
            state.observe(&policy, enough, 3, 5),
            ScaleDecision::ScaleDown { from: 5, to: 4 }
        );
        assert_eq!(state.target(), 4);
    }

    #[test]
    fn exhaustion_cancels_the_availability_timer() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);

        state.observe(&policy, t0(), 1, 4);
        state.observe(&policy, t0() + Duration::minutes(1), 3, 5);

        // Dip back into exhaustion: the timer must restart from scratch.
        state.observe(&policy, t0() + Duration::minutes(2), 1, 5);

        let seen_again = t0() + Duration::minutes(3);
        assert_eq!(
            state.observe(&policy, seen_again, 3, 5),
            ScaleDecision::AvailabilityTimerStarted { available: 3 }
        );
    }

    #[test]
    fn target_stays_within_bounds_over_random_walk() {
        let policy = policy();
        let mut state = ScaleState::new(&policy);
        let mut now = t0();
        for step in 0..200usize {
            now += Duration::minutes(7);
            let available = step % 4;
            let ready = 4 + step % 3;
            state.observe(&policy, now, available, ready);
            assert!(state.target() >= policy.base);
            assert!(state.target() <= policy.max);
        }
    }

    #[test]
    fn needed_claims_capped_by_provisioned() {
        assert_eq!(claims_needed(5, 3, 2), 1);
        assert_eq!(claims_needed(5, 10, 2), 3);
        assert_eq!(claims_needed(4, 4, 6), 0);
    }

    #[test]
    fn missing_names_skip_existing() {
        let existing: HashSet<String> = ["prelude1", "prelude3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            missing_claim_names("prelude", &existing, 3),
            vec!["prelude2", "prelude4", "prelude5"]
        );
    }

    #[test]
    fn fifth_claim_gets_the_next_synthetic_name() {
        let existing: HashSet<String> = (1..=4).map(|i| format!("prelude{i}")).collect();
        assert_eq!(
            missing_claim_names("prelude", &existing, 1),
            vec!["prelude5"]
        );
    }
}
