//! Claim selection for an incoming user.
//!
//! Selection runs over a snapshot of the pool's claims and decides which
//! claim (if any) the caller should be bound to. The interesting cases:
//!
//! - **Affinity**: a user who already holds a claim is re-bound to it,
//!   so retries within a lifetime are deterministic.
//! - **Device conflict**: a device fingerprint already tied to a
//!   different user's claim blocks a second grab from the same browser.
//! - **Fresh selection**: otherwise one available claim is picked
//!   uniformly at random. Random rather than head-of-list, so
//!   concurrent requests spread across claims instead of all colliding
//!   on the same optimistic update.

use rand::Rng;

use crate::labels::ClaimLabels;

/// Snapshot of one claim, as selection sees it.
#[derive(Debug, Clone)]
pub struct ClaimCandidate {
    pub name: String,
    pub labels: ClaimLabels,
}

/// Outcome of a selection pass. Indices refer into the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The caller already holds this claim.
    Affinity {
        index: usize,
        /// The stored fingerprint is absent or differs from the
        /// caller's and should be backfilled.
        fingerprint_stale: bool,
    },

    /// The caller's device already holds a claim under another phone.
    DeviceConflict { holder_phone: String },

    /// A previously unassigned claim was picked for the caller.
    Fresh { index: usize },

    /// Every sealed claim is already assigned.
    Exhausted,
}

/// Decide which claim the caller should be bound to.
///
/// `phone` must already be sanitized and non-empty; `fingerprint` must
/// already be sanitized (empty means the device check is skipped).
/// Claims that are not sealed are invisible to every branch, which is
/// what keeps a phone label from ever landing on an unsealed claim.
pub fn select_claim<R: Rng + ?Sized>(
    claims: &[ClaimCandidate],
    phone: &str,
    fingerprint: &str,
    rng: &mut R,
) -> Selection {
    // Affinity re-bind wins over everything else.
    for (index, claim) in claims.iter().enumerate() {
        if !claim.labels.auth_done {
            continue;
        }
        if claim.labels.phone.as_deref() == Some(phone) {
            let fingerprint_stale = !fingerprint.is_empty()
                && claim.labels.fingerprint.as_deref() != Some(fingerprint);
            return Selection::Affinity {
                index,
                fingerprint_stale,
            };
        }
    }

    // A device that already holds someone else's claim is turned away.
    if !fingerprint.is_empty() {
        for claim in claims {
            if !claim.labels.auth_done {
                continue;
            }
            if claim.labels.fingerprint.as_deref() == Some(fingerprint) {
                if let Some(holder) = claim.labels.phone.as_deref() {
                    if holder != phone {
                        return Selection::DeviceConflict {
                            holder_phone: holder.to_string(),
                        };
                    }
                }
            }
        }
    }

    let available: Vec<usize> = claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.labels.is_available())
        .map(|(i, _)| i)
        .collect();

    if available.is_empty() {
        return Selection::Exhausted;
    }
    let index = available[rng.gen_range(0..available.len())];
    Selection::Fresh { index }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    fn candidate(name: &str, auth: bool, phone: Option<&str>, fp: Option<&str>) -> ClaimCandidate {
        ClaimCandidate {
            name: name.to_string(),
            labels: ClaimLabels {
                auth_done: auth,
                phone: phone.map(|s| s.to_string()),
                fingerprint: fp.map(|s| s.to_string()),
            },
        }
    }

    fn rng() -> StepRng {
        StepRng::new(0, 1)
    }

    #[test]
    fn fresh_selection_only_touches_available_claims() {
        let claims = vec![
            candidate("p1", false, None, None),
            candidate("p2", true, Some("415-555-0100"), Some("aa")),
            candidate("p3", true, None, None),
        ];
        let selection = select_claim(&claims, "61-435-999-768", "abc123deadbeef01", &mut rng());
        assert_eq!(selection, Selection::Fresh { index: 2 });
    }

    #[test]
    fn affinity_rebinds_to_the_same_claim() {
        let claims = vec![
            candidate("p1", true, None, None),
            candidate("p2", true, Some("61-435-999-768"), Some("abc123deadbeef01")),
        ];
        let selection = select_claim(&claims, "61-435-999-768", "abc123deadbeef01", &mut rng());
        assert_eq!(
            selection,
            Selection::Affinity {
                index: 1,
                fingerprint_stale: false
            }
        );
    }

    #[test]
    fn affinity_flags_missing_fingerprint_for_backfill() {
        let claims = vec![candidate("p1", true, Some("61-435-999-768"), None)];
        let selection = select_claim(&claims, "61-435-999-768", "abc123deadbeef01", &mut rng());
        assert_eq!(
            selection,
            Selection::Affinity {
                index: 0,
                fingerprint_stale: true
            }
        );
    }

    #[test]
    fn affinity_ignores_unsealed_claims() {
        let claims = vec![candidate("p1", false, Some("61-435-999-768"), None)];
        let selection = select_claim(&claims, "61-435-999-768", "", &mut rng());
        assert_eq!(selection, Selection::Exhausted);
    }

    #[test]
    fn device_conflict_rejects_second_phone() {
        let claims = vec![
            candidate("p1", true, Some("61-435-999-768"), Some("abc123deadbeef01")),
            candidate("p2", true, None, None),
        ];
        let selection = select_claim(&claims, "1-415-555-0100", "abc123deadbeef01", &mut rng());
        assert_eq!(
            selection,
            Selection::DeviceConflict {
                holder_phone: "61-435-999-768".to_string()
            }
        );
    }

    #[test]
    fn empty_fingerprint_skips_the_device_check() {
        let claims = vec![
            candidate("p1", true, Some("61-435-999-768"), Some("abc123deadbeef01")),
            candidate("p2", true, None, None),
        ];
        let selection = select_claim(&claims, "1-415-555-0100", "", &mut rng());
        assert_eq!(selection, Selection::Fresh { index: 1 });
    }

    #[test]
    fn exhausted_pool_rejects_new_phones() {
        let claims = vec![
            candidate("p1", true, Some("a"), None),
            candidate("p2", true, Some("b"), None),
            candidate("p3", false, None, None),
        ];
        let selection = select_claim(&claims, "c", "", &mut rng());
        assert_eq!(selection, Selection::Exhausted);
    }

    #[test]
    fn random_choice_covers_all_available_claims() {
        let claims = vec![
            candidate("p1", true, None, None),
            candidate("p2", true, None, None),
            candidate("p3", true, None, None),
        ];
        let mut seen = std::collections::HashSet::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            match select_claim(&claims, "61-435-999-768", "", &mut rng) {
                Selection::Fresh { index } => {
                    seen.insert(index);
                }
                other => panic!("unexpected selection: {other:?}"),
            }
        }
        assert_eq!(seen.len(), 3);
    }
}
