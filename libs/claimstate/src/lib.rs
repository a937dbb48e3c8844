//! # prelude-claimstate
//!
//! Pure coordination logic for the prelude cluster gateway.
//!
//! The gateway binds users to pre-provisioned clusters by labeling claim
//! resources in a shared store. This library holds everything about that
//! coordination that can be decided without I/O:
//!
//! - The label state machine a claim moves through (`labels`)
//! - Normalization of user-supplied identifiers (`sanitize`)
//! - The pool duration grammar (`duration`)
//! - The autoscaler target state machine (`scale`)
//! - Claim selection for incoming users (`select`)
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs (selection takes
//!   its randomness as an argument)
//! - A phone label is only ever placed on a claim that already carries
//!   the sealed-credentials marker
//! - The autoscaler target never leaves `[base, max]`

mod duration;
mod labels;
mod sanitize;
mod scale;
mod select;

pub use duration::{format_age, format_duration, parse_duration, DurationError};
pub use labels::{ClaimLabels, AUTH_DONE, AUTH_LABEL, FINGERPRINT_LABEL, PHONE_LABEL};
pub use sanitize::{sanitize_fingerprint, sanitize_phone};
pub use scale::{claims_needed, missing_claim_names, ScaleDecision, ScalePolicy, ScaleState};
pub use select::{select_claim, ClaimCandidate, Selection};
