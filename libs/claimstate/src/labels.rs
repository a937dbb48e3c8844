//! The claim label state machine.
//!
//! Claims coordinate the three control loops through three labels:
//!
//! - `prelude-auth=done` — credentials have been sealed; the claim is
//!   eligible for assignment
//! - `prelude=<phone>` — the claim is assigned to this user
//! - `prelude-fp=<fingerprint>` — the device the assignment was made from
//!
//! Legal combinations are: no labels, `{auth}`, and `{auth, phone}` with
//! an optional fingerprint. A phone label without the auth marker must
//! never be written.

use std::collections::BTreeMap;

/// Label carrying the sanitized phone number of the assigned user.
pub const PHONE_LABEL: &str = "prelude";

/// Label marking a claim whose credentials have been sealed.
pub const AUTH_LABEL: &str = "prelude-auth";

/// Value of [`AUTH_LABEL`] once sealing has committed.
pub const AUTH_DONE: &str = "done";

/// Label carrying the device fingerprint of the assigned user.
pub const FINGERPRINT_LABEL: &str = "prelude-fp";

/// Parsed view of the coordination labels on a claim.
///
/// Empty label values are treated the same as absent labels, so `phone`
/// and `fingerprint` are `None` rather than `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimLabels {
    pub auth_done: bool,
    pub phone: Option<String>,
    pub fingerprint: Option<String>,
}

impl ClaimLabels {
    /// Parse the coordination labels out of a resource label map.
    pub fn from_map(labels: &BTreeMap<String, String>) -> Self {
        let non_empty = |key: &str| {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        Self {
            auth_done: labels.get(AUTH_LABEL).map(String::as_str) == Some(AUTH_DONE),
            phone: non_empty(PHONE_LABEL),
            fingerprint: non_empty(FINGERPRINT_LABEL),
        }
    }

    /// An available claim is sealed and not yet assigned to anyone.
    pub fn is_available(&self) -> bool {
        self.auth_done && self.phone.is_none()
    }

    /// A ready claim is sealed, assigned or not.
    pub fn is_ready(&self) -> bool {
        self.auth_done
    }

    /// A phone label may only exist alongside the auth marker.
    pub fn is_legal(&self) -> bool {
        self.phone.is_none() || self.auth_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_empty_map() {
        let labels = ClaimLabels::from_map(&BTreeMap::new());
        assert!(!labels.auth_done);
        assert!(labels.phone.is_none());
        assert!(labels.fingerprint.is_none());
        assert!(labels.is_legal());
        assert!(!labels.is_available());
    }

    #[test]
    fn empty_values_read_as_absent() {
        let labels = ClaimLabels::from_map(&map(&[
            (AUTH_LABEL, AUTH_DONE),
            (PHONE_LABEL, ""),
            (FINGERPRINT_LABEL, ""),
        ]));
        assert!(labels.is_available());
        assert_eq!(labels.phone, None);
        assert_eq!(labels.fingerprint, None);
    }

    #[test]
    fn assigned_claim_is_ready_but_not_available() {
        let labels = ClaimLabels::from_map(&map(&[
            (AUTH_LABEL, AUTH_DONE),
            (PHONE_LABEL, "61-435-999-768"),
            (FINGERPRINT_LABEL, "abc123deadbeef01"),
        ]));
        assert!(labels.is_ready());
        assert!(!labels.is_available());
        assert!(labels.is_legal());
    }

    #[test]
    fn auth_label_requires_exact_value() {
        let labels = ClaimLabels::from_map(&map(&[(AUTH_LABEL, "pending")]));
        assert!(!labels.auth_done);
    }

    #[test]
    fn phone_without_auth_is_illegal() {
        let labels = ClaimLabels::from_map(&map(&[(PHONE_LABEL, "61-435-999-768")]));
        assert!(!labels.is_legal());
    }
}
