//! Authentication outcomes and their merge lattice

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of presenting a credential to one or more realms.
///
/// Outcomes from several realms combine with [`merge`](Self::merge), which
/// is the join of a total order: FAILURE < TOO_MANY_ATTEMPTS <
/// PASSWORD_CHANGE_REQUIRED < SUCCESS. New variants must keep that join
/// commutative and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationResult {
    Success,
    Failure,
    TooManyAttempts,
    PasswordChangeRequired,
}

impl AuthenticationResult {
    pub const ALL: [AuthenticationResult; 4] = [
        AuthenticationResult::Success,
        AuthenticationResult::Failure,
        AuthenticationResult::TooManyAttempts,
        AuthenticationResult::PasswordChangeRequired,
    ];

    fn severity(self) -> u8 {
        match self {
            AuthenticationResult::Failure => 0,
            AuthenticationResult::TooManyAttempts => 1,
            AuthenticationResult::PasswordChangeRequired => 2,
            AuthenticationResult::Success => 3,
        }
    }

    /// Combine two outcomes. SUCCESS dominates; otherwise the more severe
    /// outcome wins and ties keep `self`.
    #[must_use]
    pub fn merge(self, other: AuthenticationResult) -> AuthenticationResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Whether the coordinator may serve this outcome from its cache.
    ///
    /// Failures and lockouts are never cached so a corrected password or an
    /// expired lockout takes effect on the next attempt.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            AuthenticationResult::Success | AuthenticationResult::PasswordChangeRequired
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthenticationResult::Success => "SUCCESS",
            AuthenticationResult::Failure => "FAILURE",
            AuthenticationResult::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            AuthenticationResult::PasswordChangeRequired => "PASSWORD_CHANGE_REQUIRED",
        }
    }
}

impl fmt::Display for AuthenticationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::AuthenticationResult::*;
    use super::*;
    use proptest::prelude::*;

    fn any_result() -> impl Strategy<Value = AuthenticationResult> {
        proptest::sample::select(AuthenticationResult::ALL.to_vec())
    }

    #[test]
    fn test_merge_table() {
        assert_eq!(Failure.merge(TooManyAttempts), TooManyAttempts);
        assert_eq!(TooManyAttempts.merge(PasswordChangeRequired), PasswordChangeRequired);
        assert_eq!(PasswordChangeRequired.merge(Failure), PasswordChangeRequired);
        assert_eq!(Failure.merge(Success), Success);
        assert_eq!(Success.merge(Failure), Success);
    }

    #[test]
    fn test_only_success_and_password_change_are_cacheable() {
        assert!(Success.is_cacheable());
        assert!(PasswordChangeRequired.is_cacheable());
        assert!(!Failure.is_cacheable());
        assert!(!TooManyAttempts.is_cacheable());
    }

    proptest! {
        #[test]
        fn prop_merge_commutes(a in any_result(), b in any_result()) {
            prop_assert_eq!(a.merge(b), b.merge(a));
        }

        #[test]
        fn prop_success_dominates(x in any_result()) {
            prop_assert_eq!(Success.merge(x), Success);
            prop_assert_eq!(x.merge(Success), Success);
        }

        #[test]
        fn prop_merge_idempotent(a in any_result()) {
            prop_assert_eq!(a.merge(a), a);
        }

        #[test]
        fn prop_merge_associative(a in any_result(), b in any_result(), c in any_result()) {
            prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        }

        #[test]
        fn prop_success_needs_a_reporter(results in proptest::collection::vec(any_result(), 1..6)) {
            let merged = results.iter().copied().reduce(AuthenticationResult::merge).unwrap();
            prop_assert_eq!(merged == Success, results.contains(&Success));
        }
    }
}
