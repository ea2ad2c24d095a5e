use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Paid plan, named the way the payments backend names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanCode {
    Week,
    Month,
    Quarter,
    Year,
}

impl PlanCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCode::Week => "week",
            PlanCode::Month => "month",
            PlanCode::Quarter => "quarter",
            PlanCode::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<PlanCode> {
        match s.trim() {
            "week" => Some(PlanCode::Week),
            "month" => Some(PlanCode::Month),
            "quarter" => Some(PlanCode::Quarter),
            "year" => Some(PlanCode::Year),
            _ => None,
        }
    }
}

/// Why access is granted (or not).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessReason {
    Subscription,
    Trial,
    #[default]
    None,
}

/// One normalized read of the user's entitlement state.
///
/// `ok` reports whether the status query itself succeeded; `has_access` is
/// the derived decision. The two are distinct: a backend that answers
/// "no grant" still produces `ok = true`.
///
/// Invariant: `has_access` is true iff `reason != None` and `until` (when
/// present) is strictly in the future at normalization time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntitlementSnapshot {
    pub ok: bool,
    pub has_access: bool,
    pub reason: AccessReason,
    pub until: Option<DateTime<Utc>>,
    pub plan: Option<PlanCode>,
    pub needs_policy: Option<bool>,
    pub is_auto_renew: Option<bool>,
}

impl EntitlementSnapshot {
    /// Failure shape: the query did not succeed, deny by default.
    pub fn denied() -> Self {
        Self {
            ok: false,
            has_access: false,
            reason: AccessReason::None,
            until: None,
            plan: None,
            needs_policy: None,
            is_auto_renew: None,
        }
    }

    /// Successful query, no active grant.
    pub fn no_access() -> Self {
        Self {
            ok: true,
            ..Self::denied()
        }
    }
}
