//! Normalization of backend status responses.
//!
//! The status contract has gone through several incompatible generations:
//! - canonical: `has_access` / `status` / `until` / `plan` / `is_auto_renew`
//!   / `needs_policy`
//! - legacy: `trial_started_at` / `trial_expires_at` / `subscription_until`,
//!   with the trial deadline computed client-side when no explicit expiry is
//!   given.
//!
//! Whatever shape comes back is folded into one [`EntitlementSnapshot`].
//! Parsing is field-by-field and never fails: a malformed or missing field
//! degrades to absent, not to an error.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::domain::{AccessReason, EntitlementSnapshot, PlanCode};

/// Trial length when the backend reports only `trial_started_at`.
pub const TRIAL_FALLBACK_DAYS: i64 = 5;

/// Any of these keys marks a canonical-generation response.
const CANONICAL_KEYS: &[&str] = &[
    "has_access",
    "status",
    "until",
    "plan",
    "is_auto_renew",
    "needs_policy",
];

/// Normalize a raw status body into a snapshot, evaluated at `now`.
pub fn snapshot_from_value(raw: &Value, now: DateTime<Utc>) -> EntitlementSnapshot {
    let snap = if CANONICAL_KEYS.iter().any(|k| raw.get(k).is_some()) {
        canonical_snapshot(raw, now)
    } else {
        legacy_snapshot(raw, now)
    };
    clamp_expired(snap, now)
}

fn canonical_snapshot(raw: &Value, now: DateTime<Utc>) -> EntitlementSnapshot {
    let status = raw.get("status").and_then(Value::as_str).unwrap_or("");
    let until = parse_ts(raw.get("until"));

    // Older fields may still ride along on canonical responses.
    let sub_until = parse_ts(raw.get("subscription_until"));
    let trial_until = parse_ts(raw.get("trial_expires_at")).or_else(|| {
        parse_ts(raw.get("trial_started_at")).map(|t| t + Duration::days(TRIAL_FALLBACK_DAYS))
    });

    let active = status == "active" && is_future(until, now);
    let trial = status == "trial" && is_future(until, now);

    // An explicit has_access flag is authoritative; otherwise compute from
    // status + until. Subscription wins over trial when both are live.
    let has_access = parse_bool(raw.get("has_access")).unwrap_or(active || trial);
    let subscription = active || is_future(sub_until, now);

    let reason = if !has_access {
        AccessReason::None
    } else if subscription {
        AccessReason::Subscription
    } else {
        AccessReason::Trial
    };

    let until = until.or(match reason {
        AccessReason::Subscription => sub_until,
        AccessReason::Trial => trial_until,
        AccessReason::None => trial_until.or(sub_until),
    });

    EntitlementSnapshot {
        ok: true,
        has_access,
        reason,
        until,
        plan: parse_plan(raw.get("plan")),
        needs_policy: parse_bool(raw.get("needs_policy")),
        is_auto_renew: parse_bool(raw.get("is_auto_renew")),
    }
}

fn legacy_snapshot(raw: &Value, now: DateTime<Utc>) -> EntitlementSnapshot {
    let sub_until = parse_ts(raw.get("subscription_until"));
    let trial_until = parse_ts(raw.get("trial_expires_at")).or_else(|| {
        parse_ts(raw.get("trial_started_at")).map(|t| t + Duration::days(TRIAL_FALLBACK_DAYS))
    });

    let plan = parse_plan(raw.get("plan"));
    let is_auto_renew = parse_bool(raw.get("is_auto_renew"));

    let (has_access, reason, until) = if is_future(sub_until, now) {
        (true, AccessReason::Subscription, sub_until)
    } else if is_future(trial_until, now) {
        (true, AccessReason::Trial, trial_until)
    } else {
        (false, AccessReason::None, trial_until.or(sub_until))
    };

    EntitlementSnapshot {
        ok: true,
        has_access,
        reason,
        until,
        plan,
        needs_policy: None,
        is_auto_renew,
    }
}

/// Expiry is authoritative over any earlier flag: a grant whose deadline has
/// already passed presents as no access.
fn clamp_expired(mut snap: EntitlementSnapshot, now: DateTime<Utc>) -> EntitlementSnapshot {
    if snap.has_access {
        if let Some(t) = snap.until {
            if t <= now {
                snap.has_access = false;
            }
        }
    }
    if !snap.has_access {
        snap.reason = AccessReason::None;
    }
    snap
}

fn parse_ts(v: Option<&Value>) -> Option<DateTime<Utc>> {
    let s = v?.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_bool(v: Option<&Value>) -> Option<bool> {
    v?.as_bool()
}

fn parse_plan(v: Option<&Value>) -> Option<PlanCode> {
    v?.as_str().and_then(PlanCode::parse)
}

fn is_future(t: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    t.map_or(false, |t| t > now)
}
