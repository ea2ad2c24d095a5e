//! Access gate: caching + request collapsing in front of the status backend.
//!
//! Every protected screen asks the gate "do I have access?" before rendering.
//! Several screens can ask during one render pass, so the gate absorbs the
//! duplicates three ways:
//! - a short cooldown window replays the last verdict for back-to-back calls
//!   caused by re-mounts;
//! - concurrent callers join a single in-flight resolution per user and all
//!   receive the same snapshot;
//! - verdicts are cached with asymmetric TTLs — positive entries live longer
//!   (trust a grant briefly), negative entries expire fast (re-check a denial
//!   soon rather than lock a paying user out).
//!
//! The gate never returns an error: any unresolved ambiguity degrades to a
//! structurally valid "no access" snapshot.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    config::Config,
    domain::{EntitlementSnapshot, UserId},
    identity::IdentityResolver,
    Result,
};

/// Port over the remote status backend. Implementations own the endpoint
/// fallback chain; the gate only sees the normalized outcome.
#[async_trait]
pub trait StatusPort: Send + Sync {
    async fn fetch_status(&self, user: UserId, start_trial: bool) -> Result<EntitlementSnapshot>;
}

#[derive(Clone, Copy, Debug)]
pub struct GateConfig {
    pub positive_ttl: Duration,
    pub negative_ttl: Duration,
    pub cooldown: Duration,
    /// How long past its TTL a positive entry still counts when a fresh
    /// check fails on the network.
    pub failure_grace: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            positive_ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(5),
            cooldown: Duration::from_millis(300),
            failure_grace: Duration::from_secs(120),
        }
    }
}

impl GateConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            positive_ttl: cfg.positive_ttl,
            negative_ttl: cfg.negative_ttl,
            cooldown: cfg.cooldown,
            failure_grace: cfg.failure_grace,
        }
    }
}

/// Per-call options. `start_trial` tells the backend it may activate a trial
/// as a side effect of this check; most call sites only want to look.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckOptions {
    pub start_trial: bool,
}

#[derive(Clone)]
struct CacheEntry {
    snapshot: EntitlementSnapshot,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct GateState {
    last_call_at: Option<DateTime<Utc>>,
    last_verdict: Option<EntitlementSnapshot>,
    positive: HashMap<UserId, CacheEntry>,
    negative: HashMap<UserId, CacheEntry>,
    in_flight: HashMap<UserId, watch::Receiver<Option<EntitlementSnapshot>>>,
}

enum CallPath {
    Join(watch::Receiver<Option<EntitlementSnapshot>>),
    Fetch(watch::Sender<Option<EntitlementSnapshot>>),
}

pub struct AccessGate {
    cfg: GateConfig,
    clock: Arc<dyn Clock>,
    identity: Arc<IdentityResolver>,
    backend: Arc<dyn StatusPort>,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(
        cfg: GateConfig,
        clock: Arc<dyn Clock>,
        identity: Arc<IdentityResolver>,
        backend: Arc<dyn StatusPort>,
    ) -> Self {
        Self {
            cfg,
            clock,
            identity,
            backend,
            state: Mutex::new(GateState::default()),
        }
    }

    /// The check every protected screen runs before rendering.
    pub async fn ensure_access(&self, opts: CheckOptions) -> EntitlementSnapshot {
        let Some(user) = self.identity.resolve().await else {
            debug!("no identity; denying without a network call");
            return EntitlementSnapshot::denied();
        };

        let path = {
            let mut st = self.state.lock().await;
            let now = self.clock.now();

            let within_cooldown = st.last_call_at.map_or(false, |prev| {
                now.signed_duration_since(prev) <= chrono_ms(self.cfg.cooldown)
            });
            st.last_call_at = Some(now);

            // Duplicate invocations from screen re-mounts replay the last
            // verdict; real caching is handled below.
            if within_cooldown {
                if let Some(snap) = st.last_verdict.clone() {
                    return snap;
                }
            }

            if let Some(entry) = st.positive.get(&user) {
                if entry.expires_at > now {
                    let snap = entry.snapshot.clone();
                    st.last_verdict = Some(snap.clone());
                    return snap;
                }
            }
            if let Some(entry) = st.negative.get(&user) {
                if entry.expires_at > now {
                    let snap = entry.snapshot.clone();
                    st.last_verdict = Some(snap.clone());
                    return snap;
                }
            }

            if let Some(rx) = st.in_flight.get(&user) {
                CallPath::Join(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                st.in_flight.insert(user, rx);
                CallPath::Fetch(tx)
            }
        };

        match path {
            CallPath::Join(mut rx) => match rx.wait_for(|v| v.is_some()).await {
                Ok(v) => (*v).clone().unwrap_or_else(EntitlementSnapshot::denied),
                Err(_) => {
                    // The resolving caller went away without publishing.
                    let mut st = self.state.lock().await;
                    st.in_flight.remove(&user);
                    EntitlementSnapshot::denied()
                }
            },
            CallPath::Fetch(tx) => {
                let snap = self.resolve_and_cache(user, opts.start_trial).await;
                let _ = tx.send(Some(snap.clone()));
                let mut st = self.state.lock().await;
                st.in_flight.remove(&user);
                st.last_verdict = Some(snap.clone());
                snap
            }
        }
    }

    /// Drop cached verdicts for a user, e.g. after a payment or policy
    /// acceptance changed their state server-side.
    pub async fn invalidate(&self, user: UserId) {
        let mut st = self.state.lock().await;
        st.positive.remove(&user);
        st.negative.remove(&user);
        st.last_verdict = None;
    }

    async fn resolve_and_cache(&self, user: UserId, start_trial: bool) -> EntitlementSnapshot {
        match self.backend.fetch_status(user, start_trial).await {
            Ok(snap) if snap.ok => {
                let mut st = self.state.lock().await;
                let now = self.clock.now();
                if snap.has_access {
                    st.positive.insert(
                        user,
                        CacheEntry {
                            snapshot: snap.clone(),
                            expires_at: now + chrono_ms(self.cfg.positive_ttl),
                        },
                    );
                    st.negative.remove(&user);
                } else {
                    st.negative.insert(
                        user,
                        CacheEntry {
                            snapshot: snap.clone(),
                            expires_at: now + chrono_ms(self.cfg.negative_ttl),
                        },
                    );
                }
                snap
            }
            Ok(_) => self.degraded(user, "status query reported failure").await,
            Err(e) => self.degraded(user, &e.to_string()).await,
        }
    }

    async fn degraded(&self, user: UserId, cause: &str) -> EntitlementSnapshot {
        let mut st = self.state.lock().await;
        let now = self.clock.now();

        // Flaky connectivity: a recently expired grant keeps working for a
        // grace window instead of bouncing the user to the paywall.
        if let Some(entry) = st.positive.get(&user) {
            if entry.expires_at + chrono_ms(self.cfg.failure_grace) > now {
                warn!(user = user.0, cause, "status check failed; serving cached grant");
                return entry.snapshot.clone();
            }
        }

        warn!(user = user.0, cause, "status check failed; denying");
        let snap = EntitlementSnapshot::denied();
        st.negative.insert(
            user,
            CacheEntry {
                snapshot: snap.clone(),
                expires_at: now + chrono_ms(self.cfg.negative_ttl),
            },
        );
        snap
    }
}

fn chrono_ms(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}
