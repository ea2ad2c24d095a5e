use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for the mini app access layer.
///
/// Everything comes from the environment (with `.env` support) so the same
/// binary runs against staging and production backends unchanged.
#[derive(Clone, Debug)]
pub struct Config {
    /// Backend base URL, no trailing slash.
    pub api_base: String,
    /// Bot the "talk" action deep-links to.
    pub bot_username: String,
    /// Where the payment provider sends the user back after checkout.
    pub return_url: String,

    // Identity
    pub tg_user_id: Option<i64>,
    pub init_data: Option<String>,
    pub debug_tg_user_id: Option<i64>,
    pub id_poll_tries: u32,
    pub id_poll_delay: Duration,

    // HTTP
    pub http_timeout: Duration,

    // Gate
    pub positive_ttl: Duration,
    pub negative_ttl: Duration,
    pub cooldown: Duration,
    pub failure_grace: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let api_base = normalize_base(env_str("POMNI_API_BASE").as_deref());
        if api_base.is_empty() {
            return Err(Error::Config(
                "POMNI_API_BASE environment variable is required".to_string(),
            ));
        }

        let bot_username =
            env_str("POMNI_BOT_USERNAME").unwrap_or_else(|| "reflectttaibot".to_string());
        let return_url = env_str("POMNI_RETURN_URL")
            .unwrap_or_else(|| format!("{api_base}/paywall?status=ok"));

        let tg_user_id = env_str("POMNI_TG_USER_ID").and_then(|s| parse_numeric_id(&s));
        let init_data = env_str("POMNI_INIT_DATA").and_then(non_empty);
        let debug_tg_user_id =
            env_str("POMNI_DEBUG_TG_USER_ID").and_then(|s| parse_numeric_id(&s));

        let id_poll_tries = env_u32("POMNI_ID_POLL_TRIES").unwrap_or(12);
        let id_poll_delay = Duration::from_millis(env_u64("POMNI_ID_POLL_DELAY_MS").unwrap_or(120));

        let http_timeout = Duration::from_millis(env_u64("POMNI_HTTP_TIMEOUT_MS").unwrap_or(10_000));

        let positive_ttl = Duration::from_millis(env_u64("POMNI_POSITIVE_TTL_MS").unwrap_or(60_000));
        let negative_ttl = Duration::from_millis(env_u64("POMNI_NEGATIVE_TTL_MS").unwrap_or(5_000));
        let cooldown = Duration::from_millis(env_u64("POMNI_GATE_COOLDOWN_MS").unwrap_or(300));
        let failure_grace =
            Duration::from_millis(env_u64("POMNI_FAILURE_GRACE_MS").unwrap_or(120_000));

        Ok(Self {
            api_base,
            bot_username,
            return_url,
            tg_user_id,
            init_data,
            debug_tg_user_id,
            id_poll_tries,
            id_poll_delay,
            http_timeout,
            positive_ttl,
            negative_ttl,
            cooldown,
            failure_grace,
        })
    }
}

/// Strip trailing slashes so paths can be appended verbatim.
pub fn normalize_base(s: Option<&str>) -> String {
    s.unwrap_or("").trim().trim_end_matches('/').to_string()
}

/// Debug/override identities travel as strings; accept only plain digits.
pub fn parse_numeric_id(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<i64>().ok()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
