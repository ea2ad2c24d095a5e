use std::sync::Arc;

use pomni_api::ApiClient;
use pomni_core::{
    clock::SystemClock,
    config::Config,
    domain::PlanCode,
    gate::{AccessGate, CheckOptions, GateConfig},
    identity::{IdentityResolver, IdentitySettings, InitDataPort},
    Error,
};

/// Outside Telegram the "host environment" is just the process environment:
/// identity and the signed init-data blob come from config.
struct EnvInitData {
    user_id: Option<i64>,
    init_data: Option<String>,
}

impl InitDataPort for EnvInitData {
    fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    fn init_data_raw(&self) -> Option<String> {
        self.init_data.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    pomni_core::logging::init("pomni")?;

    let cfg = Arc::new(Config::load()?);
    let api = Arc::new(ApiClient::new(&cfg));
    let identity = Arc::new(IdentityResolver::new(
        Arc::new(EnvInitData {
            user_id: cfg.tg_user_id,
            init_data: cfg.init_data.clone(),
        }),
        IdentitySettings::from_config(&cfg),
    ));
    let gate = AccessGate::new(
        GateConfig::from_config(&cfg),
        Arc::new(SystemClock),
        identity.clone(),
        api.clone(),
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("status") => {
            let start_trial = args.iter().any(|a| a == "--start-trial");
            let snap = gate.ensure_access(CheckOptions { start_trial }).await;
            println!("{}", serde_json::to_string_pretty(&snap)?);
        }
        Some("accept") => {
            let user = identity.resolve().await.ok_or(Error::NoUser)?;
            match api.accept_policy(user).await {
                Ok(()) => {
                    gate.invalidate(user).await;
                    println!("policy accepted");
                }
                Err(Error::AcceptUnavailable) => {
                    // Older backends accept the policy in the bot chat.
                    println!(
                        "accept endpoint not deployed; open https://t.me/{}?start=policy instead",
                        cfg.bot_username
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Some("pay") => {
            let plan = args
                .get(1)
                .and_then(|s| PlanCode::parse(s))
                .ok_or_else(|| Error::Config("usage: pomni pay <week|month|quarter|year>".to_string()))?;
            let user = identity.resolve().await.ok_or(Error::NoUser)?;
            let url = api.create_payment_link(user, plan, &cfg.return_url).await?;
            println!("{url}");
        }
        Some("track") => {
            let event = args
                .get(1)
                .ok_or_else(|| Error::Config("usage: pomni track <event> [action]".to_string()))?;
            let user = identity.resolve().await.ok_or(Error::NoUser)?;
            api.track_event(user, event, args.get(2).map(String::as_str), None)
                .await;
        }
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown command: {other} (expected status, accept, pay, track)"
            )));
        }
    }

    Ok(())
}
