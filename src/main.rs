//! MERCER: Autonomous Marketplace Flip-Trading Agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores session state from disk (or starts fresh), and runs the
//! trading cycle driver with graceful shutdown.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use mercer::config::{self, AppConfig};
use mercer::engine::driver::{CycleDriver, EngineSettings};
use mercer::engine::machine::MachineConfig;
use mercer::failure::BackoffPolicy;
use mercer::gateway::simulated::SimulatedSession;
use mercer::gateway::Credentials;
use mercer::pacing::{PacingConfig, PacingEngine};
use mercer::storage;
use mercer::strategy::{BuyPlanner, BuyPolicy, ItemPolicy, SellPlanner, SellPolicy};
use mercer::types::TradeState;

const STATE_FILE: &str = "mercer_state.json";

const BANNER: &str = r#"
 __  __ _____ ____   ____ _____ ____
|  \/  | ____|  _ \ / ___| ____|  _ \
| |\/| |  _| | |_) | |   |  _| | |_) |
| |  | | |___|  _ <| |___| |___|  _ <
|_|  |_|_____|_| \_\\____|_____|_| \_\

  Margin Extraction & Resource-Constrained Exchange Runner
  v0.1.0 — Autonomous Trader
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging(&cfg);

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        fund_floor = cfg.agent.fund_floor,
        item_kinds = cfg.market.items.len(),
        dry_run = cfg.agent.dry_run,
        "MERCER starting up"
    );

    // -- Restore or create session state ---------------------------------

    let restored = storage::load_session(Some(STATE_FILE))?;

    // -- Session gateway --------------------------------------------------

    // The live remote-session gateway is supplied by the host integration;
    // this binary always drives the simulated session.
    if !cfg.agent.dry_run {
        warn!("No live session gateway in this build — using the simulated session");
    }
    let session = Arc::new(SimulatedSession::new("simulated-marketplace"));

    let credentials = Credentials {
        username: AppConfig::resolve_env(&cfg.session.username_env).unwrap_or_else(|_| {
            warn!(env = %cfg.session.username_env, "Username env not set — using dry-run user");
            "dry-run-user".to_string()
        }),
        password: SecretString::new(
            AppConfig::resolve_env(&cfg.session.password_env).unwrap_or_default(),
        ),
    };

    // -- Build the engine -------------------------------------------------

    let items: HashMap<String, ItemPolicy> = cfg
        .market
        .items
        .iter()
        .map(|i| {
            (
                i.kind.clone(),
                ItemPolicy {
                    price_ceiling: i.price_ceiling,
                    reference_price: i.reference_price,
                    priority: i.priority,
                },
            )
        })
        .collect();
    let scan_kinds: Vec<String> = cfg.market.items.iter().map(|i| i.kind.clone()).collect();

    let buy_planner = BuyPlanner::new(BuyPolicy {
        items,
        min_margin: cfg.buying.min_margin,
        max_purchases_per_cycle: cfg.buying.max_purchases_per_cycle,
        per_kind_cap: cfg.buying.per_kind_cap,
        emergency_reserve: cfg.agent.emergency_reserve,
    });

    let sell_planner = SellPlanner::new(SellPolicy {
        markup: cfg.selling.markup,
        min_markup: cfg.selling.min_markup,
        max_markup: cfg.selling.max_markup,
        inventory_pressure_threshold: cfg.selling.inventory_pressure_threshold,
    });

    let pacing = PacingEngine::new(PacingConfig {
        min_action_delay: Duration::from_millis(cfg.pacing.min_action_delay_ms),
        max_action_delay: Duration::from_millis(cfg.pacing.max_action_delay_ms),
        jitter: Duration::from_millis(cfg.pacing.jitter_ms),
        max_actions_per_hour: cfg.pacing.max_actions_per_hour,
        throttle_threshold: cfg.pacing.throttle_threshold,
        max_throttle: Duration::from_millis(cfg.pacing.max_throttle_ms),
    });

    let backoff = BackoffPolicy {
        base_delay: Duration::from_millis(cfg.backoff.base_delay_ms),
        multiplier: cfg.backoff.multiplier,
        max_delay: Duration::from_millis(cfg.backoff.max_delay_ms),
        max_consecutive: cfg.backoff.max_consecutive_failures,
        cooldown: Duration::from_secs(cfg.backoff.cooldown_secs),
    };

    let settings = EngineSettings {
        normal_wait: Duration::from_secs(cfg.agent.normal_wait_secs),
        blocked_wait: Duration::from_secs(cfg.agent.blocked_wait_secs),
        auth_retry_wait: Duration::from_secs(cfg.session.auth_retry_wait_secs),
        operation_timeout: Duration::from_secs(cfg.session.operation_timeout_secs),
        max_cycles: cfg.agent.max_cycles,
        scan_kinds,
        max_rows_per_scan: cfg.market.max_rows_per_scan,
        state_file: Some(STATE_FILE.to_string()),
    };

    let machine_config = MachineConfig {
        fund_floor: cfg.agent.fund_floor,
        max_auth_retries: cfg.session.max_auth_retries,
    };

    let mut driver = CycleDriver::new(
        session,
        credentials,
        settings,
        machine_config,
        buy_planner,
        sell_planner,
        pacing,
        backoff,
    );
    if let Some(state) = restored {
        driver = driver.with_restored(state);
    }

    let stop = driver.stop_handle();
    let mut status = driver.status_feed();

    // External status logging: the engine publishes, this task narrates.
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let s = status.borrow().clone();
            debug!(
                state = %s.state,
                cycles = s.counters.cycles_completed,
                purchases = s.counters.purchases_confirmed,
                listings = s.counters.listings_created,
                "Status update"
            );
        }
    });

    // -- Run until stopped -------------------------------------------------

    info!("Entering trading loop. Press Ctrl+C to stop.");
    let mut engine = tokio::spawn(driver.run());

    let summary = tokio::select! {
        res = &mut engine => res.context("Engine task failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            stop.request_stop();
            (&mut engine).await.context("Engine task failed")?
        }
    };
    status_task.abort();

    info!(
        final_state = %summary.final_state,
        cycles = summary.counters.cycles_completed,
        purchases = summary.counters.purchases_confirmed,
        lost = summary.counters.offers_lost,
        listings = summary.counters.listings_created,
        holdings = summary.holdings.len(),
        "MERCER shut down."
    );

    if summary.final_state == TradeState::ErrorFatal {
        anyhow::bail!("engine halted on a fatal error — see logs for full context");
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mercer=info"));

    let json_logging = std::env::var("MERCER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
