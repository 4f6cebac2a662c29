//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the session password) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub market: MarketConfig,
    pub buying: BuyingConfig,
    pub selling: SellingConfig,
    pub pacing: PacingSection,
    pub backoff: BackoffSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Wallet balance below which the bank is tapped.
    pub fund_floor: u64,
    /// Cash never committed to purchases.
    pub emergency_reserve: u64,
    pub normal_wait_secs: u64,
    pub blocked_wait_secs: u64,
    /// 0 = run until stopped.
    pub max_cycles: u64,
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub username_env: String,
    pub password_env: String,
    pub max_auth_retries: u32,
    pub auth_retry_wait_secs: u64,
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub max_rows_per_scan: u32,
    pub items: Vec<ItemConfig>,
}

/// One tradeable item kind with its buy ceiling and resale reference.
#[derive(Debug, Deserialize, Clone)]
pub struct ItemConfig {
    pub kind: String,
    pub price_ceiling: u64,
    pub reference_price: u64,
    /// Lower number = higher preference.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuyingConfig {
    pub min_margin: f64,
    pub max_purchases_per_cycle: usize,
    pub per_kind_cap: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SellingConfig {
    pub markup: f64,
    pub min_markup: f64,
    pub max_markup: f64,
    pub inventory_pressure_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingSection {
    pub min_action_delay_ms: u64,
    pub max_action_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_actions_per_hour: u32,
    pub throttle_threshold: f64,
    pub max_throttle_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackoffSection {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_consecutive_failures: u32,
    pub cooldown_secs: u64,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn validate(&self) -> Result<()> {
        if self.market.items.is_empty() {
            anyhow::bail!("market.items must list at least one item kind");
        }
        if self.selling.min_markup > self.selling.max_markup {
            anyhow::bail!("selling.min_markup exceeds selling.max_markup");
        }
        if self.pacing.min_action_delay_ms > self.pacing.max_action_delay_ms {
            anyhow::bail!("pacing.min_action_delay_ms exceeds pacing.max_action_delay_ms");
        }
        if self.backoff.multiplier < 1.0 {
            anyhow::bail!("backoff.multiplier must be >= 1.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        // This test requires config.toml to be in the working directory,
        // which cargo guarantees for unit tests (crate root).
        let cfg = AppConfig::load("config.toml").expect("config.toml should parse");
        assert_eq!(cfg.agent.name, "MERCER-001");
        assert!(cfg.agent.fund_floor > 0);
        assert!(!cfg.market.items.is_empty());
        assert!(cfg.selling.min_markup <= cfg.selling.max_markup);
        assert!(cfg.pacing.min_action_delay_ms <= cfg.pacing.max_action_delay_ms);
        assert!(cfg.backoff.multiplier >= 1.0);
    }

    #[test]
    fn test_invalid_markup_range_rejected() {
        let toml = r#"
            [agent]
            name = "t"
            fund_floor = 100
            emergency_reserve = 50
            normal_wait_secs = 60
            blocked_wait_secs = 300
            max_cycles = 0
            dry_run = true

            [session]
            username_env = "U"
            password_env = "P"
            max_auth_retries = 3
            auth_retry_wait_secs = 30
            operation_timeout_secs = 60

            [market]
            max_rows_per_scan = 50
            [[market.items]]
            kind = "Bandage"
            price_ceiling = 12
            reference_price = 18

            [buying]
            min_margin = 0.15
            max_purchases_per_cycle = 10
            per_kind_cap = 5

            [selling]
            markup = 0.2
            min_markup = 0.5
            max_markup = 0.1
            inventory_pressure_threshold = 0.8

            [pacing]
            min_action_delay_ms = 800
            max_action_delay_ms = 2500
            jitter_ms = 400
            max_actions_per_hour = 50
            throttle_threshold = 0.6
            max_throttle_ms = 30000

            [backoff]
            base_delay_ms = 5000
            multiplier = 2.0
            max_delay_ms = 300000
            max_consecutive_failures = 3
            cooldown_secs = 300
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_item_priority_defaults() {
        let toml = r#"
            kind = "Bandage"
            price_ceiling = 12
            reference_price = 18
        "#;
        let item: ItemConfig = toml::from_str(toml).unwrap();
        assert_eq!(item.priority, 5);
    }
}
