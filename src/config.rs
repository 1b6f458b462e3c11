//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub use crate::bots::{BackupConfig, OriginConfig, RiskConfig};
pub use crate::breaker::CircuitBreakerConfig;
pub use crate::executor::ExecutorConfig;
pub use crate::proposal::ProposalConfig;
pub use crate::store::{StoreBackend, StoreConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub proposals: ProposalConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub bots: BotsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Validator identities and their approval secrets
#[derive(Clone, Deserialize)]
pub struct BotsConfig {
    #[serde(default = "default_origin_id")]
    pub origin_id: String,
    #[serde(default)]
    pub origin_secret: String,

    #[serde(default = "default_risk_id")]
    pub risk_id: String,
    #[serde(default)]
    pub risk_secret: String,

    #[serde(default = "default_backup_id")]
    pub backup_id: String,
    #[serde(default)]
    pub backup_secret: String,
}

fn default_origin_id() -> String { "origin-validator".to_string() }
fn default_risk_id() -> String { "risk-validator".to_string() }
fn default_backup_id() -> String { "backup-validator".to_string() }

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            origin_id: default_origin_id(),
            origin_secret: String::new(),
            risk_id: default_risk_id(),
            risk_secret: String::new(),
            backup_id: default_backup_id(),
            backup_secret: String::new(),
        }
    }
}

impl std::fmt::Debug for BotsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotsConfig")
            .field("origin_id", &self.origin_id)
            .field("risk_id", &self.risk_id)
            .field("backup_id", &self.backup_id)
            .finish_non_exhaustive()
    }
}

/// Vault signing key
#[derive(Clone, Default, Deserialize)]
pub struct SignerConfig {
    /// Hex ed25519 secret; a throwaway key is generated when unset
    #[serde(default)]
    pub secret_key_hex: Option<String>,
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("secret_key_hex", &self.secret_key_hex.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix VAULT_GUARD__)
            .add_source(
                config::Environment::with_prefix("VAULT_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Breaker
        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }
        if self.breaker.window_secs == 0 {
            anyhow::bail!("breaker.window_secs must be positive");
        }
        if self.breaker.half_open_max_attempts == 0 {
            anyhow::bail!("breaker.half_open_max_attempts must be at least 1");
        }

        // Proposals and limits
        let p = &self.proposals;
        if p.required_approvals == 0 || p.required_approvals > 3 {
            anyhow::bail!(
                "proposals.required_approvals must be between 1 and 3, got {}",
                p.required_approvals
            );
        }
        if p.ttl_secs == 0 {
            anyhow::bail!("proposals.ttl_secs must be positive");
        }
        for (name, value) in [
            ("high_value_threshold", p.high_value_threshold),
            ("max_single_transfer", p.max_single_transfer),
            ("hourly_limit", p.hourly_limit),
            ("daily_limit", p.daily_limit),
        ] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("proposals.{} must be positive", name);
            }
        }
        if p.hourly_limit > p.daily_limit {
            anyhow::bail!(
                "proposals.hourly_limit ({}) cannot exceed daily_limit ({})",
                p.hourly_limit,
                p.daily_limit
            );
        }
        if p.max_single_transfer > p.hourly_limit {
            tracing::warn!(
                "max_single_transfer ({}) is above hourly_limit ({}); the hourly limit will bind first",
                p.max_single_transfer,
                p.hourly_limit
            );
        }

        // Validators
        for (name, tolerance) in [
            ("origin", self.origin.amount_tolerance),
            ("backup", self.backup.amount_tolerance),
        ] {
            if !(0.0..=0.1).contains(&tolerance) {
                anyhow::bail!("{}.amount_tolerance must be between 0 and 0.1", name);
            }
        }
        if self.risk.max_proposals_per_window == 0 {
            anyhow::bail!("risk.max_proposals_per_window must be at least 1");
        }

        // Bot identities
        let b = &self.bots;
        let secrets = [
            ("origin", &b.origin_secret),
            ("risk", &b.risk_secret),
            ("backup", &b.backup_secret),
        ];
        for (name, secret) in secrets {
            if secret.trim().is_empty() {
                anyhow::bail!("bots.{}_secret is required", name);
            }
        }
        if b.origin_secret == b.risk_secret
            || b.origin_secret == b.backup_secret
            || b.risk_secret == b.backup_secret
        {
            anyhow::bail!("bot secrets must be distinct");
        }
        if b.origin_id == b.risk_id || b.origin_id == b.backup_id || b.risk_id == b.backup_id {
            anyhow::bail!("bot ids must be distinct");
        }

        // Executor
        if self.executor.bot_timeout_ms == 0 {
            anyhow::bail!("executor.bot_timeout_ms must be positive");
        }
        if self.executor.asset.trim().is_empty() {
            anyhow::bail!("executor.asset is required");
        }

        // Signer
        if let Some(key) = &self.signer.secret_key_hex {
            let key = key.trim();
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("signer.secret_key_hex must be 64 hex characters");
            }
        } else {
            tracing::warn!("No signer key configured - a throwaway key will be generated");
        }

        // Store
        if self.store.backend == StoreBackend::File && self.store.path.as_os_str().is_empty() {
            anyhow::bail!("store.path is required for the file backend");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Circuit Breaker:
    failure_threshold: {}
    window: {}s
    reset_timeout: {}s
    half_open_max_attempts: {}
  Proposals:
    required_approvals: {}
    ttl: {}s
    high_value_threshold: {}
    timelock: {}s
    max_single_transfer: {}
    hourly_limit: {}
    daily_limit: {}
  Validators:
    origin: {} (secret {}), amount_tolerance {}
    risk: {} (secret {}), velocity {}/{}m, recipient cap {}
    backup: {} (secret {}), freshness {}s
  Executor:
    asset: {}
    bot_timeout: {}ms
    sweep_interval: {}s
  Signer:
    secret_key: {}
  Store:
    backend: {}
    path: {}
"#,
            self.breaker.failure_threshold,
            self.breaker.window_secs,
            self.breaker.reset_timeout_secs,
            self.breaker.half_open_max_attempts,
            self.proposals.required_approvals,
            self.proposals.ttl_secs,
            self.proposals.high_value_threshold,
            self.proposals.timelock_secs,
            self.proposals.max_single_transfer,
            self.proposals.hourly_limit,
            self.proposals.daily_limit,
            self.bots.origin_id,
            mask_secret(&self.bots.origin_secret),
            self.origin.amount_tolerance,
            self.bots.risk_id,
            mask_secret(&self.bots.risk_secret),
            self.risk.max_proposals_per_window,
            self.risk.velocity_window_minutes,
            self.risk.recipient_daily_cap,
            self.bots.backup_id,
            mask_secret(&self.bots.backup_secret),
            self.backup.freshness_secs,
            self.executor.asset,
            self.executor.bot_timeout_ms,
            self.executor.sweep_interval_secs,
            self.signer
                .secret_key_hex
                .as_deref()
                .map(mask_secret)
                .unwrap_or("(generated)"),
            self.store.backend,
            self.store.path.display(),
        )
    }
}

/// Mask a secret for display
fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}
