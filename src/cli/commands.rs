//! CLI command implementations
//!
//! Commands run the real pipeline against [`DevFacts`], an in-memory bridge,
//! with a local signer and a dry-run submitter.

use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bots::{
    ApprovalBot, BackupValidator, BotIdentity, OriginValidator, RiskValidator,
};
use crate::breaker::CircuitBreaker;
use crate::chain::DryRunSubmitter;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dev::DevFacts;
use crate::executor::{TransferRequest, VaultExecutor};
use crate::proposal::{BotRole, ProposalManager};
use crate::signer::LocalSigner;
use crate::store;

/// Wire the full pipeline from configuration
pub async fn build_pipeline(config: &Config, facts: Arc<DevFacts>) -> Result<Arc<VaultExecutor>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), clock.clone()));
    let manager = Arc::new(ProposalManager::new(
        config.proposals.clone(),
        3,
        breaker,
        clock.clone(),
    ));

    let bots: Vec<Arc<dyn ApprovalBot>> = vec![
        Arc::new(OriginValidator::new(
            BotIdentity::new(&config.bots.origin_id, BotRole::Origin, &config.bots.origin_secret),
            config.origin.clone(),
            facts.clone(),
            clock.clone(),
        )),
        Arc::new(RiskValidator::new(
            BotIdentity::new(&config.bots.risk_id, BotRole::Risk, &config.bots.risk_secret),
            config.risk.clone(),
            facts.clone(),
            clock.clone(),
        )),
        Arc::new(BackupValidator::new(
            BotIdentity::new(&config.bots.backup_id, BotRole::Backup, &config.bots.backup_secret),
            config.backup.clone(),
            facts,
            clock.clone(),
        )),
    ];

    let signer = match &config.signer.secret_key_hex {
        Some(key) => LocalSigner::from_hex(key)?,
        None => LocalSigner::generate(),
    };
    info!(vault = %signer.public_key_b58(), "Signer ready");

    let store = store::open(&config.store, clock.clone()).await?;
    let executor = VaultExecutor::new(
        manager,
        bots,
        Arc::new(signer),
        Arc::new(DryRunSubmitter),
        config.executor.clone(),
        clock,
    )?
    .with_store(store);

    match executor.restore().await {
        Ok(0) => {}
        Ok(n) => info!("Restored {} proposals", n),
        Err(e) => warn!("State restore failed, starting empty: {}", e),
    }

    Ok(Arc::new(executor))
}

/// A bridge with a healthy service and a vault funded up to the daily limit
fn dev_facts(config: &Config) -> Arc<DevFacts> {
    let facts = Arc::new(DevFacts::new());
    facts.set_vault_balance(config.proposals.daily_limit);
    facts
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Push one transfer through the pipeline
pub async fn request(
    config: &Config,
    bridge_tx_id: &str,
    recipient: &str,
    amount: f64,
    source_tx: Option<String>,
) -> Result<()> {
    let facts = dev_facts(config);
    if let Some(source) = &source_tx {
        facts.register_transfer(bridge_tx_id, source, amount);
    }
    let executor = build_pipeline(config, facts).await?;

    let mut metadata = BTreeMap::new();
    if let Some(source) = source_tx {
        metadata.insert(crate::proposal::SOURCE_TX_KEY.to_string(), source);
    }

    let outcome = executor
        .request_transfer(bridge_tx_id, recipient, amount, metadata)
        .await;
    let proposal = executor.manager().get_by_bridge_tx(bridge_tx_id);

    match &outcome {
        Ok(signature) => println!("\nTransfer executed: {}", signature),
        Err(e) => println!("\nTransfer not executed: {}", e),
    }
    if let Some(p) = proposal {
        println!("{}", serde_json::to_string_pretty(&p)?);
    }

    outcome.map(|_| ()).map_err(Into::into)
}

/// Process JSON-lines transfer requests from stdin until EOF or Ctrl-C
pub async fn run(config: &Config) -> Result<()> {
    let facts = dev_facts(config);
    let executor = build_pipeline(config, facts.clone()).await?;

    let shutdown = CancellationToken::new();
    let sweep = executor.spawn_background(shutdown.clone());

    info!("Vault guard running. Reading transfer requests from stdin...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&executor, &facts, &line).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = sweep.await {
        error!("Sweep task ended abnormally: {}", e);
    }

    let stats = executor.manager().stats();
    let spending = executor.manager().spending_status();
    info!(
        total = stats.total,
        daily_spent = spending.daily_spent,
        breaker = %executor.manager().breaker().state(),
        "Vault guard stopped"
    );
    Ok(())
}

async fn handle_line(executor: &VaultExecutor, facts: &DevFacts, line: &str) {
    let request: TransferRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping malformed request: {}", e);
            println!("{}", json!({ "ok": false, "error": format!("malformed request: {}", e) }));
            return;
        }
    };

    if let Some(source) = &request.source_tx {
        facts.register_transfer(&request.bridge_tx_id, source, request.amount);
    }

    let bridge_tx_id = request.bridge_tx_id.clone();
    let outcome = match executor.submit(request).await {
        Ok(signature) => json!({
            "bridge_tx_id": bridge_tx_id,
            "ok": true,
            "signature": signature,
        }),
        Err(e) => json!({
            "bridge_tx_id": bridge_tx_id,
            "ok": false,
            "retryable": e.is_retryable(),
            "retry_after_secs": e.retry_after().map(|d| d.as_secs()),
            "error": e.to_string(),
        }),
    };
    println!("{}", outcome);
}

/// Print a fresh signer key
pub fn keygen() -> Result<()> {
    let signer = LocalSigner::generate();
    println!("public_key:     {}", signer.public_key_b58());
    println!("secret_key_hex: {}", signer.secret_hex());
    println!("\nSet VAULT_GUARD__SIGNER__SECRET_KEY_HEX or [signer] secret_key_hex to use it.");
    Ok(())
}
