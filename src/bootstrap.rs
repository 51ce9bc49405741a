use std::sync::Arc;

use tracing::{error, info, warn};

use crate::api::handler::AppState;
use crate::batch::aggregator::BatchAggregator;
use crate::chain::evm::{EvmConfig, EvmLedgerClient};
use crate::chain::LedgerClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::settlement::executor::SettlementExecutor;
use crate::settlement::scheduler::ExecutorScheduler;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgPayoutStore;
use crate::store::PayoutStore;

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn PayoutStore> = match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgPayoutStore::connect(url).await?);
            info!("✅ Postgres store initialized");
            store
        }
        None => {
            warn!("⚠️  DATABASE_URL not set - using non-durable in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let aggregator = Arc::new(BatchAggregator::new(
        config.token_decimals,
        config.payee_splits(),
    )?);
    info!(
        "✅ Batch aggregator initialized ({} payees, {} token decimals)",
        config.split_payees.len(),
        config.token_decimals
    );

    let ledger = initialize_ledger_client(config)?;

    let executor = Arc::new(SettlementExecutor::new(
        store.clone(),
        ledger,
        aggregator.clone(),
    ));

    let scheduler = ExecutorScheduler::new(config.executor_interval, executor);
    let _scheduler_task = scheduler.start();

    Ok(AppState {
        store,
        aggregator,
        webhook: config.webhook_settings(),
    })
}

fn initialize_ledger_client(config: &Config) -> AppResult<Option<Arc<dyn LedgerClient>>> {
    let (key, token, contract) = match (
        &config.executor_private_key,
        &config.token_address,
        &config.contract_address,
    ) {
        (Some(key), Some(token), Some(contract)) => (key, token, contract),
        _ => {
            error!(
                "⚠️  EXECUTOR_PRIVATE_KEY / TOKEN_ADDRESS / CONTRACT_ADDRESS not fully set \
                 - settlement executor disabled"
            );
            return Ok(None);
        }
    };

    let evm_config = EvmConfig {
        rpc_url: config.rpc_url.clone(),
        confirmation_timeout: config.confirmation_timeout,
        ..EvmConfig::default()
    };
    let client = EvmLedgerClient::new(evm_config, key, token, contract)?;
    info!(
        "✅ EVM ledger client initialized (executor {})",
        client.executor_identity()
    );

    Ok(Some(Arc::new(client)))
}
