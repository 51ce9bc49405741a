use std::str::FromStr;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{LedgerClient, TxOutcome};
use crate::batch::hash::batch_ref;
use crate::batch::models::Batch;
use crate::error::{AppResult, LedgerError};

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    struct SettlementItem {
        address payee;
        uint256 amount;
    }

    #[sol(rpc)]
    contract IPayoutVault {
        function submitBatch(bytes32 batchId, uint256 total, SettlementItem[] memory items, bytes32 batchHash) external;
    }
}

#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            confirmation_timeout: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_millis(500),
        }
    }
}

/// EVM implementation of the ledger client: ERC-20 token plus the
/// payout contract, signed locally by the executor key.
pub struct EvmLedgerClient {
    config: EvmConfig,
    provider: DynProvider,
    identity: Address,
    token: Address,
    contract: Address,
}

impl EvmLedgerClient {
    pub fn new(
        config: EvmConfig,
        private_key: &str,
        token_address: &str,
        contract_address: &str,
    ) -> AppResult<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| LedgerError::InvalidKey(format!("{e}")))?;
        let identity = signer.address();

        let token = Address::from_str(token_address)
            .map_err(|_| LedgerError::InvalidAddress(token_address.to_string()))?;
        let contract = Address::from_str(contract_address)
            .map_err(|_| LedgerError::InvalidAddress(contract_address.to_string()))?;

        let url = config
            .rpc_url
            .parse()
            .map_err(|_| LedgerError::Rpc(format!("bad RPC url: {}", config.rpc_url)))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            config,
            provider,
            identity,
            token,
            contract,
        })
    }

    fn parse_address(&self, raw: &str) -> AppResult<Address> {
        Ok(Address::from_str(raw).map_err(|_| LedgerError::InvalidAddress(raw.to_string()))?)
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn executor_identity(&self) -> String {
        self.identity.to_string()
    }

    fn settlement_address(&self) -> String {
        self.contract.to_string()
    }

    async fn balance_of(&self, owner: &str) -> AppResult<U256> {
        let owner = self.parse_address(owner)?;
        let erc20 = IERC20::new(self.token, self.provider.clone());
        let balance = erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(balance)
    }

    async fn account_nonce(&self) -> AppResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(self.identity)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(nonce)
    }

    async fn transfer(&self, to: &str, amount: U256, nonce: u64) -> AppResult<String> {
        let to = self.parse_address(to)?;
        let erc20 = IERC20::new(self.token, self.provider.clone());
        let pending = erc20
            .transfer(to, amount)
            .nonce(nonce)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(pending.tx_hash().to_string())
    }

    async fn submit_settlement(&self, batch: &Batch, nonce: u64) -> AppResult<String> {
        let items = batch
            .items
            .iter()
            .map(|item| {
                Ok(SettlementItem {
                    payee: self.parse_address(&item.payee)?,
                    amount: item.amount,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let vault = IPayoutVault::new(self.contract, self.provider.clone());
        let pending = vault
            .submitBatch(
                batch_ref(&batch.batch_id),
                batch.total_amount,
                items,
                batch.content_hash,
            )
            .nonce(nonce)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(pending.tx_hash().to_string())
    }

    async fn await_confirmation(&self, tx_id: &str) -> AppResult<TxOutcome> {
        let hash =
            B256::from_str(tx_id).map_err(|_| LedgerError::InvalidTxId(tx_id.to_string()))?;

        let deadline = Instant::now() + self.config.confirmation_timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| LedgerError::Rpc(e.to_string()))?;

            if let Some(receipt) = receipt {
                return Ok(if receipt.status() {
                    TxOutcome::Confirmed
                } else {
                    TxOutcome::Failed
                });
            }

            if Instant::now() >= deadline {
                debug!(tx = tx_id, "confirmation wait timed out, still pending");
                return Ok(TxOutcome::Pending);
            }
            sleep(self.config.receipt_poll_interval).await;
        }
    }
}
