//! Multi-RPC client facade
//!
//! Named blockchain reads and transaction submission on top of
//! [`ResilientExecutor`]. Each method only marshals parameters into a single
//! ethers call; retry, selection and error classification happen elsewhere.

use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, TxHash, U256};
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{GatewayConfig, MutationRetryMode};
use crate::providers::failover::ResilientExecutor;
use crate::providers::registry::EndpointRegistry;
use crate::providers::retry::RetryPolicy;
use crate::providers::session::{Connector, HttpConnector};
use crate::{GatewayError, Result};

/// Remote messages meaning the node already has this exact transaction
const ALREADY_KNOWN_MARKERS: &[&str] = &["already known", "known transaction", "alreadyknown"];

/// Client facade over a pool of JSON-RPC endpoints
pub struct MultiRpcClient<C: Connector = HttpConnector> {
    executor: Arc<ResilientExecutor<C>>,
    mutation_mode: MutationRetryMode,
}

impl<C: Connector> Clone for MultiRpcClient<C> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            mutation_mode: self.mutation_mode,
        }
    }
}

impl MultiRpcClient<HttpConnector> {
    /// Build an HTTP-backed client from configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(EndpointRegistry::new(&config.endpoints)?);
        let executor = ResilientExecutor::new(registry, HttpConnector, config.retry.policy());

        info!(
            endpoint_count = config.enabled_endpoints().len(),
            "Multi-RPC client initialized"
        );
        Ok(Self::new(Arc::new(executor), config.retry.mutating))
    }
}

impl<C: Connector> MultiRpcClient<C> {
    pub fn new(executor: Arc<ResilientExecutor<C>>, mutation_mode: MutationRetryMode) -> Self {
        Self {
            executor,
            mutation_mode,
        }
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor<C>> {
        &self.executor
    }

    pub fn mutation_mode(&self) -> MutationRetryMode {
        self.mutation_mode
    }

    /// Idempotency key for a signed transaction: its hash
    pub fn idempotency_key(raw_tx: &Bytes) -> TxHash {
        TxHash::from(keccak256(raw_tx.as_ref()))
    }
}

impl<C, P> MultiRpcClient<C>
where
    C: Connector<Session = Provider<P>>,
    P: JsonRpcClient + 'static,
{
    /// Get the balance of `address`, at `block` or the latest block
    pub async fn get_balance(&self, address: Address, block: Option<BlockId>) -> Result<U256> {
        self.executor
            .execute(|provider| async move {
                Ok::<_, GatewayError>(provider.get_balance(address, block).await?)
            })
            .await
    }

    /// Get current block number
    pub async fn get_latest_height(&self) -> Result<u64> {
        self.executor
            .execute(|provider| async move {
                Ok::<_, GatewayError>(provider.get_block_number().await?.as_u64())
            })
            .await
    }

    /// Get current gas price
    pub async fn get_gas_price(&self) -> Result<U256> {
        self.executor
            .execute(|provider| async move {
                Ok::<_, GatewayError>(provider.get_gas_price().await?)
            })
            .await
    }

    /// Estimate gas for `tx`
    pub async fn estimate_gas(
        &self,
        tx: &TypedTransaction,
        block: Option<BlockId>,
    ) -> Result<U256> {
        self.executor
            .execute(|provider| {
                let tx = tx.clone();
                async move { Ok::<_, GatewayError>(provider.estimate_gas(&tx, block).await?) }
            })
            .await
    }

    /// Same as [`get_latest_height`](Self::get_latest_height), abortable by the caller
    pub async fn get_latest_height_with_cancel(&self, cancel: &CancellationToken) -> Result<u64> {
        self.executor
            .execute_with_cancel(cancel, |provider| async move {
                Ok::<_, GatewayError>(provider.get_block_number().await?.as_u64())
            })
            .await
    }

    /// Broadcast a signed raw transaction
    ///
    /// Never blindly retried. With [`MutationRetryMode::NoAutoRetry`] exactly
    /// one attempt is made. With [`MutationRetryMode::IdempotencyKey`] failover
    /// re-sends the same signed bytes, which cannot apply twice, and an
    /// "already known" answer from a later endpoint counts as success.
    ///
    /// A rejection that follows a failed attempt is ambiguous: the earlier
    /// broadcast may have landed and caused it (e.g. "nonce too low"). The
    /// transaction is then looked up by its
    /// [`idempotency_key`](Self::idempotency_key); if a node has it the hash is
    /// returned, otherwise [`GatewayError::OutcomeUnknown`] is. On
    /// `ExhaustedRetries` the transaction may also have landed; check the key
    /// before re-signing.
    pub async fn submit(&self, raw_tx: Bytes) -> Result<TxHash> {
        let tx_hash = Self::idempotency_key(&raw_tx);
        let policy = match self.mutation_mode {
            MutationRetryMode::NoAutoRetry => RetryPolicy::no_retry(),
            MutationRetryMode::IdempotencyKey => *self.executor.policy(),
        };
        let tolerate_known = self.mutation_mode == MutationRetryMode::IdempotencyKey;
        let sent = AtomicU32::new(0);

        let result = self
            .executor
            .execute_with_policy(&policy, &CancellationToken::new(), |provider| {
                sent.fetch_add(1, Ordering::Relaxed);
                let raw_tx = raw_tx.clone();
                async move {
                    match provider.send_raw_transaction(raw_tx).await {
                        Ok(pending) => Ok(pending.tx_hash()),
                        Err(e) => {
                            let err = GatewayError::from(e);
                            if tolerate_known && is_already_known(&err) {
                                Ok(tx_hash)
                            } else {
                                Err(err)
                            }
                        }
                    }
                }
            })
            .await;

        match result {
            Err(e @ GatewayError::ExhaustedRetries { .. }) => {
                warn!(
                    tx_hash = ?tx_hash,
                    attempts = ?e.attempts(),
                    "Transaction submission outcome unknown"
                );
                Err(e)
            }
            Err(e @ GatewayError::PermanentOperation { .. })
                if sent.load(Ordering::Relaxed) > 1 =>
            {
                self.resolve_rejected_retry(tx_hash, e).await
            }
            other => other,
        }
    }

    /// Settle a rejection that came after an earlier attempt may have landed
    async fn resolve_rejected_retry(
        &self,
        tx_hash: TxHash,
        last_error: GatewayError,
    ) -> Result<TxHash> {
        let lookup = self
            .executor
            .execute(|provider| async move {
                Ok::<_, GatewayError>(provider.get_transaction(tx_hash).await?)
            })
            .await;

        match lookup {
            Ok(Some(_)) => {
                info!(
                    tx_hash = ?tx_hash,
                    rejection = %last_error,
                    "Rejected retry refers to an already broadcast transaction"
                );
                Ok(tx_hash)
            }
            Ok(None) => {
                warn!(
                    tx_hash = ?tx_hash,
                    error = %last_error,
                    "Transaction submission outcome unknown"
                );
                Err(GatewayError::OutcomeUnknown {
                    tx_hash: format!("{:?}", tx_hash),
                    last_error: Box::new(last_error),
                })
            }
            Err(lookup_error) => {
                warn!(
                    tx_hash = ?tx_hash,
                    error = %last_error,
                    lookup_error = %lookup_error,
                    "Transaction submission outcome unknown"
                );
                Err(GatewayError::OutcomeUnknown {
                    tx_hash: format!("{:?}", tx_hash),
                    last_error: Box::new(last_error),
                })
            }
        }
    }
}

fn is_already_known(err: &GatewayError) -> bool {
    let message = err.to_string().to_lowercase();
    ALREADY_KNOWN_MARKERS.iter().any(|marker| message.contains(marker))
}
