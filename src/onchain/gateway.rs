//! alloy-backed chain gateway.
//!
//! Holds a single WebSocket provider shared by every reader and every
//! subscription. Calls go through the `sol!` contract instances; logs are
//! filtered by contract address + topic0 and decoded into the gateway's own
//! log structs before they leave this module.
//!
//! No timeouts or retries are applied here. A hung RPC call blocks its caller.

use super::abi::{ArbiterRegistry, Escrow, EscrowFactory};
use super::types::{
    ArbiterAddedLog, ArbiterRecord, ArbiterRemovedLog, EscrowCreatedLog, ProjectDetails,
};
use super::{ChainGateway, EventStream, GatewayError};

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

/// Chain gateway over a Hardhat/Ethereum WebSocket endpoint.
#[derive(Clone)]
pub struct AlloyGateway {
    provider: DynProvider,
    registry: Address,
    factory: Address,
}

impl AlloyGateway {
    /// Connect to the node. Contract addresses are not checked for code.
    pub async fn connect(
        ws_url: &str,
        registry: Address,
        factory: Address,
    ) -> Result<Self, GatewayError> {
        let ws = WsConnect::new(ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(|e| GatewayError::Connect {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            url = %ws_url,
            registry = %registry,
            factory = %factory,
            "chain gateway connected"
        );

        Ok(Self {
            provider: provider.erased(),
            registry,
            factory,
        })
    }

    /// Current block height, used as a startup connectivity check.
    pub async fn latest_block(&self) -> Result<u64, GatewayError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| GatewayError::Call {
                method: "eth_blockNumber",
                contract: Address::ZERO,
                reason: e.to_string(),
            })
    }

    /// Subscribe to one event on one contract and decode each log as it arrives.
    async fn subscribe<E, T>(
        &self,
        contract: Address,
        map: fn(E, Option<u64>) -> T,
    ) -> Result<EventStream<T>, GatewayError>
    where
        E: SolEvent + 'static,
        T: Send + 'static,
    {
        let event = E::SIGNATURE;
        let filter = Filter::new()
            .address(contract)
            .event_signature(E::SIGNATURE_HASH);

        let sub = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| GatewayError::Subscribe {
                event,
                reason: e.to_string(),
            })?;

        info!(event = %event, contract = %contract, "subscribed to contract event");

        let stream = sub.into_stream().map(move |log: Log| {
            let block_number = log.block_number;
            let decoded = log.log_decode::<E>().map_err(|e| GatewayError::Decode {
                event,
                reason: e.to_string(),
            })?;
            debug!(event = %event, block = ?block_number, "log decoded");
            Ok(map(decoded.inner.data, block_number))
        });

        Ok(stream.boxed())
    }
}

fn call_error(method: &'static str, contract: Address, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Call {
        method,
        contract,
        reason: err.to_string(),
    }
}

#[async_trait]
impl ChainGateway for AlloyGateway {
    async fn arbiter_at(&self, index: u64) -> Result<Address, GatewayError> {
        let registry = ArbiterRegistry::new(self.registry, self.provider.clone());
        registry
            .arbiterList(U256::from(index))
            .call()
            .await
            .map_err(|e| call_error("arbiterList", self.registry, e))
    }

    async fn arbiter_record(&self, arbiter: Address) -> Result<ArbiterRecord, GatewayError> {
        let registry = ArbiterRegistry::new(self.registry, self.provider.clone());
        let record = registry
            .arbiters(arbiter)
            .call()
            .await
            .map_err(|e| call_error("arbiters", self.registry, e))?;

        Ok(ArbiterRecord {
            name: record.name,
            profile_hash: record.profileHash,
            is_active: record.isActive,
        })
    }

    async fn is_arbiter_active(&self, arbiter: Address) -> Result<bool, GatewayError> {
        let registry = ArbiterRegistry::new(self.registry, self.provider.clone());
        registry
            .isArbiterActive(arbiter)
            .call()
            .await
            .map_err(|e| call_error("isArbiterActive", self.registry, e))
    }

    async fn escrow_contracts(&self) -> Result<Vec<Address>, GatewayError> {
        let factory = EscrowFactory::new(self.factory, self.provider.clone());
        factory
            .getEscrowContracts()
            .call()
            .await
            .map_err(|e| call_error("getEscrowContracts", self.factory, e))
    }

    async fn project_details(&self, escrow: Address) -> Result<ProjectDetails, GatewayError> {
        let contract = Escrow::new(escrow, self.provider.clone());
        let details = contract
            .getProjectDetails()
            .call()
            .await
            .map_err(|e| call_error("getProjectDetails", escrow, e))?;

        Ok(ProjectDetails {
            client: details._client,
            freelancer: details._freelancer,
            arbiter: details._arbiter,
            total_amount: details._totalAmount,
            project_description: details._projectDescription,
            status: details._currentStatus,
            work_status: details._workStatus,
            work_submission: details._workSubmission,
        })
    }

    async fn escrow_token(&self, escrow: Address) -> Result<Address, GatewayError> {
        let contract = Escrow::new(escrow, self.provider.clone());
        contract
            .token()
            .call()
            .await
            .map_err(|e| call_error("token", escrow, e))
    }

    async fn subscribe_arbiter_added(&self) -> Result<EventStream<ArbiterAddedLog>, GatewayError> {
        self.subscribe(self.registry, |e: ArbiterRegistry::ArbiterAdded, block_number| {
            ArbiterAddedLog {
                arbiter: e.arbiterAddress,
                name: e.name,
                block_number,
            }
        })
        .await
    }

    async fn subscribe_arbiter_removed(
        &self,
    ) -> Result<EventStream<ArbiterRemovedLog>, GatewayError> {
        self.subscribe(self.registry, |e: ArbiterRegistry::ArbiterRemoved, block_number| {
            ArbiterRemovedLog {
                arbiter: e.arbiterAddress,
                block_number,
            }
        })
        .await
    }

    async fn subscribe_escrow_created(
        &self,
    ) -> Result<EventStream<EscrowCreatedLog>, GatewayError> {
        self.subscribe(self.factory, |e: EscrowFactory::EscrowCreated, block_number| {
            EscrowCreatedLog {
                escrow: e.escrowAddress,
                client: e.client,
                freelancer: e.freelancer,
                total_amount: e.totalAmount,
                block_number,
            }
        })
        .await
    }
}
