//! Scripted chain gateway for service tests.

use crate::onchain::{
    ArbiterAddedLog, ArbiterRecord, ArbiterRemovedLog, ChainGateway, EscrowCreatedLog,
    EventStream, GatewayError, ProjectDetails,
};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

type Feed<T> = Mutex<Vec<mpsc::UnboundedSender<Result<T, GatewayError>>>>;

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn details(client: Address, freelancer: Address, arbiter: Address, amount: u64) -> ProjectDetails {
    ProjectDetails {
        client,
        freelancer,
        arbiter,
        total_amount: U256::from(amount),
        project_description: "build a landing page".to_string(),
        status: 0,
        work_status: 0,
        work_submission: String::new(),
    }
}

#[derive(Default)]
pub struct MockGateway {
    arbiter_list: Mutex<Vec<Address>>,
    arbiter_records: Mutex<HashMap<Address, ArbiterRecord>>,
    failing_records: Mutex<HashSet<Address>>,
    escrows: Mutex<Vec<Address>>,
    project_details: Mutex<HashMap<Address, ProjectDetails>>,
    tokens: Mutex<HashMap<Address, Address>>,
    failing_details: Mutex<HashSet<Address>>,
    escrow_list_fails: Mutex<bool>,

    added_feeds: Feed<ArbiterAddedLog>,
    removed_feeds: Feed<ArbiterRemovedLog>,
    created_feeds: Feed<EscrowCreatedLog>,
    subscriptions: AtomicUsize,

    probes: AtomicUsize,
    records: AtomicUsize,
    active_reads: AtomicUsize,
    lists: AtomicUsize,
    details_reads: AtomicUsize,
    token_reads: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_arbiter(&self, address: Address, record: ArbiterRecord) {
        self.arbiter_list.lock().unwrap().push(address);
        self.arbiter_records.lock().unwrap().insert(address, record);
    }

    pub fn fail_arbiter_record(&self, address: Address) {
        self.failing_records.lock().unwrap().insert(address);
    }

    /// Register an escrow. `token: None` makes the `token()` read fail.
    pub fn add_escrow(&self, escrow: Address, details: ProjectDetails, token: Option<Address>) {
        self.escrows.lock().unwrap().push(escrow);
        self.project_details.lock().unwrap().insert(escrow, details);
        if let Some(token) = token {
            self.tokens.lock().unwrap().insert(escrow, token);
        }
    }

    pub fn fail_project_details(&self, escrow: Address) {
        self.failing_details.lock().unwrap().insert(escrow);
    }

    pub fn fail_escrow_list(&self) {
        *self.escrow_list_fails.lock().unwrap() = true;
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn record_calls(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }

    pub fn active_calls(&self) -> usize {
        self.active_reads.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> usize {
        self.details_reads.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.probe_calls()
            + self.record_calls()
            + self.active_calls()
            + self.list_calls()
            + self.details_calls()
            + self.token_reads.load(Ordering::SeqCst)
            + self.subscriptions.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` subscriptions have been opened.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        while self.subscriptions.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn emit_arbiter_added(&self, arbiter: Address, name: &str) {
        let log = ArbiterAddedLog {
            arbiter,
            name: name.to_string(),
            block_number: Some(1),
        };
        broadcast(&self.added_feeds, log);
    }

    pub fn emit_arbiter_removed(&self, arbiter: Address) {
        let log = ArbiterRemovedLog {
            arbiter,
            block_number: Some(1),
        };
        broadcast(&self.removed_feeds, log);
    }

    pub fn emit_escrow_created(&self, log: EscrowCreatedLog) {
        broadcast(&self.created_feeds, log);
    }

    /// End only the ArbiterAdded streams.
    pub fn close_arbiter_added(&self) {
        self.added_feeds.lock().unwrap().clear();
    }

    /// Drop every live subscription; their streams end.
    pub fn close_subscriptions(&self) {
        self.added_feeds.lock().unwrap().clear();
        self.removed_feeds.lock().unwrap().clear();
        self.created_feeds.lock().unwrap().clear();
    }

    fn open<T: Send + 'static>(&self, feeds: &Feed<T>) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        feeds.lock().unwrap().push(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

fn broadcast<T: Clone>(feeds: &Feed<T>, item: T) {
    for tx in feeds.lock().unwrap().iter() {
        let _ = tx.send(Ok(item.clone()));
    }
}

fn call_failed(method: &'static str, contract: Address) -> GatewayError {
    GatewayError::Call {
        method,
        contract,
        reason: "execution reverted".to_string(),
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn arbiter_at(&self, index: u64) -> Result<Address, GatewayError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let list = self.arbiter_list.lock().unwrap();
        Ok(list.get(index as usize).copied().unwrap_or(Address::ZERO))
    }

    async fn arbiter_record(&self, arbiter: Address) -> Result<ArbiterRecord, GatewayError> {
        self.records.fetch_add(1, Ordering::SeqCst);
        if self.failing_records.lock().unwrap().contains(&arbiter) {
            return Err(call_failed("arbiters", arbiter));
        }
        // The registry answers unknown addresses with a zeroed record.
        Ok(self
            .arbiter_records
            .lock()
            .unwrap()
            .get(&arbiter)
            .cloned()
            .unwrap_or(ArbiterRecord {
                name: String::new(),
                profile_hash: String::new(),
                is_active: false,
            }))
    }

    async fn is_arbiter_active(&self, arbiter: Address) -> Result<bool, GatewayError> {
        self.active_reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_records.lock().unwrap().contains(&arbiter) {
            return Err(call_failed("isArbiterActive", arbiter));
        }
        let records = self.arbiter_records.lock().unwrap();
        Ok(records.get(&arbiter).is_some_and(|r| r.is_active))
    }

    async fn escrow_contracts(&self) -> Result<Vec<Address>, GatewayError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if *self.escrow_list_fails.lock().unwrap() {
            return Err(call_failed("getEscrowContracts", Address::ZERO));
        }
        Ok(self.escrows.lock().unwrap().clone())
    }

    async fn project_details(&self, escrow: Address) -> Result<ProjectDetails, GatewayError> {
        self.details_reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_details.lock().unwrap().contains(&escrow) {
            return Err(call_failed("getProjectDetails", escrow));
        }
        self.project_details
            .lock()
            .unwrap()
            .get(&escrow)
            .cloned()
            .ok_or_else(|| call_failed("getProjectDetails", escrow))
    }

    async fn escrow_token(&self, escrow: Address) -> Result<Address, GatewayError> {
        self.token_reads.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap()
            .get(&escrow)
            .copied()
            .ok_or_else(|| call_failed("token", escrow))
    }

    async fn subscribe_arbiter_added(&self) -> Result<EventStream<ArbiterAddedLog>, GatewayError> {
        Ok(self.open(&self.added_feeds))
    }

    async fn subscribe_arbiter_removed(
        &self,
    ) -> Result<EventStream<ArbiterRemovedLog>, GatewayError> {
        Ok(self.open(&self.removed_feeds))
    }

    async fn subscribe_escrow_created(
        &self,
    ) -> Result<EventStream<EscrowCreatedLog>, GatewayError> {
        Ok(self.open(&self.created_feeds))
    }
}
