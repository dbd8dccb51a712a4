//! In-memory storage and ledger host for tests and embedding.
//!
//! `MemLedger` implements [`StorageHost`] and [`LedgerHost`] over `BTreeMap`s
//! so iteration order (and therefore `mapKeys` output) is deterministic.
//! Every call reports a cost from its [`CostTable`]; failed calls still
//! report the base cost of the operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::TransferBuffer;
use crate::error::HostError;
use crate::gas;
use crate::traits::{HostReply, LedgerHost, SandboxId, StorageHost};
use crate::types::HostLimits;

/// Per-operation gas prices reported by [`MemLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    pub get: u64,
    pub put: u64,
    pub del: u64,
    pub scan: u64,
    pub per_byte: u64,
    pub info: u64,
    pub call: u64,
    pub auth: u64,
    pub emit: u64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            get: gas::G_STORAGE_GET,
            put: gas::G_STORAGE_PUT,
            del: gas::G_STORAGE_DEL,
            scan: gas::G_STORAGE_SCAN,
            per_byte: gas::G_PER_BYTE,
            info: gas::G_LEDGER_INFO,
            call: gas::G_LEDGER_CALL,
            auth: gas::G_REQUIRE_AUTH,
            emit: gas::G_EMIT,
        }
    }
}

impl CostTable {
    /// Flat prices with no per-byte component.
    pub fn flat(price: u64) -> Self {
        Self {
            get: price,
            put: price,
            del: price,
            scan: price,
            per_byte: 0,
            info: price,
            call: price,
            auth: price,
            emit: price,
        }
    }

    fn sized(&self, base: u64, bytes: usize) -> u64 {
        base.saturating_add((bytes as u64).saturating_mul(self.per_byte))
    }
}

/// Block metadata returned by `blockInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    pub parent_hash: String,
    pub witness: String,
    pub time: i64,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            number: 1,
            parent_hash: String::new(),
            witness: String::new(),
            time: 1_700_000_000,
        }
    }
}

/// Transaction metadata returned by `txInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxInfo {
    pub hash: String,
    pub publisher: String,
    pub time: i64,
    pub expiration: i64,
    pub gas_limit: u64,
}

/// A recorded inter-contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub contract: String,
    pub api: String,
    pub args: String,
    pub with_auth: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    kv: BTreeMap<(String, Vec<u8>), Vec<u8>>,
    maps: BTreeMap<(String, Vec<u8>), BTreeMap<Vec<u8>, Vec<u8>>>,
    ram: BTreeMap<String, u64>,
    receipts: Vec<String>,
    events: Vec<String>,
    grants: BTreeSet<(String, String)>,
    apis: BTreeMap<(String, String), String>,
    calls: Vec<CallRecord>,
}

/// In-memory ledger backed by `BTreeMap`.
#[derive(Debug)]
pub struct MemLedger {
    contract: String,
    limits: HostLimits,
    costs: CostTable,
    block: BlockInfo,
    tx: TxInfo,
    state: Mutex<LedgerState>,
}

impl Default for MemLedger {
    fn default() -> Self {
        Self::new("contract")
    }
}

impl MemLedger {
    /// Create an empty ledger executing as `contract`.
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            limits: HostLimits::default(),
            costs: CostTable::default(),
            block: BlockInfo::default(),
            tx: TxInfo::default(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Replace the cost table.
    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    /// Replace the size limits.
    pub fn with_limits(mut self, limits: HostLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the block metadata.
    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.block = block;
        self
    }

    /// Replace the transaction metadata.
    pub fn with_tx(mut self, tx: TxInfo) -> Self {
        self.tx = tx;
        self
    }

    /// Name of the executing contract.
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Insert a value directly into `contract`'s storage.
    pub fn insert(&self, contract: &str, key: &[u8], value: &[u8]) {
        self.lock()
            .kv
            .insert((contract.to_string(), key.to_vec()), value.to_vec());
    }

    /// Insert a map field directly into `contract`'s storage.
    pub fn insert_map(&self, contract: &str, key: &[u8], field: &[u8], value: &[u8]) {
        self.lock()
            .maps
            .entry((contract.to_string(), key.to_vec()))
            .or_default()
            .insert(field.to_vec(), value.to_vec());
    }

    /// Read a value from `contract`'s storage.
    pub fn value(&self, contract: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.lock().kv.get(&(contract.to_string(), key.to_vec())).cloned()
    }

    /// Bytes currently paid for by `owner`.
    pub fn ram_used(&self, owner: &str) -> u64 {
        self.lock().ram.get(owner).copied().unwrap_or(0)
    }

    /// Grant `permission` of `account` to the current transaction.
    pub fn grant(&self, account: &str, permission: &str) {
        self.lock()
            .grants
            .insert((account.to_string(), permission.to_string()));
    }

    /// Register a canned response for `contract.api`.
    pub fn register_api(&self, contract: &str, api: &str, response: &str) {
        self.lock()
            .apis
            .insert((contract.to_string(), api.to_string()), response.to_string());
    }

    /// Receipts emitted so far.
    pub fn receipts(&self) -> Vec<String> {
        self.lock().receipts.clone()
    }

    /// Events emitted so far.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Inter-contract calls made so far.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_key(&self, what: &str, key: &TransferBuffer) -> Result<(), HostError> {
        if key.is_empty() {
            debug!(contract = %self.contract, what, "empty key rejected");
            return Err(HostError::invalid_argument(format!("{} is empty", what)));
        }
        if key.len() > self.limits.max_key_len {
            debug!(contract = %self.contract, what, len = key.len(), "oversized key rejected");
            return Err(HostError::invalid_argument(format!(
                "{} too long: {} > {}",
                what,
                key.len(),
                self.limits.max_key_len
            )));
        }
        Ok(())
    }

    fn check_value(&self, value: &TransferBuffer) -> Result<(), HostError> {
        if value.len() > self.limits.max_value_len {
            debug!(contract = %self.contract, len = value.len(), "oversized value rejected");
            return Err(HostError::invalid_argument(format!(
                "value too long: {} > {}",
                value.len(),
                self.limits.max_value_len
            )));
        }
        Ok(())
    }

    fn payer(&self, owner: &TransferBuffer) -> String {
        if owner.is_empty() {
            self.contract.clone()
        } else {
            String::from_utf8_lossy(owner.as_bytes()).into_owned()
        }
    }

    fn text(what: &str, buf: &TransferBuffer) -> Result<String, HostError> {
        buf.as_str()
            .map(str::to_string)
            .map_err(|_| HostError::invalid_argument(format!("{} is not utf-8", what)))
    }

    fn keys_json(fields: Option<&BTreeMap<Vec<u8>, Vec<u8>>>) -> TransferBuffer {
        let names: Vec<String> = fields
            .map(|m| {
                m.keys()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .collect()
            })
            .unwrap_or_default();
        // Serializing a Vec<String> cannot fail.
        TransferBuffer::from(serde_json::to_string(&names).unwrap_or_else(|_| "[]".into()))
    }

    fn info_json<T: Serialize>(&self, info: &T) -> HostReply<TransferBuffer> {
        let outcome = serde_json::to_string(info)
            .map(TransferBuffer::from)
            .map_err(|e| HostError::Internal(e.to_string()));
        HostReply::new(outcome, self.costs.info)
    }

    fn do_call(
        &self,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
        with_auth: bool,
    ) -> HostReply<TransferBuffer> {
        let cost = self.costs.sized(self.costs.call, args.len());
        let outcome = (|| {
            let contract = Self::text("contract", contract)?;
            let api = Self::text("api", api)?;
            let args = Self::text("args", args)?;
            let mut state = self.lock();
            let response = state
                .apis
                .get(&(contract.clone(), api.clone()))
                .cloned()
                .ok_or_else(|| {
                    debug!(%contract, %api, "call to unregistered api");
                    HostError::not_found(format!("api {}.{}", contract, api))
                })?;
            state.calls.push(CallRecord {
                contract,
                api,
                args,
                with_auth,
            });
            Ok(TransferBuffer::from(response))
        })();
        HostReply::new(outcome, cost)
    }
}

impl StorageHost for MemLedger {
    fn put(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        value: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()> {
        let cost = self.costs.sized(self.costs.put, key.len() + value.len());
        let outcome = self.check_key("key", key).and_then(|_| self.check_value(value));
        if let Err(e) = outcome {
            return HostReply::err(e, cost);
        }
        let payer = self.payer(owner);
        let mut state = self.lock();
        let previous = state
            .kv
            .insert((self.contract.clone(), key.as_bytes().to_vec()), value.as_bytes().to_vec());
        let ram = state.ram.entry(payer).or_insert(0);
        *ram = ram
            .saturating_add(value.len() as u64)
            .saturating_sub(previous.map(|p| p.len() as u64).unwrap_or(0));
        HostReply::ok((), cost)
    }

    fn has(&self, _sbx: SandboxId, key: &TransferBuffer, _owner: &TransferBuffer) -> HostReply<bool> {
        let cost = self.costs.sized(self.costs.get, key.len());
        let found = self
            .lock()
            .kv
            .contains_key(&(self.contract.clone(), key.as_bytes().to_vec()));
        HostReply::ok(found, cost)
    }

    fn get(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>> {
        let cost = self.costs.sized(self.costs.get, key.len());
        let value = self
            .lock()
            .kv
            .get(&(self.contract.clone(), key.as_bytes().to_vec()))
            .map(|v| TransferBuffer::new(v.as_slice()));
        HostReply::ok(value, cost)
    }

    fn del(&self, _sbx: SandboxId, key: &TransferBuffer, owner: &TransferBuffer) -> HostReply<()> {
        let cost = self.costs.sized(self.costs.del, key.len());
        let payer = self.payer(owner);
        let mut state = self.lock();
        if let Some(previous) = state.kv.remove(&(self.contract.clone(), key.as_bytes().to_vec())) {
            if let Some(ram) = state.ram.get_mut(&payer) {
                *ram = ram.saturating_sub(previous.len() as u64);
            }
        }
        HostReply::ok((), cost)
    }

    fn map_put(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        value: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()> {
        let cost = self
            .costs
            .sized(self.costs.put, key.len() + field.len() + value.len());
        let outcome = self
            .check_key("key", key)
            .and_then(|_| self.check_key("field", field))
            .and_then(|_| self.check_value(value));
        if let Err(e) = outcome {
            return HostReply::err(e, cost);
        }
        let payer = self.payer(owner);
        let mut state = self.lock();
        let previous = state
            .maps
            .entry((self.contract.clone(), key.as_bytes().to_vec()))
            .or_default()
            .insert(field.as_bytes().to_vec(), value.as_bytes().to_vec());
        let ram = state.ram.entry(payer).or_insert(0);
        *ram = ram
            .saturating_add(value.len() as u64)
            .saturating_sub(previous.map(|p| p.len() as u64).unwrap_or(0));
        HostReply::ok((), cost)
    }

    fn map_has(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<bool> {
        let cost = self.costs.sized(self.costs.get, key.len() + field.len());
        let found = self
            .lock()
            .maps
            .get(&(self.contract.clone(), key.as_bytes().to_vec()))
            .is_some_and(|m| m.contains_key(field.as_bytes()));
        HostReply::ok(found, cost)
    }

    fn map_get(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>> {
        let cost = self.costs.sized(self.costs.get, key.len() + field.len());
        let value = self
            .lock()
            .maps
            .get(&(self.contract.clone(), key.as_bytes().to_vec()))
            .and_then(|m| m.get(field.as_bytes()))
            .map(|v| TransferBuffer::new(v.as_slice()));
        HostReply::ok(value, cost)
    }

    fn map_del(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()> {
        let cost = self.costs.sized(self.costs.del, key.len() + field.len());
        let payer = self.payer(owner);
        let mut state = self.lock();
        let removed = state
            .maps
            .get_mut(&(self.contract.clone(), key.as_bytes().to_vec()))
            .and_then(|m| m.remove(field.as_bytes()));
        if let Some(previous) = removed {
            if let Some(ram) = state.ram.get_mut(&payer) {
                *ram = ram.saturating_sub(previous.len() as u64);
            }
        }
        HostReply::ok((), cost)
    }

    fn map_keys(
        &self,
        _sbx: SandboxId,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<TransferBuffer> {
        let cost = self.costs.sized(self.costs.scan, key.len());
        let state = self.lock();
        let fields = state.maps.get(&(self.contract.clone(), key.as_bytes().to_vec()));
        HostReply::ok(Self::keys_json(fields), cost)
    }

    fn map_len(&self, _sbx: SandboxId, key: &TransferBuffer, _owner: &TransferBuffer) -> HostReply<u64> {
        let cost = self.costs.sized(self.costs.scan, key.len());
        let len = self
            .lock()
            .maps
            .get(&(self.contract.clone(), key.as_bytes().to_vec()))
            .map(|m| m.len() as u64)
            .unwrap_or(0);
        HostReply::ok(len, cost)
    }

    fn global_has(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<bool> {
        let cost = self.costs.sized(self.costs.get, contract.len() + key.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let found = self.lock().kv.contains_key(&(contract, key.as_bytes().to_vec()));
        HostReply::ok(found, cost)
    }

    fn global_get(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>> {
        let cost = self.costs.sized(self.costs.get, contract.len() + key.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let value = self
            .lock()
            .kv
            .get(&(contract, key.as_bytes().to_vec()))
            .map(|v| TransferBuffer::new(v.as_slice()));
        HostReply::ok(value, cost)
    }

    fn global_map_has(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        field: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<bool> {
        let cost = self
            .costs
            .sized(self.costs.get, contract.len() + key.len() + field.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let found = self
            .lock()
            .maps
            .get(&(contract, key.as_bytes().to_vec()))
            .is_some_and(|m| m.contains_key(field.as_bytes()));
        HostReply::ok(found, cost)
    }

    fn global_map_get(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        field: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>> {
        let cost = self
            .costs
            .sized(self.costs.get, contract.len() + key.len() + field.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let value = self
            .lock()
            .maps
            .get(&(contract, key.as_bytes().to_vec()))
            .and_then(|m| m.get(field.as_bytes()))
            .map(|v| TransferBuffer::new(v.as_slice()));
        HostReply::ok(value, cost)
    }

    fn global_map_keys(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<TransferBuffer> {
        let cost = self.costs.sized(self.costs.scan, contract.len() + key.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let state = self.lock();
        let fields = state.maps.get(&(contract, key.as_bytes().to_vec()));
        HostReply::ok(Self::keys_json(fields), cost)
    }

    fn global_map_len(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        _owner: &TransferBuffer,
    ) -> HostReply<u64> {
        let cost = self.costs.sized(self.costs.scan, contract.len() + key.len());
        let contract = String::from_utf8_lossy(contract.as_bytes()).into_owned();
        let len = self
            .lock()
            .maps
            .get(&(contract, key.as_bytes().to_vec()))
            .map(|m| m.len() as u64)
            .unwrap_or(0);
        HostReply::ok(len, cost)
    }
}

impl LedgerHost for MemLedger {
    fn block_info(&self, _sbx: SandboxId) -> HostReply<TransferBuffer> {
        self.info_json(&self.block)
    }

    fn tx_info(&self, _sbx: SandboxId) -> HostReply<TransferBuffer> {
        self.info_json(&self.tx)
    }

    fn context_info(&self, _sbx: SandboxId) -> HostReply<TransferBuffer> {
        let context = serde_json::json!({
            "contract_name": self.contract,
            "publisher": self.tx.publisher,
            "caller": { "name": self.tx.publisher, "is_account": true },
        });
        self.info_json(&context)
    }

    fn call(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> HostReply<TransferBuffer> {
        self.do_call(contract, api, args, false)
    }

    fn call_with_auth(
        &self,
        _sbx: SandboxId,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> HostReply<TransferBuffer> {
        self.do_call(contract, api, args, true)
    }

    fn require_auth(
        &self,
        _sbx: SandboxId,
        account: &TransferBuffer,
        permission: &TransferBuffer,
    ) -> HostReply<bool> {
        let account = String::from_utf8_lossy(account.as_bytes()).into_owned();
        let permission = String::from_utf8_lossy(permission.as_bytes()).into_owned();
        let granted = self.lock().grants.contains(&(account.clone(), permission.clone()));
        if !granted {
            debug!(%account, %permission, "authorization denied");
        }
        HostReply::ok(granted, self.costs.auth)
    }

    fn receipt(&self, sbx: SandboxId, content: &TransferBuffer) -> HostReply<()> {
        let cost = self.costs.sized(self.costs.emit, content.len());
        let mut state = self.lock();
        if state.receipts.len() >= self.limits.max_receipts {
            warn!(sandbox = %sbx, limit = self.limits.max_receipts, "receipt limit reached");
            return HostReply::err(HostError::rejected("receipt limit reached"), cost);
        }
        state
            .receipts
            .push(String::from_utf8_lossy(content.as_bytes()).into_owned());
        HostReply::ok((), cost)
    }

    fn event(&self, sbx: SandboxId, content: &TransferBuffer) -> HostReply<()> {
        let cost = self.costs.sized(self.costs.emit, content.len());
        let mut state = self.lock();
        if state.events.len() >= self.limits.max_events {
            warn!(sandbox = %sbx, limit = self.limits.max_events, "event limit reached");
            return HostReply::err(HostError::rejected("event limit reached"), cost);
        }
        state
            .events
            .push(String::from_utf8_lossy(content.as_bytes()).into_owned());
        HostReply::ok((), cost)
    }
}
