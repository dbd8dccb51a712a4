//! `storage` capability: contract key-value storage and maps.

use gasvm_hostapi::TransferBuffer;

use super::{Bridge, BridgeError, Method};

/// Storage proxy bound to one sandbox.
///
/// `owner` names the account paying for stored bytes; empty means the
/// executing contract.
#[derive(Debug, Clone, Copy)]
pub struct Storage<'a> {
    bridge: &'a Bridge,
}

type Buf = TransferBuffer;

impl<'a> Storage<'a> {
    pub(super) fn new(bridge: &'a Bridge) -> Self {
        Self { bridge }
    }

    pub fn put(&self, key: &Buf, value: &Buf, owner: &Buf) -> Result<(), BridgeError> {
        self.bridge.invoke(Method::StoragePut, |host, sbx| {
            host.storage.put(sbx, key, value, owner)
        })
    }

    pub fn has(&self, key: &Buf, owner: &Buf) -> Result<bool, BridgeError> {
        self.bridge
            .invoke(Method::StorageHas, |host, sbx| host.storage.has(sbx, key, owner))
    }

    pub fn get(&self, key: &Buf, owner: &Buf) -> Result<Option<Buf>, BridgeError> {
        self.bridge
            .invoke(Method::StorageGet, |host, sbx| host.storage.get(sbx, key, owner))
    }

    pub fn del(&self, key: &Buf, owner: &Buf) -> Result<(), BridgeError> {
        self.bridge
            .invoke(Method::StorageDel, |host, sbx| host.storage.del(sbx, key, owner))
    }

    pub fn map_put(
        &self,
        key: &Buf,
        field: &Buf,
        value: &Buf,
        owner: &Buf,
    ) -> Result<(), BridgeError> {
        self.bridge.invoke(Method::StorageMapPut, |host, sbx| {
            host.storage.map_put(sbx, key, field, value, owner)
        })
    }

    pub fn map_has(&self, key: &Buf, field: &Buf, owner: &Buf) -> Result<bool, BridgeError> {
        self.bridge.invoke(Method::StorageMapHas, |host, sbx| {
            host.storage.map_has(sbx, key, field, owner)
        })
    }

    pub fn map_get(
        &self,
        key: &Buf,
        field: &Buf,
        owner: &Buf,
    ) -> Result<Option<Buf>, BridgeError> {
        self.bridge.invoke(Method::StorageMapGet, |host, sbx| {
            host.storage.map_get(sbx, key, field, owner)
        })
    }

    pub fn map_del(&self, key: &Buf, field: &Buf, owner: &Buf) -> Result<(), BridgeError> {
        self.bridge.invoke(Method::StorageMapDel, |host, sbx| {
            host.storage.map_del(sbx, key, field, owner)
        })
    }

    /// Field names as a JSON array string.
    pub fn map_keys(&self, key: &Buf, owner: &Buf) -> Result<Buf, BridgeError> {
        self.bridge.invoke(Method::StorageMapKeys, |host, sbx| {
            host.storage.map_keys(sbx, key, owner)
        })
    }

    pub fn map_len(&self, key: &Buf, owner: &Buf) -> Result<u64, BridgeError> {
        self.bridge.invoke(Method::StorageMapLen, |host, sbx| {
            host.storage.map_len(sbx, key, owner)
        })
    }

    // ── Read-only views into other contracts ──

    pub fn global_has(&self, contract: &Buf, key: &Buf, owner: &Buf) -> Result<bool, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalHas, |host, sbx| {
            host.storage.global_has(sbx, contract, key, owner)
        })
    }

    pub fn global_get(
        &self,
        contract: &Buf,
        key: &Buf,
        owner: &Buf,
    ) -> Result<Option<Buf>, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalGet, |host, sbx| {
            host.storage.global_get(sbx, contract, key, owner)
        })
    }

    pub fn global_map_has(
        &self,
        contract: &Buf,
        key: &Buf,
        field: &Buf,
        owner: &Buf,
    ) -> Result<bool, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalMapHas, |host, sbx| {
            host.storage.global_map_has(sbx, contract, key, field, owner)
        })
    }

    pub fn global_map_get(
        &self,
        contract: &Buf,
        key: &Buf,
        field: &Buf,
        owner: &Buf,
    ) -> Result<Option<Buf>, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalMapGet, |host, sbx| {
            host.storage.global_map_get(sbx, contract, key, field, owner)
        })
    }

    pub fn global_map_keys(
        &self,
        contract: &Buf,
        key: &Buf,
        owner: &Buf,
    ) -> Result<Buf, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalMapKeys, |host, sbx| {
            host.storage.global_map_keys(sbx, contract, key, owner)
        })
    }

    pub fn global_map_len(
        &self,
        contract: &Buf,
        key: &Buf,
        owner: &Buf,
    ) -> Result<u64, BridgeError> {
        self.bridge.invoke(Method::StorageGlobalMapLen, |host, sbx| {
            host.storage.global_map_len(sbx, contract, key, owner)
        })
    }
}
