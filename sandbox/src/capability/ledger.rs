//! `blockchain` capability: chain metadata, calls, auth, receipts.

use gasvm_hostapi::TransferBuffer;

use super::{Bridge, BridgeError, Method};

/// Ledger proxy bound to one sandbox.
#[derive(Debug, Clone, Copy)]
pub struct Ledger<'a> {
    bridge: &'a Bridge,
}

impl<'a> Ledger<'a> {
    pub(super) fn new(bridge: &'a Bridge) -> Self {
        Self { bridge }
    }

    pub fn block_info(&self) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::BlockInfo, |host, sbx| host.ledger.block_info(sbx))
    }

    pub fn tx_info(&self) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::TxInfo, |host, sbx| host.ledger.tx_info(sbx))
    }

    pub fn context_info(&self) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::ContextInfo, |host, sbx| host.ledger.context_info(sbx))
    }

    pub fn call(
        &self,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> Result<TransferBuffer, BridgeError> {
        self.bridge.invoke(Method::Call, |host, sbx| {
            host.ledger.call(sbx, contract, api, args)
        })
    }

    pub fn call_with_auth(
        &self,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> Result<TransferBuffer, BridgeError> {
        self.bridge.invoke(Method::CallWithAuth, |host, sbx| {
            host.ledger.call_with_auth(sbx, contract, api, args)
        })
    }

    pub fn require_auth(
        &self,
        account: &TransferBuffer,
        permission: &TransferBuffer,
    ) -> Result<bool, BridgeError> {
        self.bridge.invoke(Method::RequireAuth, |host, sbx| {
            host.ledger.require_auth(sbx, account, permission)
        })
    }

    pub fn receipt(&self, content: &TransferBuffer) -> Result<(), BridgeError> {
        self.bridge
            .invoke(Method::Receipt, |host, sbx| host.ledger.receipt(sbx, content))
    }

    pub fn event(&self, content: &TransferBuffer) -> Result<(), BridgeError> {
        self.bridge
            .invoke(Method::Event, |host, sbx| host.ledger.event(sbx, content))
    }
}
