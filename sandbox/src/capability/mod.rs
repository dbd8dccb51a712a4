//! Host-call bridge and capability objects.
//!
//! Guest code reaches the host only through the methods listed in
//! [`Method`]. Both engines marshal their arguments into owned
//! [`TransferBuffer`]s and call [`Bridge::dispatch`], which:
//!
//! 1. Refuses the call if the run is halted (no host call, no charge)
//! 2. Checks arity against the method table
//! 3. Invokes the host callback through a capability proxy
//! 4. Charges the reported cost, success or not
//! 5. Maps host errors to [`BridgeError`] for the engine to throw

mod crypto;
mod instruction;
mod ledger;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use gasvm_hostapi::{HostBindings, HostError, HostReply, SandboxId, TransferBuffer};
use tracing::{info, trace};

use crate::error::SandboxError;
use crate::governor::{Breach, Governor};
use crate::modules::ModuleResolver;

pub use crypto::Crypto;
pub use instruction::InstructionCounter;
pub use ledger::Ledger;
pub use storage::Storage;

/// Error thrown into guest code by a capability call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Wrong arity or argument type.
    #[error("{0}")]
    InvalidArgument(String),

    /// The host callback reported a failure.
    #[error("{message}")]
    Host {
        method: &'static str,
        message: String,
    },

    /// The run was killed or its budget is spent.
    #[error("execution halted: {0}")]
    Halted(Breach),
}

impl BridgeError {
    fn from_host(method: Method, error: HostError) -> Self {
        match error {
            HostError::InvalidArgument(msg) => {
                Self::InvalidArgument(format!("{}: {}", method.qualified(), msg))
            }
            HostError::OutOfGas => Self::Halted(Breach::Gas),
            other => Self::Host {
                method: method.name(),
                message: other.guest_message(),
            },
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// A host result ready to become a guest value.
#[derive(Debug, PartialEq, Eq)]
pub enum HostValue {
    Unit,
    Null,
    Bool(bool),
    Number(u64),
    Str(TransferBuffer),
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u64> for HostValue {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<TransferBuffer> for HostValue {
    fn from(buf: TransferBuffer) -> Self {
        Self::Str(buf)
    }
}

impl From<Option<TransferBuffer>> for HostValue {
    fn from(buf: Option<TransferBuffer>) -> Self {
        buf.map_or(Self::Null, Self::Str)
    }
}

/// Every host method a guest can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    StoragePut,
    StorageHas,
    StorageGet,
    StorageDel,
    StorageMapPut,
    StorageMapHas,
    StorageMapGet,
    StorageMapDel,
    StorageMapKeys,
    StorageMapLen,
    StorageGlobalHas,
    StorageGlobalGet,
    StorageGlobalMapHas,
    StorageGlobalMapGet,
    StorageGlobalMapKeys,
    StorageGlobalMapLen,
    BlockInfo,
    TxInfo,
    ContextInfo,
    Call,
    CallWithAuth,
    RequireAuth,
    Receipt,
    Event,
    Hash,
    HashHex,
    Sha256Hex,
    Verify,
}

/// Object, name, required argument count, and whether an owner may follow.
struct MethodInfo(&'static str, &'static str, usize, bool);

impl Method {
    pub const ALL: &'static [Method] = &[
        Method::StoragePut,
        Method::StorageHas,
        Method::StorageGet,
        Method::StorageDel,
        Method::StorageMapPut,
        Method::StorageMapHas,
        Method::StorageMapGet,
        Method::StorageMapDel,
        Method::StorageMapKeys,
        Method::StorageMapLen,
        Method::StorageGlobalHas,
        Method::StorageGlobalGet,
        Method::StorageGlobalMapHas,
        Method::StorageGlobalMapGet,
        Method::StorageGlobalMapKeys,
        Method::StorageGlobalMapLen,
        Method::BlockInfo,
        Method::TxInfo,
        Method::ContextInfo,
        Method::Call,
        Method::CallWithAuth,
        Method::RequireAuth,
        Method::Receipt,
        Method::Event,
        Method::Hash,
        Method::HashHex,
        Method::Sha256Hex,
        Method::Verify,
    ];

    fn info(self) -> MethodInfo {
        use Method::*;
        match self {
            StoragePut => MethodInfo("storage", "put", 2, true),
            StorageHas => MethodInfo("storage", "has", 1, true),
            StorageGet => MethodInfo("storage", "get", 1, true),
            StorageDel => MethodInfo("storage", "del", 1, true),
            StorageMapPut => MethodInfo("storage", "mapPut", 3, true),
            StorageMapHas => MethodInfo("storage", "mapHas", 2, true),
            StorageMapGet => MethodInfo("storage", "mapGet", 2, true),
            StorageMapDel => MethodInfo("storage", "mapDel", 2, true),
            StorageMapKeys => MethodInfo("storage", "mapKeys", 1, true),
            StorageMapLen => MethodInfo("storage", "mapLen", 1, true),
            StorageGlobalHas => MethodInfo("storage", "globalHas", 2, true),
            StorageGlobalGet => MethodInfo("storage", "globalGet", 2, true),
            StorageGlobalMapHas => MethodInfo("storage", "globalMapHas", 3, true),
            StorageGlobalMapGet => MethodInfo("storage", "globalMapGet", 3, true),
            StorageGlobalMapKeys => MethodInfo("storage", "globalMapKeys", 2, true),
            StorageGlobalMapLen => MethodInfo("storage", "globalMapLen", 2, true),
            BlockInfo => MethodInfo("blockchain", "blockInfo", 0, false),
            TxInfo => MethodInfo("blockchain", "txInfo", 0, false),
            ContextInfo => MethodInfo("blockchain", "contextInfo", 0, false),
            Call => MethodInfo("blockchain", "call", 3, false),
            CallWithAuth => MethodInfo("blockchain", "callWithAuth", 3, false),
            RequireAuth => MethodInfo("blockchain", "requireAuth", 2, false),
            Receipt => MethodInfo("blockchain", "receipt", 1, false),
            Event => MethodInfo("blockchain", "event", 1, false),
            Hash => MethodInfo("crypto", "hash", 1, false),
            HashHex => MethodInfo("crypto", "hashHex", 1, false),
            Sha256Hex => MethodInfo("crypto", "sha256Hex", 1, false),
            Verify => MethodInfo("crypto", "verify", 4, false),
        }
    }

    /// Global object the method hangs off (`storage`, `blockchain`, `crypto`).
    pub fn object(self) -> &'static str {
        self.info().0
    }

    pub fn name(self) -> &'static str {
        self.info().1
    }

    pub fn required(self) -> usize {
        self.info().2
    }

    pub fn takes_owner(self) -> bool {
        self.info().3
    }

    pub fn max_args(self) -> usize {
        self.required() + usize::from(self.takes_owner())
    }

    /// `object.name`, as written in guest code.
    pub fn qualified(self) -> String {
        format!("{}.{}", self.object(), self.name())
    }

    pub fn lookup(object: &str, name: &str) -> Option<Method> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.object() == object && m.name() == name)
    }

    /// Names of the global capability objects.
    pub fn objects() -> [&'static str; 3] {
        ["storage", "blockchain", "crypto"]
    }
}

/// Per-sandbox state shared by every capability object.
#[derive(Debug)]
pub struct Bridge {
    id: SandboxId,
    governor: Arc<Governor>,
    host: HostBindings,
    modules: ModuleResolver,
}

impl Bridge {
    pub fn new(
        id: SandboxId,
        governor: Arc<Governor>,
        host: HostBindings,
        modules: ModuleResolver,
    ) -> Self {
        Self {
            id,
            governor,
            host,
            modules,
        }
    }

    pub fn id(&self) -> SandboxId {
        self.id
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    pub fn storage(&self) -> Storage<'_> {
        Storage::new(self)
    }

    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(self)
    }

    pub fn crypto(&self) -> Crypto<'_> {
        Crypto::new(self)
    }

    pub fn instructions(&self) -> InstructionCounter<'_> {
        InstructionCounter::new(self)
    }

    pub fn set_module_path(&self, path: Option<PathBuf>) {
        self.modules.set_search_path(path);
    }

    pub fn module_path(&self) -> Option<PathBuf> {
        self.modules.search_path()
    }

    /// Source of module `name` for the guest's `require`.
    pub fn require(&self, name: &str) -> Result<String, BridgeError> {
        self.check_running()?;
        self.modules.load(name).map_err(|e| match e {
            SandboxError::InvalidArgument(msg) => BridgeError::InvalidArgument(msg),
            other => BridgeError::Host {
                method: "require",
                message: other.to_string(),
            },
        })
    }

    /// Forward a guest diagnostic line to the host log.
    pub fn log(&self, line: &str) {
        info!(target: "gasvm::guest", sandbox = %self.id, "{}", line);
    }

    /// Call `method` with already-marshaled arguments.
    ///
    /// Missing trailing optional arguments are passed as empty buffers.
    pub fn dispatch(
        &self,
        method: Method,
        mut args: Vec<TransferBuffer>,
    ) -> Result<HostValue, BridgeError> {
        let (min, max) = (method.required(), method.max_args());
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(BridgeError::InvalidArgument(format!(
                "{} expects {} arguments, got {}",
                method.qualified(),
                expected,
                args.len()
            )));
        }
        args.resize_with(max, TransferBuffer::empty);

        use Method::*;
        let a = &args;
        let storage = self.storage();
        let ledger = self.ledger();
        let crypto = self.crypto();
        let value: HostValue = match method {
            StoragePut => storage.put(&a[0], &a[1], &a[2])?.into(),
            StorageHas => storage.has(&a[0], &a[1])?.into(),
            StorageGet => storage.get(&a[0], &a[1])?.into(),
            StorageDel => storage.del(&a[0], &a[1])?.into(),
            StorageMapPut => storage.map_put(&a[0], &a[1], &a[2], &a[3])?.into(),
            StorageMapHas => storage.map_has(&a[0], &a[1], &a[2])?.into(),
            StorageMapGet => storage.map_get(&a[0], &a[1], &a[2])?.into(),
            StorageMapDel => storage.map_del(&a[0], &a[1], &a[2])?.into(),
            StorageMapKeys => storage.map_keys(&a[0], &a[1])?.into(),
            StorageMapLen => storage.map_len(&a[0], &a[1])?.into(),
            StorageGlobalHas => storage.global_has(&a[0], &a[1], &a[2])?.into(),
            StorageGlobalGet => storage.global_get(&a[0], &a[1], &a[2])?.into(),
            StorageGlobalMapHas => storage.global_map_has(&a[0], &a[1], &a[2], &a[3])?.into(),
            StorageGlobalMapGet => storage.global_map_get(&a[0], &a[1], &a[2], &a[3])?.into(),
            StorageGlobalMapKeys => storage.global_map_keys(&a[0], &a[1], &a[2])?.into(),
            StorageGlobalMapLen => storage.global_map_len(&a[0], &a[1], &a[2])?.into(),
            BlockInfo => ledger.block_info()?.into(),
            TxInfo => ledger.tx_info()?.into(),
            ContextInfo => ledger.context_info()?.into(),
            Call => ledger.call(&a[0], &a[1], &a[2])?.into(),
            CallWithAuth => ledger.call_with_auth(&a[0], &a[1], &a[2])?.into(),
            RequireAuth => ledger.require_auth(&a[0], &a[1])?.into(),
            Receipt => ledger.receipt(&a[0])?.into(),
            Event => ledger.event(&a[0])?.into(),
            Hash => crypto.hash(&a[0])?.into(),
            HashHex => crypto.hash_hex(&a[0])?.into(),
            Sha256Hex => crypto.sha256_hex(&a[0])?.into(),
            Verify => crypto.verify(&a[0], &a[1], &a[2], &a[3])?.into(),
        };
        Ok(value)
    }

    fn check_running(&self) -> Result<(), BridgeError> {
        match self.governor.halt_reason() {
            Some(reason) => Err(BridgeError::Halted(reason)),
            None => Ok(()),
        }
    }

    /// Run one host callback under the bridge contract.
    fn invoke<T>(
        &self,
        method: Method,
        call: impl FnOnce(&HostBindings, SandboxId) -> HostReply<T>,
    ) -> Result<T, BridgeError> {
        self.check_running()?;
        let HostReply { outcome, cost } = call(&self.host, self.id);
        trace!(
            sandbox = %self.id,
            method = method.name(),
            object = method.object(),
            cost,
            ok = outcome.is_ok(),
            "host call"
        );
        if self.governor.charge(cost).is_err() {
            return Err(BridgeError::Halted(Breach::Gas));
        }
        outcome.map_err(|e| BridgeError::from_host(method, e))
    }
}
