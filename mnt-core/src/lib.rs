//! Coordination core of the masternode-tool wallet: the tracked reentrant lock, the wallet
//! cache session over SQLite, the owning-thread dispatcher used for interactive prompts, and
//! the in-memory account/address/UTXO model shared between scanning threads and the UI thread.

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod wallet;

#[macro_use]
extern crate log;

pub use cache::{CacheCursor, CacheSession, CacheSessionRef, WalletStore};
pub use config::{MntConfig, MntConfigRef};
pub use context::{AppContext, WorkerContext};
pub use dispatch::{
    DispatcherHandle, Dispatched, InteractivePrompt, InteractivePromptRef, MainThreadDispatcher,
    PromptKind, request_input,
};
pub use error::{CacheError, ContextError, LockError, PromptError};
pub use lock::{
    CallSite, DeadlockReport, DeadlockWatchdog, LockRegistry, LockRegistryRef,
    ReentrantTrackedLock, ThreadSite, TrackedLockGuard,
};
pub use wallet::{
    Account, Address, ChainHeight, ChainTip, ScanBatch, ScanSummary, SharedWalletModel,
    SharedWalletModelRef, TxOutput, Utxo, WalletModel, apply_scan_batch,
};
