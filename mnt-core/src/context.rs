use crate::cache::{CacheSession, CacheSessionRef, WalletStore};
use crate::config::MntConfigRef;
use crate::dispatch::{DispatcherHandle, InteractivePromptRef, PromptKind, request_input};
use crate::error::{CacheError, ContextError, PromptError};
use crate::lock::{DeadlockWatchdog, LockRegistry, LockRegistryRef};
use crate::wallet::{
    ChainTip, ScanBatch, ScanSummary, SharedWalletModel, SharedWalletModelRef, WalletModel,
    apply_scan_batch,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static CONTEXT_ALIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide state of the wallet: lock registry, opened cache session, shared model and
/// the dispatcher handle of the owning thread.
///
/// At most one context is alive per process. It is created on the owning thread and handed
/// to workers through [`Self::worker`].
pub struct AppContext {
    config: MntConfigRef,
    db_path: PathBuf,
    registry: LockRegistryRef,
    cache: CacheSessionRef,
    chain_tip: Arc<ChainTip>,
    wallet: SharedWalletModelRef,
    dispatcher: DispatcherHandle,
    prompt: Option<InteractivePromptRef>,
    watchdog: Option<DeadlockWatchdog>,
}

impl AppContext {
    pub fn new(
        config: MntConfigRef,
        root_dir: &Path,
        dispatcher: DispatcherHandle,
    ) -> Result<Self, ContextError> {
        if CONTEXT_ALIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            error!("Application context already exists");
            return Err(ContextError::AlreadyExists);
        }

        Self::build(config, root_dir, dispatcher).map_err(|e| {
            CONTEXT_ALIVE.store(false, Ordering::SeqCst);
            e
        })
    }

    fn build(
        config: MntConfigRef,
        root_dir: &Path,
        dispatcher: DispatcherHandle,
    ) -> Result<Self, ContextError> {
        let data_dir = config.data_dir(root_dir);
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            let msg = format!("{}: {}", data_dir.display(), e);
            error!("Failed to create data directory {}", msg);
            ContextError::Directory(msg)
        })?;

        let registry = LockRegistry::new();
        let cache = Arc::new(CacheSession::new(&registry));
        let db_path = config.db_path(root_dir);
        cache.open(&db_path)?;

        let chain_tip = Arc::new(ChainTip::new());
        let wallet = Arc::new(SharedWalletModel::new(
            &registry,
            WalletModel::new(Some(chain_tip.clone())),
        ));

        let watchdog = if config.watchdog.enabled {
            let interval = Duration::from_secs(config.watchdog.interval_secs.max(1));
            match DeadlockWatchdog::start(registry.clone(), interval) {
                Ok(watchdog) => Some(watchdog),
                Err(e) => {
                    warn!("Running without deadlock watchdog: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!("Application context ready, cache {}", db_path.display());

        Ok(Self {
            config,
            db_path,
            registry,
            cache,
            chain_tip,
            wallet,
            dispatcher,
            prompt: None,
            watchdog,
        })
    }

    pub fn is_alive() -> bool {
        CONTEXT_ALIVE.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &MntConfigRef {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn registry(&self) -> &LockRegistryRef {
        &self.registry
    }

    pub fn cache(&self) -> &CacheSessionRef {
        &self.cache
    }

    pub fn chain_tip(&self) -> &Arc<ChainTip> {
        &self.chain_tip
    }

    pub fn wallet(&self) -> &SharedWalletModelRef {
        &self.wallet
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Install the dialogs used by workers. Affects workers created afterwards.
    pub fn set_prompt(&mut self, prompt: InteractivePromptRef) {
        self.prompt = Some(prompt);
    }

    pub fn worker(&self) -> WorkerContext {
        WorkerContext {
            cache: self.cache.clone(),
            chain_tip: self.chain_tip.clone(),
            wallet: self.wallet.clone(),
            dispatcher: self.dispatcher.clone(),
            prompt: self.prompt.clone(),
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }

        let outstanding = self.cache.close();
        if outstanding > 0 {
            warn!(
                "Application context dropped with {} cache cursor(s) still held",
                outstanding
            );
        }

        CONTEXT_ALIVE.store(false, Ordering::SeqCst);
        info!("Application context released");
    }
}

/// Handles a worker thread needs. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    cache: CacheSessionRef,
    chain_tip: Arc<ChainTip>,
    wallet: SharedWalletModelRef,
    dispatcher: DispatcherHandle,
    prompt: Option<InteractivePromptRef>,
}

impl WorkerContext {
    pub fn cache(&self) -> &CacheSessionRef {
        &self.cache
    }

    pub fn chain_tip(&self) -> &Arc<ChainTip> {
        &self.chain_tip
    }

    pub fn wallet(&self) -> &SharedWalletModelRef {
        &self.wallet
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    pub fn request_input(&self, kind: PromptKind, message: &str) -> Result<String, PromptError> {
        match &self.prompt {
            Some(prompt) => request_input(&self.dispatcher, prompt, kind, message),
            None => {
                let msg = format!("No prompt installed for {:?} request", kind);
                error!("{}", msg);
                Err(PromptError::Failed(msg))
            }
        }
    }

    /// Load the accounts and unspent outputs of an hd tree from the cache into the model,
    /// creating the tree row if needed. Returns the tree id.
    pub fn load_tree(&self, ident: &str) -> Result<i64, CacheError> {
        let (tree_id, accounts, utxos) = {
            let cursor = self.cache.get_cursor()?;
            let store = WalletStore::new(&cursor);

            let tree_id = store.get_tree_id(ident, true)?.ok_or_else(|| {
                let msg = format!("Failed to create hd tree {}", ident);
                error!("{}", msg);
                CacheError::Store(msg)
            })?;
            let accounts = store.load_accounts(tree_id)?;
            let utxos = store.load_utxos(tree_id)?;

            cursor.commit()?;
            cursor.release()?;
            (tree_id, accounts, utxos)
        };

        info!(
            "Loaded hd tree {}: {} account(s), {} utxo(s)",
            tree_id,
            accounts.len(),
            utxos.len()
        );

        self.wallet.update(|model| {
            for account in accounts {
                model.add_account(account);
            }
            for utxo in utxos {
                model.merge_utxo(utxo);
            }
        });

        Ok(tree_id)
    }

    pub fn apply_scan_batch(
        &self,
        tree_id: i64,
        batch: ScanBatch,
    ) -> Result<ScanSummary, CacheError> {
        apply_scan_batch(&self.cache, &self.wallet, tree_id, batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MntConfig;
    use crate::dispatch::MainThreadDispatcher;

    // The only unit test constructing a context, since the slot is process-wide.
    #[test]
    fn test_single_live_context() {
        let root = std::env::temp_dir().join("mnt").join("context");
        if root.exists() {
            std::fs::remove_dir_all(&root).unwrap();
        }

        let dispatcher = MainThreadDispatcher::new();
        let config = Arc::new(MntConfig::default());

        let context = AppContext::new(config.clone(), &root, dispatcher.handle()).unwrap();
        assert!(AppContext::is_alive());
        assert!(context.cache().is_active());
        assert!(context.db_path().exists());

        let second = AppContext::new(config.clone(), &root, dispatcher.handle());
        assert!(matches!(second, Err(ContextError::AlreadyExists)));

        let worker = context.worker();
        let tree_id = std::thread::spawn(move || worker.load_tree("tree-ident"))
            .join()
            .unwrap()
            .unwrap();
        assert!(tree_id > 0);

        let cache = context.cache().clone();
        drop(context);
        assert!(!cache.is_active());
        assert!(!AppContext::is_alive());

        let again = AppContext::new(config, &root, dispatcher.handle()).unwrap();
        drop(again);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
