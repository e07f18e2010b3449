use super::account::Account;
use super::address::Address;
use super::utxo::{ChainHeightRef, Utxo};
use crate::lock::{LockRegistryRef, ReentrantTrackedLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, TryLockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMerge {
    pub is_new: bool,
    pub updated: bool,
    pub index: usize,
}

/// In-memory view of the wallet: accounts ordered by account number, each with its ordered
/// addresses, and the unspent outputs keyed by id.
///
/// Entries are merged in place and removed only by id. There is no locking in here, see
/// [`SharedWalletModel`] for sharing between threads.
#[derive(Debug, Default)]
pub struct WalletModel {
    accounts: Vec<Account>,
    utxos: BTreeMap<i64, Utxo>,
    height_source: Option<ChainHeightRef>,
}

impl WalletModel {
    pub fn new(height_source: Option<ChainHeightRef>) -> Self {
        Self {
            accounts: Vec::new(),
            utxos: BTreeMap::new(),
            height_source,
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account_by_id(&self, id: i64) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn account_by_id_mut(&mut self, id: i64) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    /// Insert `account` or merge it into the account with the same id, together with its
    /// addresses. `updated` is set when the account or any of its addresses changed.
    pub fn add_account(&mut self, account: Account) -> AccountMerge {
        if let Some(index) = self.accounts.iter().position(|a| a.id == account.id) {
            let existing = &mut self.accounts[index];
            let mut updated = existing.update_from(&account);
            for address in account.addresses() {
                updated |= existing.add_address(address.clone()).changed();
            }

            return AccountMerge {
                is_new: false,
                updated,
                index,
            };
        }

        let key = (account.address_index, account.id);
        let index = self
            .accounts
            .partition_point(|a| (a.address_index, a.id) < key);
        self.accounts.insert(index, account);

        AccountMerge {
            is_new: true,
            updated: false,
            index,
        }
    }

    pub fn remove_account(&mut self, id: i64) -> Option<Account> {
        let pos = self.accounts.iter().position(|a| a.id == id)?;
        let account = self.accounts.remove(pos);
        self.utxos.retain(|_, u| account.address_by_id(u.address_id).is_none());
        Some(account)
    }

    pub fn find_address(&self, id: i64) -> Option<&Address> {
        self.accounts.iter().find_map(|a| a.address_by_id(id))
    }

    /// Remove an address and its unspent outputs.
    pub fn remove_address(&mut self, id: i64) -> Option<Address> {
        let removed = self.accounts.iter_mut().find_map(|a| a.remove_address(id))?;
        self.utxos.retain(|_, u| u.address_id != id);
        Some(removed)
    }

    /// Insert or update an unspent output. Returns true if the model changed.
    pub fn merge_utxo(&mut self, mut utxo: Utxo) -> bool {
        if let Some(existing) = self.utxos.get_mut(&utxo.id) {
            return existing.update_from(&utxo);
        }

        utxo.set_height_source(self.height_source.clone());
        self.utxos.insert(utxo.id, utxo);
        true
    }

    pub fn remove_utxo(&mut self, id: i64) -> Option<Utxo> {
        self.utxos.remove(&id)
    }

    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    pub fn utxos_for_address(&self, address_id: i64) -> impl Iterator<Item = &Utxo> {
        self.utxos.values().filter(move |u| u.address_id == address_id)
    }

    /// Outputs that can be used as transaction inputs right now.
    pub fn spendable_utxos(&self) -> Vec<&Utxo> {
        self.utxos
            .values()
            .filter(|u| !u.is_coinbase_locked())
            .collect()
    }

    pub fn total_balance(&self) -> u64 {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.utxos.clear();
    }
}

/// [`WalletModel`] shared between scanning threads and the owning thread.
///
/// Access goes through a tracked lock so a blocked reader shows up in deadlock diagnostics.
/// The closures passed to [`Self::read`] and [`Self::update`] must not access the model again.
pub struct SharedWalletModel {
    lock: ReentrantTrackedLock,
    model: Mutex<WalletModel>,
}

pub type SharedWalletModelRef = Arc<SharedWalletModel>;

impl SharedWalletModel {
    pub fn new(registry: &LockRegistryRef, model: WalletModel) -> Self {
        Self {
            lock: ReentrantTrackedLock::new(registry, "wallet-model"),
            model: Mutex::new(model),
        }
    }

    pub fn lock(&self) -> &ReentrantTrackedLock {
        &self.lock
    }

    #[track_caller]
    pub fn read<R>(&self, f: impl FnOnce(&WalletModel) -> R) -> R {
        self.update(|model| f(model))
    }

    #[track_caller]
    pub fn update<R>(&self, f: impl FnOnce(&mut WalletModel) -> R) -> R {
        let _guard = self.lock.lock();

        // Holding the tracked lock means no other thread can own the mutex, so contention
        // here can only come from a nested call on this thread.
        let mut model = match self.model.try_lock() {
            Ok(model) => model,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                panic!("Nested access to the wallet model from the same thread")
            }
        };

        f(&mut model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockRegistry;
    use crate::wallet::ChainTip;
    use std::thread;

    fn account(id: i64, number: u32) -> Account {
        Account::new(
            id,
            &format!("hash-{}", id),
            0x8000_0000 + number,
            &format!("44'/5'/{}'", number),
        )
    }

    fn utxo(id: i64, address_id: i64, height: u32) -> Utxo {
        let mut utxo = Utxo::new(&format!("tx{}", id), 0, 1000, height);
        utxo.id = id;
        utxo.address_id = address_id;
        utxo
    }

    #[test]
    fn test_accounts_are_ordered_and_merged_in_place() {
        let mut model = WalletModel::default();
        model.add_account(account(2, 1));
        let merge = model.add_account(account(1, 0));
        assert_eq!(merge.index, 0);
        let ids: Vec<i64> = model.accounts().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let mut refreshed = account(2, 1);
        refreshed.add_address(Address::new(20, 0, false, "Xa", "44'/5'/1'/0/0"));
        let merge = model.add_account(refreshed.clone());
        assert!(!merge.is_new);
        assert!(merge.updated);
        assert_eq!(model.account_by_id(2).unwrap().addresses().len(), 1);

        let merge = model.add_account(refreshed);
        assert!(!merge.updated);
    }

    #[test]
    fn test_remove_address_drops_its_utxos() {
        let mut model = WalletModel::default();
        let mut acc = account(1, 0);
        acc.add_address(Address::new(10, 0, false, "Xa", "44'/5'/0'/0/0"));
        acc.add_address(Address::new(11, 1, false, "Xb", "44'/5'/0'/0/1"));
        model.add_account(acc);

        assert!(model.merge_utxo(utxo(100, 10, 50)));
        assert!(model.merge_utxo(utxo(101, 11, 50)));
        assert!(!model.merge_utxo(utxo(101, 11, 50)));
        assert!(model.merge_utxo(utxo(101, 11, 51)));

        let removed = model.remove_address(10).unwrap();
        assert_eq!(removed.address, "Xa");
        assert!(model.find_address(10).is_none());
        assert_eq!(model.utxos().count(), 1);
        assert_eq!(model.utxos_for_address(11).count(), 1);

        assert!(model.remove_account(1).is_some());
        assert_eq!(model.utxos().count(), 0);
    }

    #[test]
    fn test_spendable_utxos_skip_immature_coinbase() {
        let tip = Arc::new(ChainTip::new());
        let mut model = WalletModel::new(Some(tip.clone()));

        let mut reward = utxo(1, 10, 500);
        reward.coinbase = true;
        model.merge_utxo(reward);
        model.merge_utxo(utxo(2, 10, 550));

        tip.set_height(560);
        let spendable: Vec<i64> = model.spendable_utxos().iter().map(|u| u.id).collect();
        assert_eq!(spendable, vec![2]);
        assert_eq!(model.utxos().next().unwrap().confirmations(), Some(61));

        tip.set_height(600);
        assert_eq!(model.spendable_utxos().len(), 2);
    }

    #[test]
    fn test_shared_model_concurrent_updates() {
        let registry = LockRegistry::new();
        let shared = Arc::new(SharedWalletModel::new(&registry, WalletModel::default()));
        shared.update(|m| {
            m.add_account(account(1, 0));
        });

        let mut handles = Vec::new();
        for t in 0..4u32 {
            let shared = shared.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25u32 {
                    let index = t * 25 + i;
                    shared.update(|m| {
                        let acc = m.account_by_id_mut(1).unwrap();
                        acc.add_address(Address::new(
                            index as i64 + 1,
                            index,
                            false,
                            &format!("X{}", index),
                            &format!("44'/5'/0'/0/{}", index),
                        ));
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let indexes: Vec<u32> = shared.read(|m| {
            m.account_by_id(1)
                .unwrap()
                .addresses()
                .iter()
                .map(|a| a.address_index)
                .collect()
        });
        assert_eq!(indexes, (0..100).collect::<Vec<u32>>());
        assert_eq!(shared.lock().depth(), 0);
    }
}
