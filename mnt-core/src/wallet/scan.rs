use super::account::Account;
use super::address::Address;
use super::model::SharedWalletModel;
use super::utxo::Utxo;
use crate::cache::{CacheSession, WalletStore};
use crate::error::CacheError;

/// What one scanning pass found for an account.
#[derive(Debug, Clone, Default)]
pub struct ScanBatch {
    pub account: Account,
    pub addresses: Vec<Address>,
    pub utxos: Vec<Utxo>,
    /// Height the addresses were scanned up to
    pub scanned_height: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub account_id: i64,
    pub account_changed: bool,
    pub new_addresses: usize,
    pub updated_addresses: usize,
    pub new_utxos: usize,
}

impl ScanSummary {
    /// Nothing visible changed, the UI can skip its refresh.
    pub fn is_noop(&self) -> bool {
        !self.account_changed
            && self.new_addresses == 0
            && self.updated_addresses == 0
            && self.new_utxos == 0
    }
}

/// Persist a scan batch and merge it into the shared model.
///
/// The rows are written and committed inside one cache lease, which is released before the
/// model lock is taken, so the two locks are never held together.
pub fn apply_scan_batch(
    cache: &CacheSession,
    wallet: &SharedWalletModel,
    tree_id: i64,
    batch: ScanBatch,
) -> Result<ScanSummary, CacheError> {
    let ScanBatch {
        mut account,
        mut addresses,
        mut utxos,
        scanned_height,
    } = batch;

    {
        let cursor = cache.get_cursor()?;
        let store = WalletStore::new(&cursor);

        store.save_account(tree_id, &mut account)?;
        for address in addresses.iter_mut() {
            store.save_address(tree_id, account.id, address)?;
            if let Some(height) = scanned_height {
                store.set_last_scan_height(address.id, height)?;
                address.last_scan_block_height = height;
            }
        }
        for utxo in utxos.iter_mut() {
            if utxo.address_id == 0 {
                if let Some(owner) = addresses.iter().find(|a| a.address == utxo.address) {
                    utxo.address_id = owner.id;
                    utxo.bip32_path = owner.bip32_path.clone();
                }
            }
            store.save_utxo(tree_id, utxo)?;
        }

        cursor.commit()?;
        cursor.release()?;
    }

    let summary = wallet.update(|model| {
        let mut summary = ScanSummary {
            account_id: account.id,
            ..Default::default()
        };

        let account_id = account.id;
        let merge = model.add_account(account);
        summary.account_changed = merge.is_new || merge.updated;

        if let Some(target) = model.account_by_id_mut(account_id) {
            for address in addresses {
                let (id, height) = (address.id, address.last_scan_block_height);
                let merge = target.add_address(address);
                if scanned_height.is_some() {
                    target.set_last_scan_height(id, height);
                }
                if merge.is_new {
                    summary.new_addresses += 1;
                } else if merge.updated {
                    summary.updated_addresses += 1;
                }
            }
        }

        for utxo in utxos {
            let is_new = model.utxos().all(|u| u.id != utxo.id);
            if model.merge_utxo(utxo) && is_new {
                summary.new_utxos += 1;
            }
        }

        summary
    });

    debug!("Applied scan batch: {:?}", summary);

    Ok(summary)
}
