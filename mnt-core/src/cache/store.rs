use super::schema::TABLES;
use super::session::CacheCursor;
use crate::error::CacheError;
use crate::wallet::{Account, Address, Utxo};
use rusqlite::{OptionalExtension, params};

/// Wallet rows in the cache, read and written through a leased cursor.
///
/// Accounts and addresses share the `address` table: account rows have no `parent_id`,
/// address rows point at their account. Rows are matched by `(tree_id, path)`.
pub struct WalletStore<'a> {
    cursor: &'a CacheCursor<'a>,
}

impl<'a> WalletStore<'a> {
    pub fn new(cursor: &'a CacheCursor<'a>) -> Self {
        Self { cursor }
    }

    pub fn get_tree_id(&self, ident: &str, create: bool) -> Result<Option<i64>, CacheError> {
        let id = self.cursor.query_row(
            "SELECT id FROM hd_tree WHERE ident = ?1",
            params![ident],
            |row| row.get::<_, i64>(0),
        )?;
        if id.is_some() || !create {
            return Ok(id);
        }

        self.cursor
            .execute("INSERT INTO hd_tree (ident) VALUES (?1)", params![ident])?;
        let id = self.cursor.last_insert_rowid()?;
        info!("Created hd tree {} for ident {}", id, ident);

        Ok(Some(id))
    }

    pub fn set_tree_label(&self, tree_id: i64, label: &str) -> Result<(), CacheError> {
        self.cursor.execute(
            "UPDATE hd_tree SET label = ?1 WHERE id = ?2",
            params![label, tree_id],
        )?;
        Ok(())
    }

    fn find_row(
        &self,
        tree_id: i64,
        path: &str,
        account_row: bool,
    ) -> Result<Option<i64>, CacheError> {
        let sql = if account_row {
            "SELECT id FROM address WHERE tree_id = ?1 AND path = ?2 AND parent_id IS NULL"
        } else {
            "SELECT id FROM address WHERE tree_id = ?1 AND path = ?2 AND parent_id IS NOT NULL"
        };
        self.cursor
            .query_row(sql, params![tree_id, path], |row| row.get::<_, i64>(0))
    }

    /// Insert or update the account row and store its id in `account.id`.
    /// Returns true if a new row was created.
    pub fn save_account(&self, tree_id: i64, account: &mut Account) -> Result<bool, CacheError> {
        match self.find_row(tree_id, &account.bip32_path, true)? {
            Some(id) => {
                self.cursor.execute(
                    "UPDATE address SET xpub_hash = ?1, address_index = ?2, balance = ?3,
                        received = ?4, label = ?5
                     WHERE id = ?6",
                    params![
                        account.xpub_hash,
                        account.address_index as i64,
                        account.balance as i64,
                        account.received as i64,
                        account.name,
                        id
                    ],
                )?;
                account.id = id;
                Ok(false)
            }
            None => {
                self.cursor.execute(
                    "INSERT INTO address (xpub_hash, parent_id, address_index, path, tree_id,
                        balance, received, is_change, label)
                     VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    params![
                        account.xpub_hash,
                        account.address_index as i64,
                        account.bip32_path,
                        tree_id,
                        account.balance as i64,
                        account.received as i64,
                        account.name
                    ],
                )?;
                account.id = self.cursor.last_insert_rowid()?;
                debug!("Stored new account {} ({})", account.id, account.bip32_path);
                Ok(true)
            }
        }
    }

    /// Insert or update an address row of `account_id` and store its id in `address.id`.
    /// Returns true if a new row was created.
    pub fn save_address(
        &self,
        tree_id: i64,
        account_id: i64,
        address: &mut Address,
    ) -> Result<bool, CacheError> {
        address.account_id = account_id;

        match self.find_row(tree_id, &address.bip32_path, false)? {
            Some(id) => {
                self.cursor.execute(
                    "UPDATE address SET balance = ?1, received = ?2 WHERE id = ?3",
                    params![address.balance as i64, address.received as i64, id],
                )?;
                address.id = id;
                Ok(false)
            }
            None => {
                self.cursor.execute(
                    "INSERT INTO address (parent_id, address_index, address, path, tree_id,
                        balance, received, is_change, last_scan_block_height)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        account_id,
                        address.address_index as i64,
                        address.address,
                        address.bip32_path,
                        tree_id,
                        address.balance as i64,
                        address.received as i64,
                        address.is_change,
                        address.last_scan_block_height as i64
                    ],
                )?;
                address.id = self.cursor.last_insert_rowid()?;
                Ok(true)
            }
        }
    }

    pub fn set_last_scan_height(&self, address_id: i64, height: u32) -> Result<(), CacheError> {
        self.cursor.execute(
            "UPDATE address SET last_scan_block_height = ?1 WHERE id = ?2",
            params![height as i64, address_id],
        )?;
        Ok(())
    }

    /// Delete an address together with its outputs. Returns false if there was no such row.
    pub fn delete_address(&self, address_id: i64) -> Result<bool, CacheError> {
        self.cursor.execute(
            "DELETE FROM tx_output WHERE address_id = ?1",
            params![address_id],
        )?;
        let deleted = self.cursor.execute(
            "DELETE FROM address WHERE id = ?1 AND parent_id IS NOT NULL",
            params![address_id],
        )?;
        Ok(deleted > 0)
    }

    /// Accounts of a tree ordered by account number, each with its ordered addresses.
    pub fn load_accounts(&self, tree_id: i64) -> Result<Vec<Account>, CacheError> {
        let mut accounts = self.cursor.query_map(
            "SELECT id, xpub_hash, address_index, path, balance, received, label
             FROM address WHERE tree_id = ?1 AND parent_id IS NULL
             ORDER BY address_index, id",
            params![tree_id],
            |row| {
                let mut account = Account::new(
                    row.get(0)?,
                    &row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, i64>(2)? as u32,
                    &row.get::<_, String>(3)?,
                );
                account.balance = row.get::<_, i64>(4)? as u64;
                account.received = row.get::<_, i64>(5)? as u64;
                account.name = row.get::<_, Option<String>>(6)?.unwrap_or_default();
                Ok(account)
            },
        )?;

        for account in accounts.iter_mut() {
            let addresses = self.cursor.query_map(
                "SELECT id, address_index, address, path, balance, received, is_change,
                    last_scan_block_height
                 FROM address WHERE parent_id = ?1",
                params![account.id],
                |row| {
                    let mut address = Address::new(
                        row.get(0)?,
                        row.get::<_, i64>(1)? as u32,
                        row.get(6)?,
                        &row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        &row.get::<_, String>(3)?,
                    );
                    address.balance = row.get::<_, i64>(4)? as u64;
                    address.received = row.get::<_, i64>(5)? as u64;
                    address.last_scan_block_height =
                        row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u32;
                    Ok(address)
                },
            )?;

            for address in addresses {
                account.add_address(address);
            }
        }

        Ok(accounts)
    }

    fn tx_id(&self, utxo: &Utxo) -> Result<i64, CacheError> {
        let existing = self.cursor.query_row(
            "SELECT id FROM tx WHERE tx_hash = ?1",
            params![utxo.txid],
            |row| row.get::<_, i64>(0),
        )?;

        match existing {
            Some(id) => {
                self.cursor.execute(
                    "UPDATE tx SET block_height = ?1, block_timestamp = ?2 WHERE id = ?3",
                    params![utxo.block_height as i64, utxo.time_stamp as i64, id],
                )?;
                Ok(id)
            }
            None => {
                self.cursor.execute(
                    "INSERT INTO tx (tx_hash, block_height, block_timestamp, coinbase)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        utxo.txid,
                        utxo.block_height as i64,
                        utxo.time_stamp as i64,
                        utxo.coinbase
                    ],
                )?;
                self.cursor.last_insert_rowid()
            }
        }
    }

    /// Insert or update an output. When `utxo.address_id` is unset the owning address is
    /// looked up by its address string inside the tree.
    pub fn save_utxo(&self, tree_id: i64, utxo: &mut Utxo) -> Result<bool, CacheError> {
        if utxo.address_id == 0 {
            let found = self.cursor.query_row(
                "SELECT id, path FROM address
                 WHERE tree_id = ?1 AND address = ?2 AND parent_id IS NOT NULL",
                params![tree_id, utxo.address],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?;
            let Some((address_id, path)) = found else {
                let msg = format!(
                    "No address {} in tree {} for output {}",
                    utxo.address,
                    tree_id,
                    utxo.outpoint()
                );
                error!("{}", msg);
                return Err(CacheError::Store(msg));
            };
            utxo.address_id = address_id;
            utxo.bip32_path = path;
        }

        let tx_id = self.tx_id(utxo)?;
        let existing = self.cursor.query_row(
            "SELECT id FROM tx_output WHERE tx_id = ?1 AND output_index = ?2",
            params![tx_id, utxo.output_index as i64],
            |row| row.get::<_, i64>(0),
        )?;

        match existing {
            Some(id) => {
                utxo.id = id;
                Ok(false)
            }
            None => {
                self.cursor.execute(
                    "INSERT INTO tx_output (address_id, tx_id, output_index, satoshis)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        utxo.address_id,
                        tx_id,
                        utxo.output_index as i64,
                        utxo.satoshis as i64
                    ],
                )?;
                utxo.id = self.cursor.last_insert_rowid()?;
                Ok(true)
            }
        }
    }

    pub fn mark_utxo_spent(
        &self,
        utxo_id: i64,
        spending_txid: &str,
        input_index: u32,
    ) -> Result<(), CacheError> {
        let existing = self.cursor.query_row(
            "SELECT id FROM tx WHERE tx_hash = ?1",
            params![spending_txid],
            |row| row.get::<_, i64>(0),
        )?;
        let spending_tx_id = match existing {
            Some(id) => id,
            None => {
                self.cursor.execute(
                    "INSERT INTO tx (tx_hash) VALUES (?1)",
                    params![spending_txid],
                )?;
                self.cursor.last_insert_rowid()?
            }
        };
        self.cursor.execute(
            "UPDATE tx_output SET spent_tx_id = ?1, spent_input_index = ?2 WHERE id = ?3",
            params![spending_tx_id, input_index as i64, utxo_id],
        )?;
        Ok(())
    }

    /// Unspent outputs of all addresses of a tree, ordered by block height then id.
    pub fn load_utxos(&self, tree_id: i64) -> Result<Vec<Utxo>, CacheError> {
        self.cursor.query_map(
            "SELECT o.id, o.address_id, a.address, t.tx_hash, o.output_index, o.satoshis,
                t.block_height, a.path, t.block_timestamp, t.coinbase
             FROM tx_output o
             JOIN address a ON a.id = o.address_id
             JOIN tx t ON t.id = o.tx_id
             WHERE a.tree_id = ?1 AND o.spent_tx_id IS NULL
             ORDER BY t.block_height, o.id",
            params![tree_id],
            |row| {
                let mut utxo = Utxo::new(
                    &row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)? as u32,
                    row.get::<_, i64>(5)? as u64,
                    row.get::<_, i64>(6)? as u32,
                );
                utxo.id = row.get(0)?;
                utxo.address_id = row.get(1)?;
                utxo.address = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                utxo.bip32_path = row.get::<_, Option<String>>(7)?.unwrap_or_default();
                utxo.time_stamp = row.get::<_, i64>(8)? as u64;
                utxo.coinbase = row.get(9)?;
                Ok(utxo)
            },
        )
    }

    pub fn table_counts(&self) -> Result<Vec<(String, i64)>, CacheError> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let count = self
                .cursor
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get::<_, i64>(0)
                })?
                .unwrap_or(0);
            counts.push((table.to_string(), count));
        }
        Ok(counts)
    }

    pub fn tree_label(&self, tree_id: i64) -> Result<Option<String>, CacheError> {
        let label = self
            .cursor
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT label FROM hd_tree WHERE id = ?1",
                    params![tree_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|e| super::store_err("Failed to read hd tree label", e))
            })?;
        Ok(label.flatten())
    }
}
