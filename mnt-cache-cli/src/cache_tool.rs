use super::cmd::{Cli, Commands};
use mnt_core::cache::{TABLES, table_columns};
use mnt_core::{CacheError, CacheSession, LockRegistry, LockRegistryRef, MntConfig, WalletStore};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct CacheTool {
    root_dir: PathBuf,
    db_path: PathBuf,
    registry: LockRegistryRef,
}

impl CacheTool {
    pub fn new(root_dir: &Path) -> Result<Self, String> {
        let config = MntConfig::load(root_dir)?;
        let db_path = config.db_path(root_dir);
        println!("Wallet cache: {}", db_path.display());

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            db_path,
            registry: LockRegistry::new(),
        })
    }

    pub fn process_command(&self, cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::Migrate => self.migrate(),
            Commands::Stats => self.stats(),
            Commands::Accounts { tree } => self.accounts(&tree),
            Commands::Ident { coin, xpub } => {
                println!("{}", mnt_util::hd_tree_ident(&coin, &xpub));
                Ok(())
            }
            Commands::ClearDb { yes } => self.clear_db(yes),
        }
    }

    fn open_session(&self) -> Result<CacheSession, String> {
        if let Some(dir) = self.db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                let msg = format!("Failed to create directory {}: {}", dir.display(), e);
                error!("{}", msg);
                msg
            })?;
        }

        let session = CacheSession::new(&self.registry);
        session.open(&self.db_path).map_err(to_msg)?;
        Ok(session)
    }

    fn migrate(&self) -> Result<(), String> {
        let session = self.open_session()?;
        {
            let cursor = session.get_cursor().map_err(to_msg)?;
            for table in TABLES {
                let columns = cursor
                    .with_connection(|conn| table_columns(conn, table))
                    .map_err(to_msg)?;
                println!("{}: {}", table, columns.join(", "));
            }
            cursor.release().map_err(to_msg)?;
        }
        session.close();

        println!("Schema is up to date");
        Ok(())
    }

    fn stats(&self) -> Result<(), String> {
        let session = self.open_session()?;
        {
            let cursor = session.get_cursor().map_err(to_msg)?;
            let counts = WalletStore::new(&cursor).table_counts().map_err(to_msg)?;
            for (table, count) in counts {
                println!("{:<12} {:>10}", table, count);
            }
            cursor.release().map_err(to_msg)?;
        }
        session.close();

        Ok(())
    }

    fn accounts(&self, ident: &str) -> Result<(), String> {
        let session = self.open_session()?;
        {
            let cursor = session.get_cursor().map_err(to_msg)?;
            let store = WalletStore::new(&cursor);

            let Some(tree_id) = store.get_tree_id(ident, false).map_err(to_msg)? else {
                let msg = format!("No hd tree with ident {}", ident);
                println!("{}", msg);
                return Err(msg);
            };

            if let Some(label) = store.tree_label(tree_id).map_err(to_msg)? {
                println!("Tree {} ({})", tree_id, label);
            } else {
                println!("Tree {}", tree_id);
            }

            for account in store.load_accounts(tree_id).map_err(to_msg)? {
                println!(
                    "  [{}] {} {} balance={} received={}",
                    account.id, account.bip32_path, account.name, account.balance, account.received
                );
                for address in account.addresses() {
                    println!(
                        "    [{}] {}{} {} balance={} scanned={}",
                        address.id,
                        address.bip32_path,
                        if address.is_change { " (change)" } else { "" },
                        address.address,
                        address.balance,
                        address.last_scan_block_height
                    );
                }
            }

            cursor.release().map_err(to_msg)?;
        }
        session.close();

        Ok(())
    }

    fn clear_db(&self, yes: bool) -> Result<(), String> {
        if !self.db_path.exists() {
            println!("Nothing to delete");
            return Ok(());
        }

        if !yes && !confirm(&format!("Delete {}?", self.db_path.display()))? {
            println!("Aborted");
            return Ok(());
        }

        let journal = PathBuf::from(format!("{}-journal", self.db_path.display()));
        for path in [&self.db_path, &journal] {
            if path.exists() {
                std::fs::remove_file(path).map_err(|e| {
                    let msg = format!("Failed to delete {}: {}", path.display(), e);
                    error!("{}", msg);
                    msg
                })?;
            }
        }

        info!("Deleted wallet cache under {}", self.root_dir.display());
        println!("Deleted {}", self.db_path.display());
        Ok(())
    }
}

fn to_msg(e: CacheError) -> String {
    e.to_string()
}

fn confirm(question: &str) -> Result<bool, String> {
    print!("{} [y/N] ", question);
    std::io::stdout()
        .flush()
        .map_err(|e| format!("Failed to write prompt: {}", e))?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| format!("Failed to read answer: {}", e))?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
