use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mnt-cache-cli")]
#[command(about = "Maintenance tool for the masternode wallet cache")]
pub struct Cli {
    /// Wallet service directory, defaults to ~/.mnt/mnt-wallet
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Log level for the console output
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open the cache, apply pending schema migrations and print the table columns
    Migrate,

    /// Print the row count of every cache table
    Stats,

    /// List the accounts and addresses of one hd tree in wallet order
    Accounts {
        /// Tree identity as stored in the cache
        #[arg(long, value_name = "IDENT")]
        tree: String,
    },

    /// Compute the tree identity of a root extended public key
    Ident {
        #[arg(long, default_value = "dash")]
        coin: String,

        #[arg(value_name = "XPUB")]
        xpub: String,
    },

    /// Delete the cache database file
    ClearDb {
        /// Do not ask for confirmation
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
}
