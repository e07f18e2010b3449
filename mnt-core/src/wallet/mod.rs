mod account;
mod address;
mod model;
mod scan;
mod tx_output;
mod utxo;

pub use account::{Account, AddressMerge};
pub use address::Address;
pub use model::{AccountMerge, SharedWalletModel, SharedWalletModelRef, WalletModel};
pub use scan::{ScanBatch, ScanSummary, apply_scan_batch};
pub use tx_output::TxOutput;
pub use utxo::{COINBASE_MATURITY, ChainHeight, ChainHeightRef, ChainTip, Utxo};
