use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Coinbase outputs stay locked until this many blocks have been mined on top of them.
///
/// Confirmations include the block holding the output, so "100 blocks on top" means more than
/// 100 confirmations. An output mined at height `H` is still locked at tip `H + 99`
/// (100 confirmations) and spendable from `H + 100`, hence the `<=` in
/// [`Utxo::is_coinbase_locked`].
pub const COINBASE_MATURITY: u32 = 100;

/// Source of the current chain height, shared by all UTXOs of a wallet.
pub trait ChainHeight: Send + Sync {
    /// `None` while the height is not known yet
    fn current_height(&self) -> Option<u32>;
}

pub type ChainHeightRef = Arc<dyn ChainHeight>;

impl fmt::Debug for dyn ChainHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHeight({:?})", self.current_height())
    }
}

/// Chain height updated by the scanning thread.
#[derive(Debug, Default)]
pub struct ChainTip {
    height: AtomicU32,
}

impl ChainTip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::SeqCst);
    }
}

impl ChainHeight for ChainTip {
    fn current_height(&self) -> Option<u32> {
        match self.height.load(Ordering::SeqCst) {
            0 => None,
            height => Some(height),
        }
    }
}

/// Unspent output owned by one of the wallet addresses.
#[derive(Debug, Clone, Default)]
pub struct Utxo {
    pub id: i64,
    pub address_id: i64,
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub satoshis: u64,
    /// 0 while unconfirmed
    pub block_height: u32,
    pub bip32_path: String,
    pub time_stamp: u64,
    pub coinbase: bool,
    height_source: Option<ChainHeightRef>,
}

impl Utxo {
    pub fn new(txid: &str, output_index: u32, satoshis: u64, block_height: u32) -> Self {
        Self {
            txid: txid.trim().to_string(),
            output_index,
            satoshis,
            block_height,
            ..Default::default()
        }
    }

    pub fn set_height_source(&mut self, source: Option<ChainHeightRef>) {
        self.height_source = source;
    }

    pub fn has_height_source(&self) -> bool {
        self.height_source.is_some()
    }

    /// `None` when no height source is configured or the source has no height yet.
    /// Unconfirmed outputs have 0 confirmations.
    pub fn confirmations(&self) -> Option<u32> {
        let source = self.height_source.as_ref()?;
        if self.block_height == 0 {
            return Some(0);
        }

        let current = source.current_height()?;
        if current >= self.block_height {
            Some(current - self.block_height + 1)
        } else {
            Some(0)
        }
    }

    /// A coinbase output is locked until [`COINBASE_MATURITY`] blocks are mined on top of the
    /// block that created it. With unknown confirmations a coinbase output counts as locked.
    pub fn is_coinbase_locked(&self) -> bool {
        if !self.coinbase {
            return false;
        }

        match self.confirmations() {
            Some(confirmations) => confirmations <= COINBASE_MATURITY,
            None => true,
        }
    }

    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.output_index)
    }

    /// Merge chain data from a fresh scan. Returns true if anything changed.
    pub fn update_from(&mut self, other: &Utxo) -> bool {
        let mut updated = false;

        if self.block_height != other.block_height {
            self.block_height = other.block_height;
            updated = true;
        }
        if self.time_stamp != other.time_stamp {
            self.time_stamp = other.time_stamp;
            updated = true;
        }

        updated
    }
}
