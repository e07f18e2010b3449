use std::cmp::Ordering;

/// One derived address of a BIP44 account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub id: i64,
    pub account_id: i64,
    pub address_index: u32,
    pub address: String,
    pub bip32_path: String,
    pub balance: u64,
    pub received: u64,
    pub is_change: bool,
    pub last_scan_block_height: u32,
}

impl Address {
    pub fn new(id: i64, address_index: u32, is_change: bool, address: &str, bip32_path: &str) -> Self {
        Self {
            id,
            address_index,
            is_change,
            address: address.trim().to_string(),
            bip32_path: bip32_path.trim().to_string(),
            ..Default::default()
        }
    }

    /// Position inside the account: receiving addresses before change addresses, then by
    /// derivation index. The id breaks ties so distinct addresses never compare equal.
    pub fn position_cmp(&self, other: &Address) -> Ordering {
        (self.is_change, self.address_index, self.id).cmp(&(
            other.is_change,
            other.address_index,
            other.id,
        ))
    }

    /// Merge the fields a rescan can change. Returns true if anything changed.
    pub fn update_from(&mut self, other: &Address) -> bool {
        let mut updated = false;

        if self.balance != other.balance {
            self.balance = other.balance;
            updated = true;
        }
        if self.received != other.received {
            self.received = other.received;
            updated = true;
        }

        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_order() {
        let receive_5 = Address::new(1, 5, false, "Xr5", "44'/5'/0'/0/5");
        let change_0 = Address::new(2, 0, true, "Xc0", "44'/5'/0'/1/0");
        let receive_6 = Address::new(3, 6, false, "Xr6", "44'/5'/0'/0/6");

        assert_eq!(receive_5.position_cmp(&change_0), Ordering::Less);
        assert_eq!(change_0.position_cmp(&receive_6), Ordering::Greater);
        assert_eq!(receive_5.position_cmp(&receive_6), Ordering::Less);
        assert_eq!(receive_5.position_cmp(&receive_5.clone()), Ordering::Equal);
    }

    #[test]
    fn test_update_from_merges_only_mutable_fields() {
        let mut addr = Address::new(1, 0, false, "Xaddr", "44'/5'/0'/0/0");
        let mut incoming = Address::new(99, 7, true, "Xother", "other");
        incoming.balance = 1500;

        assert!(addr.update_from(&incoming));
        assert_eq!(addr.balance, 1500);
        assert_eq!(addr.id, 1);
        assert_eq!(addr.address, "Xaddr");
        assert_eq!(addr.address_index, 0);
        assert!(!addr.is_change);

        assert!(!addr.update_from(&incoming));
    }
}
