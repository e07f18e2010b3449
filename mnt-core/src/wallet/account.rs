use super::address::Address;
use std::cmp::Ordering;

/// Result of merging an address into an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMerge {
    pub is_new: bool,
    pub updated: bool,
    /// Position of the resolved address in [`Account::addresses`]
    pub index: usize,
}

impl AddressMerge {
    pub fn changed(&self) -> bool {
        self.is_new || self.updated
    }
}

/// A BIP44 account and its derived addresses, kept sorted by [`Address::position_cmp`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub xpub_hash: String,
    /// Account number as used in the derivation path (hardened bit included)
    pub address_index: u32,
    pub bip32_path: String,
    pub balance: u64,
    pub received: u64,
    pub name: String,
    addresses: Vec<Address>,
}

impl Account {
    pub fn new(id: i64, xpub_hash: &str, address_index: u32, bip32_path: &str) -> Self {
        Self {
            id,
            xpub_hash: xpub_hash.to_string(),
            address_index,
            bip32_path: bip32_path.trim().to_string(),
            ..Default::default()
        }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn receive_addresses(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter().filter(|a| !a.is_change)
    }

    pub fn change_addresses(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter().filter(|a| a.is_change)
    }

    pub fn address_by_id(&self, id: i64) -> Option<&Address> {
        self.addresses.iter().find(|a| a.id == id)
    }

    pub fn address_by_string(&self, address: &str) -> Option<&Address> {
        self.addresses.iter().find(|a| a.address == address)
    }

    /// Insert `address`, or merge it into the existing address with the same id.
    ///
    /// An existing address keeps its identity and position, only balance and received are
    /// taken from `address`, and `updated` is reported only when one of them differs.
    pub fn add_address(&mut self, mut address: Address) -> AddressMerge {
        if let Some(index) = self.addresses.iter().position(|a| a.id == address.id) {
            let updated = self.addresses[index].update_from(&address);
            return AddressMerge {
                is_new: false,
                updated,
                index,
            };
        }

        address.account_id = self.id;

        let index = match self.addresses.last() {
            Some(last) if last.position_cmp(&address) == Ordering::Greater => {
                match self
                    .addresses
                    .binary_search_by(|existing| existing.position_cmp(&address))
                {
                    Ok(pos) | Err(pos) => pos,
                }
            }
            _ => self.addresses.len(),
        };
        self.addresses.insert(index, address);

        AddressMerge {
            is_new: true,
            updated: false,
            index,
        }
    }

    /// Record how far an address has been scanned. Not part of the merge since the height is
    /// bookkeeping, not something shown to the user. Returns false for an unknown id.
    pub fn set_last_scan_height(&mut self, id: i64, height: u32) -> bool {
        match self.addresses.iter_mut().find(|a| a.id == id) {
            Some(address) => {
                address.last_scan_block_height = height;
                true
            }
            None => false,
        }
    }

    pub fn remove_address(&mut self, id: i64) -> Option<Address> {
        let pos = self.addresses.iter().position(|a| a.id == id)?;
        Some(self.addresses.remove(pos))
    }

    /// Copy balance, received and name from `other` if any of them differs.
    pub fn update_from(&mut self, other: &Account) -> bool {
        if self.balance == other.balance && self.received == other.received && self.name == other.name {
            return false;
        }

        self.balance = other.balance;
        self.received = other.received;
        self.name = other.name.clone();
        true
    }

    /// Recompute balance and received as the sums over the addresses.
    pub fn refresh_totals(&mut self) -> bool {
        let balance = self.addresses.iter().map(|a| a.balance).sum();
        let received = self.addresses.iter().map(|a| a.received).sum();

        if self.balance == balance && self.received == received {
            return false;
        }

        self.balance = balance;
        self.received = received;
        true
    }

    /// Next unused derivation index on the receiving or change chain.
    pub fn next_address_index(&self, is_change: bool) -> u32 {
        self.addresses
            .iter()
            .filter(|a| a.is_change == is_change)
            .map(|a| a.address_index + 1)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive(id: i64, index: u32) -> Address {
        Address::new(
            id,
            index,
            false,
            &format!("Xr{}", index),
            &format!("44'/5'/0'/0/{}", index),
        )
    }

    fn change(id: i64, index: u32) -> Address {
        Address::new(
            id,
            index,
            true,
            &format!("Xc{}", index),
            &format!("44'/5'/0'/1/{}", index),
        )
    }

    fn indexes(account: &Account) -> Vec<(bool, u32)> {
        account
            .addresses()
            .iter()
            .map(|a| (a.is_change, a.address_index))
            .collect()
    }

    #[test]
    fn test_receive_addresses_are_sorted() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        account.add_address(receive(13, 3));
        account.add_address(receive(11, 1));
        let merge = account.add_address(receive(12, 2));
        assert!(merge.is_new);
        assert_eq!(merge.index, 1);

        assert_eq!(indexes(&account), vec![(false, 1), (false, 2), (false, 3)]);
        assert!(account.addresses().iter().all(|a| a.account_id == 1));
    }

    #[test]
    fn test_change_address_goes_after_receive_addresses() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        account.add_address(receive(11, 1));
        account.add_address(receive(12, 2));
        account.add_address(receive(13, 3));

        let merge = account.add_address(change(20, 0));
        assert_eq!(merge.index, 3);

        // A receiving address discovered later still lands before the change chain
        let merge = account.add_address(receive(10, 0));
        assert_eq!(merge.index, 0);
        let merge = account.add_address(receive(14, 4));
        assert_eq!(merge.index, 4);

        assert_eq!(
            indexes(&account),
            vec![(false, 0), (false, 1), (false, 2), (false, 3), (false, 4), (true, 0)]
        );
        assert_eq!(account.receive_addresses().count(), 5);
        assert_eq!(account.change_addresses().count(), 1);
        assert_eq!(account.next_address_index(false), 5);
        assert_eq!(account.next_address_index(true), 1);
    }

    #[test]
    fn test_add_address_is_idempotent() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        let mut addr = receive(11, 1);
        addr.balance = 100;

        let first = account.add_address(addr.clone());
        assert!(first.is_new);

        let second = account.add_address(addr.clone());
        assert_eq!(
            second,
            AddressMerge {
                is_new: false,
                updated: false,
                index: 0
            }
        );
        assert!(!second.changed());

        addr.received = 250;
        let third = account.add_address(addr);
        assert!(!third.is_new);
        assert!(third.updated);
        assert_eq!(account.addresses()[third.index].received, 250);
        assert_eq!(account.addresses().len(), 1);
    }

    #[test]
    fn test_update_from_reports_only_real_changes() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        let mut other = Account::new(2, "other", 7, "other");
        assert!(!account.update_from(&other));

        other.name = "Savings".to_string();
        assert!(account.update_from(&other));
        assert_eq!(account.name, "Savings");
        assert_eq!(account.id, 1);
        assert!(!account.update_from(&other));
    }

    #[test]
    fn test_set_last_scan_height_is_not_a_merge() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        let mut addr = receive(11, 0);
        addr.last_scan_block_height = 210;
        account.add_address(addr.clone());

        // A newer height alone does not count as an update
        addr.last_scan_block_height = 300;
        assert!(!account.add_address(addr).changed());
        assert_eq!(account.addresses()[0].last_scan_block_height, 210);

        assert!(account.set_last_scan_height(11, 300));
        assert_eq!(account.addresses()[0].last_scan_block_height, 300);
        assert!(!account.set_last_scan_height(99, 300));
    }

    #[test]
    fn test_remove_and_refresh_totals() {
        let mut account = Account::new(1, "hash", 0x8000_0000, "44'/5'/0'");
        let mut a = receive(11, 0);
        a.balance = 10;
        a.received = 20;
        let mut b = change(12, 0);
        b.balance = 5;
        b.received = 5;
        account.add_address(a);
        account.add_address(b);

        assert!(account.refresh_totals());
        assert_eq!((account.balance, account.received), (15, 25));
        assert!(!account.refresh_totals());

        let removed = account.remove_address(12).unwrap();
        assert_eq!(removed.address, "Xc0");
        assert!(account.remove_address(12).is_none());
        assert!(account.refresh_totals());
        assert_eq!(account.balance, 10);
    }
}
