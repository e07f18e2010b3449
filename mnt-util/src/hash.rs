use sha2::{Digest, Sha256};

/// Hash of an account extended public key, as stored in the `xpub_hash` column.
/// Surrounding whitespace is ignored so copy/pasted keys hash the same way.
pub fn xpub_hash(xpub: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(xpub.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity of a hierarchical-deterministic tree (one hardware wallet seed on one coin network).
///
/// The identity is derived from the root extended public key so the raw key is never persisted
/// in the `hd_tree` table.
pub fn hd_tree_ident(coin_name: &str, root_xpub: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(coin_name.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(root_xpub.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpub_hash() {
        let xpub = "xpub6CUGRUonZSQ4TWtTMmzXdrXDtypWKiKrhko4egpiMZbpiaQL2jkwSB1icqYh2cfDfVxdx4df189oLKnC5fSwqPfgyP3hooxujYzAu3fDVmz";
        let h1 = xpub_hash(xpub);
        let h2 = xpub_hash(&format!("  {}\n", xpub));
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, xpub_hash("xpub-other"));
    }

    #[test]
    fn test_hd_tree_ident() {
        let a = hd_tree_ident("Dash", "xpub-root");
        let b = hd_tree_ident("dash", "xpub-root");
        let c = hd_tree_ident("dash testnet", "xpub-root");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, xpub_hash("xpub-root"));
    }
}
