/// Output of a transaction being prepared. Free-text fields are trimmed when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutput {
    address: String,
    satoshis: u64,
    change_bip32_path: Option<String>,
    is_change: bool,
}

impl TxOutput {
    pub fn new(address: &str, satoshis: u64) -> Self {
        let mut output = Self {
            satoshis,
            ..Default::default()
        };
        output.set_address(address);
        output
    }

    pub fn change(address: &str, satoshis: u64, bip32_path: &str) -> Self {
        let mut output = Self::new(address, satoshis);
        output.set_change_bip32_path(Some(bip32_path));
        output.is_change = true;
        output
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, address: &str) {
        self.address = address.trim().to_string();
    }

    pub fn satoshis(&self) -> u64 {
        self.satoshis
    }

    pub fn set_satoshis(&mut self, satoshis: u64) {
        self.satoshis = satoshis;
    }

    pub fn change_bip32_path(&self) -> Option<&str> {
        self.change_bip32_path.as_deref()
    }

    /// A blank path clears the value.
    pub fn set_change_bip32_path(&mut self, path: Option<&str>) {
        self.change_bip32_path = path
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string());
    }

    pub fn is_change(&self) -> bool {
        self.is_change
    }

    pub fn set_is_change(&mut self, is_change: bool) {
        self.is_change = is_change;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_trim() {
        let mut output = TxOutput::new("  XpESxaUmonkq8RaLLp46Brx2K39ggQe226\n", 1000);
        assert_eq!(output.address(), "XpESxaUmonkq8RaLLp46Brx2K39ggQe226");
        assert_eq!(output.change_bip32_path(), None);

        output.set_change_bip32_path(Some(" 44'/5'/0'/1/3 "));
        assert_eq!(output.change_bip32_path(), Some("44'/5'/0'/1/3"));

        output.set_change_bip32_path(Some("   "));
        assert_eq!(output.change_bip32_path(), None);

        let change = TxOutput::change("Xchange ", 500, "\t44'/5'/0'/1/0");
        assert!(change.is_change());
        assert_eq!(change.address(), "Xchange");
        assert_eq!(change.change_bip32_path(), Some("44'/5'/0'/1/0"));
    }
}
