use {
    serde::Deserialize,
    std::{collections::HashMap, path::Path},
};

/// The static exchange and foundation address sets. Loaded once at startup
/// and immutable afterwards; provisioning the file is out of scope.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressBook {
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeInfo>,
    #[serde(default)]
    pub foundation: HashMap<String, FoundationInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeInfo {
    pub name: String,
    #[serde(default)]
    pub logo: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FoundationInfo {
    pub name: String,
}

impl AddressBook {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_book() {
        let book = AddressBook::from_toml(
            r#"
                [exchanges.t1KjUvXAaYbd2fo4MXTNVdUc1BtLZQ93jHm]
                name = "Binance"
                logo = "binance.png"

                [exchanges.t1bNz6tJEEKZBLc3BkoXBH9xHNqbGsMZsoC]
                name = "Kucoin"

                [foundation.t3Vqxc9nSjhcPzLj3yprDDiGFWWLXdX5and]
                name = "Flux Foundation"
            "#,
        )
        .unwrap();
        assert_eq!(book.exchanges.len(), 2);
        assert_eq!(
            book.exchanges["t1KjUvXAaYbd2fo4MXTNVdUc1BtLZQ93jHm"].name,
            "Binance"
        );
        assert_eq!(book.exchanges["t1bNz6tJEEKZBLc3BkoXBH9xHNqbGsMZsoC"].logo, "");
        assert_eq!(book.foundation.len(), 1);
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(AddressBook::from_toml("[miners.t1abc]\nname = \"x\"").is_err());
    }
}
