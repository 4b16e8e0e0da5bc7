use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

static PRICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)").unwrap()
});

/// One product extracted from a listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub price: String,
    pub out_of_stock: bool,
}

impl Item {
    pub fn new(title: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            price: price.into(),
            out_of_stock: false,
        }
    }

    /// Numeric amount in the price text, ignoring currency symbols and
    /// thousands separators.
    pub fn price_amount(&self) -> Option<Decimal> {
        let captures = PRICE_REGEX.captures(&self.price)?;
        let digits = captures.get(1)?.as_str().replace(',', "");
        Decimal::from_str(&digits).ok()
    }
}
