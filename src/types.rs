//! Core domain types for places, products, collectibles and balances.
//!
//! Amounts are carried as integer base units (`Stroops`, 10^7 per whole
//! unit) for both the native currency and the loyalty token, so nothing
//! on the transaction path ever rounds through a float.

use serde::{Deserialize, Serialize};

use crate::config::{AMOUNT_SCALE, COORD_SCALE};

// === Amounts ===

/// Amount in base units (1 whole unit = 10^7 base units)
pub type Stroops = i128;

/// Number of decimal places carried by `Stroops`
pub const AMOUNT_DECIMALS: usize = 7;

/// Whole units to base units, truncating toward negative infinity.
#[inline]
pub fn units_to_stroops(units: f64) -> Stroops {
    (units * AMOUNT_SCALE as f64).floor() as Stroops
}

/// Whole-unit constant in base units.
#[inline]
pub const fn whole(units: i64) -> Stroops {
    units as Stroops * AMOUNT_SCALE
}

/// Render base units as a decimal string with trailing zeros trimmed
/// (e.g. `500000000` -> `"50"`, `125000000` -> `"12.5"`).
pub fn format_stroops(amount: Stroops) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let scale = AMOUNT_SCALE as u128;
    let int_part = abs / scale;
    let frac_part = abs % scale;
    if frac_part == 0 {
        return format!("{}{}", sign, int_part);
    }
    let frac = format!("{:0width$}", frac_part, width = AMOUNT_DECIMALS);
    format!("{}{}.{}", sign, int_part, frac.trim_end_matches('0'))
}

/// Parse an exact decimal string ("100.0000000", "12.5", "7") into base
/// units. Returns `None` for malformed input or more than seven decimals.
pub fn parse_amount(s: &str) -> Option<Stroops> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_str, frac_str) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_str.is_empty() && frac_str.is_empty() {
        return None;
    }
    if frac_str.len() > AMOUNT_DECIMALS
        || !int_str.chars().all(|c| c.is_ascii_digit())
        || !frac_str.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let int_val: i128 = if int_str.is_empty() { 0 } else { int_str.parse().ok()? };
    let frac_val: i128 = if frac_str.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac_str, width = AMOUNT_DECIMALS).parse().ok()?
    };

    let value = int_val.checked_mul(AMOUNT_SCALE)?.checked_add(frac_val)?;
    Some(if negative { -value } else { value })
}

/// Degrees to the fixed-point micro-degree form stored on-chain.
#[inline]
pub fn to_micro_degrees(degrees: f64) -> i64 {
    (degrees * COORD_SCALE).floor() as i64
}

// === Geography ===

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rebuild coordinates from on-chain micro-degrees.
    pub fn from_micro(lat: i64, lng: i64) -> Self {
        Self {
            lat: lat as f64 / COORD_SCALE,
            lng: lng as f64 / COORD_SCALE,
        }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Category of a check-in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceCategory {
    Historical,
    Nature,
    Cultural,
}

impl std::fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaceCategory::Historical => write!(f, "historical"),
            PlaceCategory::Nature => write!(f, "nature"),
            PlaceCategory::Cultural => write!(f, "cultural"),
        }
    }
}

/// A geofenced location where a commemorative token can be minted.
/// Entries come from the static registry in `catalog` and are never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Place {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub location: Coordinates,
    /// Allowed check-in radius in meters; `None` falls back to the configured default
    pub radius_m: Option<f64>,
    pub category: PlaceCategory,
    /// Artwork reference minted into the collectible
    pub image: &'static str,
}

impl Place {
    pub fn radius_or(&self, default_m: f64) -> f64 {
        self.radius_m.unwrap_or(default_m)
    }
}

// === Marketplace ===

/// Category of a marketplace product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCategory {
    Tours,
    Crafts,
    Food,
}

impl std::fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductCategory::Tours => write!(f, "tours"),
            ProductCategory::Crafts => write!(f, "crafts"),
            ProductCategory::Food => write!(f, "food"),
        }
    }
}

/// A marketplace listing. Prices are in base units of the native currency,
/// `discount_tokens` in base units of the loyalty token.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub image: &'static str,
    /// Default seller address (may be overridden per deployment)
    pub seller: &'static str,
    pub seller_name: &'static str,
    /// Slot used for `MERCHANT_<n>_ADDRESS` overrides
    pub seller_slot: usize,
    pub price: Stroops,
    pub discount_price: Stroops,
    pub discount_tokens: Stroops,
    pub category: ProductCategory,
}

/// How a purchase is paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseMode {
    /// Full price in native currency
    Full,
    /// Discounted native price plus loyalty tokens burned
    Discounted,
}

impl PurchaseMode {
    /// Native amount charged for `product` in this mode
    pub fn native_amount(&self, product: &Product) -> Stroops {
        match self {
            PurchaseMode::Full => product.price,
            PurchaseMode::Discounted => product.discount_price,
        }
    }

    /// Loyalty tokens consumed for `product` in this mode
    pub fn token_amount(&self, product: &Product) -> Stroops {
        match self {
            PurchaseMode::Full => 0,
            PurchaseMode::Discounted => product.discount_tokens,
        }
    }
}

// === Remote records ===

/// Commemorative check-in collectible as stored by the check-in contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub token_id: u64,
    pub place_id: u32,
    pub place_name: String,
    /// Latitude in micro-degrees
    pub latitude: i64,
    /// Longitude in micro-degrees
    pub longitude: i64,
    /// Ledger timestamp (unix seconds)
    pub check_in_timestamp: u64,
    pub owner: String,
    pub image_url: String,
}

impl CheckinRecord {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::from_micro(self.latitude, self.longitude)
    }
}

/// Classification of a reconstructed purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    NativeOnly,
    Discounted,
}

/// Purchase reconstructed from ledger history. Approximate by nature:
/// the classification is inferred from payment amounts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseRecord {
    /// Operation id of the outbound payment
    pub id: String,
    pub created_at: String,
    pub amount: Stroops,
    /// Estimated loyalty tokens spent (0 when unknown)
    pub token_amount: Stroops,
    pub seller: String,
    pub tx_hash: String,
    pub kind: PurchaseKind,
}

/// Native and loyalty-token balances of one address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub native: Stroops,
    pub token: Stroops,
}

impl std::fmt::Display for Balances {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} XLM | {} TUR", format_stroops(self.native), format_stroops(self.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_to_stroops_truncates() {
        assert_eq!(units_to_stroops(50.0), 500_000_000);
        assert_eq!(units_to_stroops(0.00000015), 1);
        assert_eq!(units_to_stroops(12.5), 125_000_000);
    }

    #[test]
    fn test_format_stroops() {
        assert_eq!(format_stroops(whole(50)), "50");
        assert_eq!(format_stroops(125_000_000), "12.5");
        assert_eq!(format_stroops(1), "0.0000001");
        assert_eq!(format_stroops(-whole(3)), "-3");
        assert_eq!(format_stroops(0), "0");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100.0000000"), Some(whole(100)));
        assert_eq!(parse_amount("12.5"), Some(125_000_000));
        assert_eq!(parse_amount("7"), Some(whole(7)));
        assert_eq!(parse_amount(".5"), Some(5_000_000));
        assert_eq!(parse_amount("-1.25"), Some(-12_500_000));
        assert_eq!(parse_amount("1.00000001"), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn test_format_then_parse_preserves_value() {
        for amount in [0, 1, 125_000_000, whole(5000), 987_654_321] {
            assert_eq!(parse_amount(&format_stroops(amount)), Some(amount));
        }
    }

    #[test]
    fn test_micro_degrees_floor() {
        assert_eq!(to_micro_degrees(-13.516754), -13516754);
        assert_eq!(to_micro_degrees(-71.978516), -71978516);
        assert_eq!(to_micro_degrees(1.5), 1_500_000);
    }

    #[test]
    fn test_purchase_mode_amounts() {
        let product = crate::catalog::product(1).expect("product 1");
        assert_eq!(PurchaseMode::Full.native_amount(product), whole(50));
        assert_eq!(PurchaseMode::Full.token_amount(product), 0);
        assert_eq!(PurchaseMode::Discounted.native_amount(product), whole(30));
        assert_eq!(PurchaseMode::Discounted.token_amount(product), whole(5000));
    }
}
