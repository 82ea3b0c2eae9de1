//! Client configuration and protocol constants.
//!
//! This module contains the network constants, environment variable parsing
//! and defaults for every endpoint and contract the client talks to.

use std::time::Duration;

use crate::execution::ConfirmationPolicy;
use crate::types::{Coordinates, Product};

/// Testnet network passphrase
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Public network passphrase
pub const PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

/// Default Soroban RPC endpoint
pub const DEFAULT_SOROBAN_RPC_URL: &str = "https://soroban-testnet.stellar.org";

/// Default Horizon endpoint (balances and operation history)
pub const DEFAULT_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";

/// Default local wallet bridge endpoint
pub const DEFAULT_WALLET_BRIDGE_URL: &str = "http://127.0.0.1:8787";

/// Inclusion fee per transaction, in base units
pub const BASE_FEE: u32 = 100;

/// Validity window of a built transaction (seconds)
pub const TX_TIMEOUT_SECS: u64 = 30;

/// Base units per whole unit of the native currency and the loyalty token
pub const AMOUNT_SCALE: i128 = 10_000_000;

/// Fixed-point scale of on-chain coordinates
pub const COORD_SCALE: f64 = 1e6;

/// Horizon page size for operation history (maximum accepted by Horizon)
pub const HISTORY_PAGE_LIMIT: u32 = 100;

/// How long a live position feed may stay silent before reporting a timeout
pub const LOCATION_TIMEOUT_SECS: u64 = 10;

/// HTTP timeout for RPC, Horizon and wallet bridge requests
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Default demo coordinates (Cusco main square)
pub const DEFAULT_DEMO_LAT: f64 = -13.5165;
pub const DEFAULT_DEMO_LNG: f64 = -71.9786;

/// Default check-in radius for places without their own radius
pub const DEFAULT_CHECKIN_RADIUS_M: f64 = 200.0;

/// Persisted session keys
pub const SESSION_CONNECTED_KEY: &str = "walletConnected";
pub const SESSION_ADDRESS_KEY: &str = "walletAddress";

/// Demo mode: use fixed demo coordinates instead of a live feed (set DEMO_MODE=1)
pub fn demo_mode_enabled() -> bool {
    static CACHED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *CACHED.get_or_init(|| env_flag("DEMO_MODE", false))
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Target network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Testnet,
    Public,
}

impl Network {
    pub fn passphrase(&self) -> &'static str {
        match self {
            Network::Testnet => TESTNET_PASSPHRASE,
            Network::Public => PUBLIC_PASSPHRASE,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "testnet" | "test" => Ok(Network::Testnet),
            "public" | "mainnet" | "pubnet" => Ok(Network::Public),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Testnet => write!(f, "testnet"),
            Network::Public => write!(f, "public"),
        }
    }
}

/// Deployed contract ids (empty string = not configured)
#[derive(Debug, Clone, Default)]
pub struct ContractIds {
    pub checkin_nft: String,
    pub token: String,
    pub marketplace: String,
}

/// Demo-mode defaults
#[derive(Debug, Clone, Copy)]
pub struct DemoConfig {
    pub location: Coordinates,
    pub checkin_radius_m: f64,
}

/// How submissions are confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Poll the ledger until a terminal status (default)
    Poll,
    /// Sleep a fixed delay and assume success
    Delay,
}

/// Full client configuration from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub network: Network,
    pub rpc_url: String,
    pub horizon_url: String,
    pub contracts: ContractIds,
    /// Seller address overrides, indexed by product seller slot
    pub merchants: [Option<String>; 3],
    pub demo: DemoConfig,
    pub maps_api_key: Option<String>,
    pub wallet_bridge_url: String,
    pub db_path: String,
    pub confirm_mode: ConfirmMode,
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    pub submit_delay_ms: u64,
    pub history_max_pages: u32,
    pub rpc_rate_limit_per_sec: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            rpc_url: DEFAULT_SOROBAN_RPC_URL.to_string(),
            horizon_url: DEFAULT_HORIZON_URL.to_string(),
            contracts: ContractIds::default(),
            merchants: [None, None, None],
            demo: DemoConfig {
                location: Coordinates::new(DEFAULT_DEMO_LAT, DEFAULT_DEMO_LNG),
                checkin_radius_m: DEFAULT_CHECKIN_RADIUS_M,
            },
            maps_api_key: None,
            wallet_bridge_url: DEFAULT_WALLET_BRIDGE_URL.to_string(),
            db_path: "turpass.db".to_string(),
            confirm_mode: ConfirmMode::Poll,
            confirm_attempts: 30,
            confirm_interval_ms: 1000,
            submit_delay_ms: 3000,
            history_max_pages: 1,
            rpc_rate_limit_per_sec: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let optional = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            network: env_or("STELLAR_NETWORK", defaults.network),
            rpc_url: env_string("SOROBAN_RPC_URL", DEFAULT_SOROBAN_RPC_URL),
            horizon_url: env_string("HORIZON_URL", DEFAULT_HORIZON_URL),
            contracts: ContractIds {
                checkin_nft: env_string("CHECKIN_NFT_CONTRACT", ""),
                token: env_string("TUR_TOKEN_CONTRACT", ""),
                marketplace: env_string("MARKETPLACE_CONTRACT", ""),
            },
            merchants: [
                optional("MERCHANT_1_ADDRESS"),
                optional("MERCHANT_2_ADDRESS"),
                optional("MERCHANT_3_ADDRESS"),
            ],
            demo: DemoConfig {
                location: Coordinates::new(
                    env_or("DEFAULT_DEMO_LAT", DEFAULT_DEMO_LAT),
                    env_or("DEFAULT_DEMO_LNG", DEFAULT_DEMO_LNG),
                ),
                checkin_radius_m: env_or("CHECKIN_RADIUS_METERS", DEFAULT_CHECKIN_RADIUS_M),
            },
            maps_api_key: optional("MAPS_API_KEY"),
            wallet_bridge_url: env_string("WALLET_BRIDGE_URL", DEFAULT_WALLET_BRIDGE_URL),
            db_path: env_string("SESSION_DB_PATH", &defaults.db_path),
            confirm_mode: match env_string("CONFIRM_MODE", "poll").to_lowercase().as_str() {
                "delay" => ConfirmMode::Delay,
                _ => ConfirmMode::Poll,
            },
            confirm_attempts: env_or("CONFIRM_ATTEMPTS", defaults.confirm_attempts).max(1),
            confirm_interval_ms: env_or("CONFIRM_INTERVAL_MS", defaults.confirm_interval_ms),
            submit_delay_ms: env_or("SUBMIT_DELAY_MS", defaults.submit_delay_ms),
            history_max_pages: env_or("HISTORY_MAX_PAGES", defaults.history_max_pages).max(1),
            rpc_rate_limit_per_sec: env_or("RPC_RATE_LIMIT_PER_SEC", defaults.rpc_rate_limit_per_sec).max(1),
        }
    }

    pub fn network_passphrase(&self) -> &'static str {
        self.network.passphrase()
    }

    /// Seller address for `product`, honoring `MERCHANT_<n>_ADDRESS` overrides
    pub fn seller_address<'a>(&'a self, product: &'a Product) -> &'a str {
        self.merchants
            .get(product.seller_slot)
            .and_then(|m| m.as_deref())
            .unwrap_or(product.seller)
    }

    /// Confirmation policy for ordinary submissions
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        match self.confirm_mode {
            ConfirmMode::Poll => self.polling_policy(),
            ConfirmMode::Delay => ConfirmationPolicy::Delay(Duration::from_millis(self.submit_delay_ms)),
        }
    }

    /// Polling policy, used unconditionally where later steps depend on commitment
    pub fn polling_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy::Poll {
            attempts: self.confirm_attempts,
            interval: Duration::from_millis(self.confirm_interval_ms),
        }
    }

    /// Map key with everything but the last four characters masked
    pub fn masked_maps_key(&self) -> String {
        match &self.maps_api_key {
            Some(key) if key.chars().count() > 4 => {
                let tail: String = key.chars().skip(key.chars().count() - 4).collect();
                format!("****{}", tail)
            }
            Some(_) => "****".to_string(),
            None => "(not set)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!("testnet".parse::<Network>(), Ok(Network::Testnet));
        assert_eq!("PUBLIC".parse::<Network>(), Ok(Network::Public));
        assert!("futurenet".parse::<Network>().is_err());
        assert_eq!(Network::Testnet.passphrase(), TESTNET_PASSPHRASE);
    }

    #[test]
    fn test_seller_override() {
        let product = crate::catalog::product(2).expect("product 2");
        let mut config = AppConfig::default();
        assert_eq!(config.seller_address(product), product.seller);

        config.merchants[product.seller_slot] = Some("GSELLEROVERRIDE".to_string());
        assert_eq!(config.seller_address(product), "GSELLEROVERRIDE");
    }

    #[test]
    fn test_confirmation_policy_follows_mode() {
        let mut config = AppConfig::default();
        assert!(matches!(config.confirmation_policy(), ConfirmationPolicy::Poll { attempts: 30, .. }));

        config.confirm_mode = ConfirmMode::Delay;
        assert_eq!(
            config.confirmation_policy(),
            ConfirmationPolicy::Delay(Duration::from_millis(3000))
        );
        // Approval paths always poll
        assert!(matches!(config.polling_policy(), ConfirmationPolicy::Poll { .. }));
    }

    #[test]
    fn test_masked_maps_key() {
        let mut config = AppConfig::default();
        assert_eq!(config.masked_maps_key(), "(not set)");
        config.maps_api_key = Some("AIzaSyExample1234".to_string());
        assert_eq!(config.masked_maps_key(), "****1234");
        config.maps_api_key = Some("clé-ñandú".to_string());
        assert_eq!(config.masked_maps_key(), "****andú");
        config.maps_api_key = Some("ab".to_string());
        assert_eq!(config.masked_maps_key(), "****");
    }
}
