//! Command-line client for geofenced check-ins and the TUR marketplace.
//!
//! Composes the location provider, wallet session and ledger services into
//! one-shot commands. Configuration comes from the environment (and `.env`);
//! logs go to stdout and `turpass.log`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use turpass::balance::BalanceService;
use turpass::catalog::{PLACES, PRODUCTS};
use turpass::checkin::CheckinService;
use turpass::config::{demo_mode_enabled, AppConfig};
use turpass::error::TxOutcome;
use turpass::execution::TxPipeline;
use turpass::geo::distance_meters;
use turpass::location::{FixedPosition, LineFeed, LocationProvider, LocationState, NoSensor};
use turpass::marketplace::MarketplaceService;
use turpass::rpc::HttpLedger;
use turpass::storage::{create_storage_channel, recent_submissions, unsettled_submissions, SqliteStore, StorageChannel};
use turpass::types::{format_stroops, Coordinates, PurchaseKind, PurchaseMode};
use turpass::wallet::{HttpWalletBridge, WalletSession};

#[derive(Parser)]
#[command(name = "turpass", version, about = "Check in at places, collect NFTs and spend TUR")]
struct Cli {
    /// Use the configured demo coordinates as the current location
    #[arg(long, global = true)]
    demo: bool,

    /// Current latitude (requires --lng)
    #[arg(long, global = true, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Current longitude (requires --lat)
    #[arg(long, global = true, allow_negative_numbers = true)]
    lng: Option<f64>,

    /// Follow `lat,lng` lines from a file, or `-` for stdin
    #[arg(long, global = true)]
    feed: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List check-in places with distance and visit status
    Places,
    /// List marketplace products
    Products,
    /// Show wallet, network and location status
    Status,
    /// Connect a wallet through the wallet bridge
    Connect,
    /// Forget the connected wallet
    Disconnect,
    /// Check in at a place and mint its NFT
    CheckIn { place: u32 },
    /// List check-in NFTs owned by the connected wallet
    Nfts,
    /// Show XLM and TUR balances
    Balance,
    /// Show purchase history reconstructed from the ledger
    History,
    /// Buy a product, optionally paying part of it with TUR
    Buy {
        product: u32,
        #[arg(long)]
        discount: bool,
    },
    /// Show recent ledger submissions made from this machine
    Journal {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Re-check submissions whose outcome is still unknown
    Reconcile,
    /// Print the effective configuration
    Config,
}

fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "turpass.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("turpass=info".parse()?);

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn location_provider(cli: &Cli, config: &AppConfig) -> Result<LocationProvider> {
    match (cli.lat, cli.lng) {
        (Some(lat), Some(lng)) => {
            return Ok(LocationProvider::live(Box::new(FixedPosition(Coordinates::new(lat, lng)))))
        }
        (None, None) => {}
        _ => anyhow::bail!("--lat and --lng must be given together"),
    }

    if cli.demo || demo_mode_enabled() {
        return Ok(LocationProvider::demo(config.demo.location));
    }

    Ok(match cli.feed.as_deref() {
        Some("-") => LocationProvider::live(Box::new(LineFeed::new(BufReader::new(tokio::io::stdin())))),
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open position feed {}", path))?;
            LocationProvider::live(Box::new(LineFeed::new(BufReader::new(file))))
        }
        None => LocationProvider::live(Box::new(NoSensor)),
    })
}

fn print_outcome(what: &str, outcome: &TxOutcome) {
    if outcome.success {
        println!("✅ {} succeeded", what);
        for hash in &outcome.tx_hashes {
            println!("   tx {}", hash);
        }
    } else {
        println!("❌ {} failed: {}", what, outcome.error.as_deref().unwrap_or("unknown error"));
        if let Some(step) = outcome.failed_step {
            println!("   failed step: {}", step);
        }
        for hash in &outcome.tx_hashes {
            println!("   already submitted: {}", hash);
        }
    }
}

struct App {
    config: AppConfig,
    session: WalletSession,
    pipeline: Arc<TxPipeline>,
    journal: StorageChannel,
}

impl App {
    fn new(config: AppConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        let kit = Arc::new(HttpWalletBridge::new(&config.wallet_bridge_url)?);
        let session = WalletSession::restore(kit, Box::new(store), config.network_passphrase());

        let journal = create_storage_channel(&config.db_path);
        let ledger = Arc::new(HttpLedger::new(&config)?);
        let pipeline = Arc::new(TxPipeline::new(ledger, &config).with_journal(journal.clone()));

        Ok(Self {
            config,
            session,
            pipeline,
            journal,
        })
    }

    fn checkin(&self) -> CheckinService {
        CheckinService::new(
            self.pipeline.clone(),
            &self.config.contracts.checkin_nft,
            self.config.demo.checkin_radius_m,
        )
    }

    fn balances(&self) -> BalanceService {
        BalanceService::new(
            self.pipeline.clone(),
            &self.config.contracts.token,
            self.config.history_max_pages,
        )
    }

    fn address(&self) -> Result<String> {
        Ok(self.session.require_address()?.to_string())
    }

    async fn run(&mut self, cli: &Cli) -> Result<()> {
        match &cli.command {
            Command::Places => self.places(cli).await?,
            Command::Products => {
                for p in PRODUCTS {
                    println!(
                        "#{} {} [{}] by {}: {} XLM, or {} XLM + {} TUR",
                        p.id,
                        p.name,
                        p.category,
                        p.seller_name,
                        format_stroops(p.price),
                        format_stroops(p.discount_price),
                        format_stroops(p.discount_tokens)
                    );
                }
            }
            Command::Status => {
                println!("Network:  {}", self.config.network);
                match self.session.address() {
                    Some(address) => println!("Wallet:   {}", address),
                    None => println!("Wallet:   not connected"),
                }
                let location = location_provider(cli, &self.config).await?;
                match location.wait_ready().await {
                    LocationState::Available(c) => println!("Location: {}", c),
                    LocationState::Unavailable(reason) => println!("Location: unavailable ({})", reason),
                    LocationState::Acquiring => println!("Location: acquiring"),
                }
            }
            Command::Connect => {
                let address = self.session.connect().await?;
                println!("Connected {}", address);
            }
            Command::Disconnect => {
                self.session.disconnect()?;
                println!("Disconnected");
            }
            Command::CheckIn { place } => {
                let location = location_provider(cli, &self.config).await?;
                let state = location.wait_ready().await;
                let outcome = self.checkin().check_in(&self.session, *place, &state).await;
                print_outcome("Check-in", &outcome);
            }
            Command::Nfts => {
                let address = self.address()?;
                let nfts = self.checkin().user_nfts(&address).await?;
                if nfts.is_empty() {
                    println!("No check-in NFTs yet");
                }
                for nft in nfts {
                    let when = chrono::DateTime::from_timestamp(nft.check_in_timestamp as i64, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| nft.check_in_timestamp.to_string());
                    println!("#{} {} at {} on {}", nft.token_id, nft.place_name, nft.coordinates(), when);
                }
            }
            Command::Balance => {
                let address = self.address()?;
                println!("{}", self.balances().balances(&address).await?);
            }
            Command::History => {
                let address = self.address()?;
                let purchases = self.balances().purchase_history(&address).await?;
                if purchases.is_empty() {
                    println!("No purchases found");
                }
                for p in purchases {
                    let tokens = match p.kind {
                        PurchaseKind::Discounted if p.token_amount > 0 => {
                            format!(" + {} TUR", format_stroops(p.token_amount))
                        }
                        PurchaseKind::Discounted => " (discounted)".to_string(),
                        PurchaseKind::NativeOnly => String::new(),
                    };
                    println!("{} {} XLM{} to {} ({})", p.created_at, format_stroops(p.amount), tokens, p.seller, p.tx_hash);
                }
            }
            Command::Buy { product, discount } => {
                let address = self.address()?;
                let balances = self.balances().balances(&address).await?;
                let mode = if *discount { PurchaseMode::Discounted } else { PurchaseMode::Full };
                let market = MarketplaceService::new(self.pipeline.clone(), &self.config);
                let outcome = market.purchase(&self.session, *product, mode, &balances).await;
                print_outcome("Purchase", &outcome);
            }
            Command::Journal { limit } => {
                let address = self.address()?;
                self.journal.flush();
                let conn = rusqlite::Connection::open(&self.config.db_path)?;
                for r in recent_submissions(&conn, &address, *limit)? {
                    println!(
                        "{} {}.{} {} {}{}",
                        r.timestamp_secs,
                        r.flow,
                        r.step,
                        r.status,
                        r.tx_hash.as_deref().unwrap_or("-"),
                        r.error.map(|e| format!(" ({})", e)).unwrap_or_default()
                    );
                }
            }
            Command::Reconcile => {
                self.journal.flush();
                let conn = rusqlite::Connection::open(&self.config.db_path)?;
                let unsettled = unsettled_submissions(&conn)?;
                info!("[STORAGE] {} unsettled submissions", unsettled.len());
                let settled = self.pipeline.reconcile(&unsettled).await;
                for (hash, status) in &settled {
                    println!("{} → {}", hash, status);
                }
                println!("{} of {} submissions settled", settled.len(), unsettled.len());
            }
            Command::Config => {
                let c = &self.config;
                println!("network            {}", c.network);
                println!("soroban rpc        {}", c.rpc_url);
                println!("horizon            {}", c.horizon_url);
                println!("checkin contract   {}", c.contracts.checkin_nft);
                println!("token contract     {}", c.contracts.token);
                println!("market contract    {}", c.contracts.marketplace);
                println!("demo location      {}", c.demo.location);
                println!("check-in radius    {} m", c.demo.checkin_radius_m);
                println!("maps key           {}", c.masked_maps_key());
                println!("wallet bridge      {}", c.wallet_bridge_url);
                println!("database           {}", c.db_path);
                println!("confirmation       {:?}", c.confirmation_policy());
            }
        }
        Ok(())
    }

    async fn places(&self, cli: &Cli) -> Result<()> {
        let location = location_provider(cli, &self.config).await?;
        let here = location.wait_ready().await.coordinates();
        let checkin = self.checkin();
        let address = self.session.address();

        for place in PLACES {
            let distance = here
                .map(|c| format!("{:.0} m away", distance_meters(c, place.location)))
                .unwrap_or_else(|| "distance unknown".to_string());

            let visited = match address {
                Some(address) if !self.config.contracts.checkin_nft.is_empty() => {
                    match checkin.has_checked_in(address, place.id).await {
                        Ok(true) => " ✅ visited",
                        Ok(false) => "",
                        Err(e) => {
                            warn!("[CHECKIN] Visit status for place {} unavailable: {}", place.id, e);
                            ""
                        }
                    }
                }
                _ => "",
            };

            println!(
                "#{} {} [{}] {} (radius {} m){}",
                place.id,
                place.name,
                place.category,
                distance,
                place.radius_or(self.config.demo.checkin_radius_m),
                visited
            );
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing()?;

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    info!("[CONFIG] {} via {}", config.network, config.rpc_url);

    let mut app = App::new(config)?;
    let result = app.run(&cli).await;

    app.journal.flush();
    app.journal.shutdown();
    result
}
