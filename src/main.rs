use anyhow::{Context, bail};
use api_client::{BinanceClient, ExchangeApi};
use broker::{Broker, OrderNotification};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{Config, FeedConfig};
use core_types::{Candle, OrderRequest, OrderSide, OrderType, Timeframe};
use feed::{CandleFeed, FeedState, PollOutcome};
use gateway::Gateway;
use mapping::OverrideRegistry;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The main entry point for the exchange bridge.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets such as APP__EXCHANGE__CREDENTIALS__SECRET may live in a .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = configuration::load_config_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let _log_guard = configuration::init_tracing(&config.logging)?;

    let gateway = connect(&config)?;

    match cli.command {
        Commands::Balance => handle_balance(&config, gateway).await,
        Commands::OpenOrders { symbol } => handle_open_orders(&config, gateway, symbol).await,
        Commands::ClosedOrders { symbol, limit } => {
            handle_closed_orders(&config, gateway, symbol, limit).await
        }
        Commands::Candles(args) => handle_candles(&config, gateway, args).await,
        Commands::Submit(args) => handle_submit(&config, gateway, args).await,
        Commands::Watch { interval_secs } => handle_watch(&config, gateway, interval_secs).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Places orders on a crypto exchange and streams its market data.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cash and total value of the account currency.
    Balance,
    /// List open orders as the exchange reports them.
    OpenOrders {
        #[arg(long)]
        symbol: Option<String>,
    },
    /// List recently settled orders for a symbol.
    ClosedOrders {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Fetch closed bars for a symbol.
    Candles(CandlesArgs),
    /// Submit one order and follow it until it settles.
    Submit(SubmitArgs),
    /// Poll every configured feed until interrupted.
    Watch {
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
}

#[derive(Parser)]
struct CandlesArgs {
    /// Unified symbol (e.g., "BNB/USDT").
    #[arg(long)]
    symbol: String,

    /// Bar timeframe (e.g., "1m", "1h", "1d").
    #[arg(long, default_value = "1m")]
    timeframe: Timeframe,

    /// First bar to fetch (RFC 3339).
    #[arg(long)]
    from: DateTime<Utc>,

    /// Stop before this time (RFC 3339). Defaults to now.
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    #[arg(long, default_value_t = 500)]
    limit: usize,

    /// Convert to Heikin-Ashi bars rounded to this tick size.
    #[arg(long)]
    heikin_ashi_tick: Option<Decimal>,
}

#[derive(Parser)]
struct SubmitArgs {
    #[arg(long)]
    symbol: String,

    /// "buy" or "sell".
    #[arg(long)]
    side: OrderSide,

    /// Market, Limit, Stop or StopLimit.
    #[arg(long = "type", default_value = "Market")]
    order_type: OrderType,

    #[arg(long)]
    amount: Decimal,

    /// Limit price, or the trigger price of a Stop order.
    #[arg(long)]
    price: Option<Decimal>,

    /// Trigger price of a StopLimit order.
    #[arg(long)]
    stop: Option<Decimal>,

    /// Cancel the order if it is still open after this many seconds.
    #[arg(long)]
    cancel_after: Option<u64>,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn connect(config: &Config) -> anyhow::Result<Arc<Gateway>> {
    let exchange: Arc<dyn ExchangeApi> = match config.exchange.id.to_ascii_lowercase().as_str() {
        "binance" => Arc::new(BinanceClient::new(&config.exchange)?),
        other => bail!("no connector for exchange '{}'", other),
    };
    Ok(Arc::new(Gateway::from_config(&config.exchange, exchange)))
}

fn build_broker(config: &Config, gateway: Arc<Gateway>) -> anyhow::Result<Broker> {
    let registry = OverrideRegistry::with_defaults();
    Ok(Broker::from_config(&config.broker, gateway, &registry)?)
}

async fn handle_balance(config: &Config, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let mut broker = build_broker(config, gateway)?;
    let snapshot = broker.refresh_balance().await?;

    let mut table = Table::new();
    table.set_header(vec!["Currency", "Cash", "Value"]);
    table.add_row(vec![
        snapshot.currency.clone(),
        snapshot.cash.to_string(),
        snapshot.value.to_string(),
    ]);
    println!("{table}");
    Ok(())
}

async fn handle_open_orders(
    config: &Config,
    gateway: Arc<Gateway>,
    symbol: Option<String>,
) -> anyhow::Result<()> {
    let broker = build_broker(config, gateway)?;
    let orders = broker.fetch_open_orders(symbol.as_deref()).await?;
    println!("{}", order_table(&orders));
    Ok(())
}

async fn handle_closed_orders(
    config: &Config,
    gateway: Arc<Gateway>,
    symbol: String,
    limit: usize,
) -> anyhow::Result<()> {
    let broker = build_broker(config, gateway)?;
    let orders = broker.fetch_closed_orders(Some(&symbol), None, Some(limit)).await?;
    println!("{}", order_table(&orders));
    Ok(())
}

fn order_table(orders: &[serde_json::Value]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Id", "Symbol", "Side", "Type", "Amount", "Filled", "Price", "Status"]);
    for order in orders {
        let field = |key: &str| match order.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        table.add_row(vec![
            field("id"),
            field("symbol"),
            field("side"),
            field("type"),
            field("amount"),
            field("filled"),
            field("price"),
            field("status"),
        ]);
    }
    table
}

async fn handle_candles(
    config: &Config,
    gateway: Arc<Gateway>,
    args: CandlesArgs,
) -> anyhow::Result<()> {
    let feed_config = FeedConfig {
        symbol: args.symbol.clone(),
        timeframe: args.timeframe,
        start: Some(args.from),
        end: Some(args.to.unwrap_or_else(Utc::now)),
        ohlcv_limit: args.limit,
        fetch_params: Default::default(),
        drop_newest: true,
        historical: true,
        heikin_ashi: args.heikin_ashi_tick.map(|tick_size| configuration::HeikinAshiConfig {
            tick_size,
            price_digits: tick_size.scale(),
        }),
        debug: config.feeds.iter().any(|f| f.symbol == args.symbol && f.debug),
    };
    let mut feed = CandleFeed::new(feed_config, gateway)?;

    let mut bars = Vec::new();
    loop {
        match feed.poll().await {
            PollOutcome::Finished => break,
            PollOutcome::Failed(err) => return Err(err.into()),
            PollOutcome::Bars(_) | PollOutcome::NoData => {}
        }
        while let Some(bar) = feed.next_bar() {
            bars.push(bar);
        }
    }
    while let Some(bar) = feed.next_bar() {
        bars.push(bar);
    }

    println!("{}", candle_table(&bars));
    println!("{} bars for {} {}", bars.len(), args.symbol, args.timeframe);
    Ok(())
}

async fn handle_submit(
    config: &Config,
    gateway: Arc<Gateway>,
    args: SubmitArgs,
) -> anyhow::Result<()> {
    let mut broker = build_broker(config, gateway)?;

    let mut request = OrderRequest::new(&args.symbol, args.side, args.order_type, args.amount);
    request.price = args.price;
    request.stop_price = args.stop;

    let id = broker.submit(request).await?;
    print_notifications(broker.drain_notifications());

    let deadline = args
        .cancel_after
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut ticker = tokio::time::interval(Duration::from_secs(2));

    while broker.order(id).is_some_and(|order| order.is_open()) {
        if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
            let status = broker.cancel(id).await?;
            tracing::info!(order_id = %id, %status, "cancel resolved");
            print_notifications(broker.drain_notifications());
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(order_id = %id, "interrupted, order left as is");
                break;
            }
        }

        let report = broker.poll().await;
        for (order_id, err) in &report.failures {
            tracing::warn!(%order_id, error = %err, "order refresh failed");
        }
        print_notifications(broker.drain_notifications());
    }
    Ok(())
}

async fn handle_watch(config: &Config, gateway: Arc<Gateway>, interval_secs: u64) -> anyhow::Result<()> {
    if config.feeds.is_empty() {
        bail!("no [[feeds]] configured");
    }
    let mut feeds = config
        .feeds
        .iter()
        .cloned()
        .map(|feed_config| CandleFeed::new(feed_config, gateway.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }

        for feed in feeds.iter_mut() {
            // Drain backfill in one go so a fresh feed catches up before the next tick.
            loop {
                match feed.poll().await {
                    PollOutcome::Bars(_) if feed.state() == FeedState::Backfill => continue,
                    PollOutcome::Failed(err) => {
                        tracing::warn!(symbol = %feed.symbol(), error = %err, "poll failed");
                    }
                    _ => {}
                }
                break;
            }
            while let Some(bar) = feed.next_bar() {
                println!(
                    "{} {} o={} h={} l={} c={} v={}",
                    feed.symbol(),
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                );
            }
        }

        if feeds.iter().all(|feed| feed.state() == FeedState::Over) {
            return Ok(());
        }
    }
}

fn print_notifications(notifications: Vec<OrderNotification>) {
    for n in notifications {
        let exchange_id = n.exchange_order_id.as_deref().unwrap_or("-");
        match &n.error {
            Some(err) => println!("{} [{}] {} ({})", n.order_id, exchange_id, n.status, err),
            None => println!(
                "{} [{}] {} filled={} remaining={}",
                n.order_id, exchange_id, n.status, n.filled, n.remaining
            ),
        }
    }
}

fn candle_table(bars: &[Candle]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Time", "Open", "High", "Low", "Close", "Volume"]);
    for bar in bars {
        table.add_row(vec![
            bar.timestamp.to_rfc3339(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ]);
    }
    table
}
