use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::debug;

use nwc_wallet::adapters::coingecko::CoingeckoSource;
use nwc_wallet::adapters::nwc::NwcConnector;
use nwc_wallet::core::history::{
    compute_metrics, filter_transactions, HistoryFilter, SortOrder,
};
use nwc_wallet::notify::{Notification, NotificationCenter};
use nwc_wallet::price::{PriceConfig, PriceFeed};
use nwc_wallet::session::FileUriStore;
use nwc_wallet::{
    format_amount, format_sats, Direction, InvoiceManager, LifecyclePhase, MonitorConfig, Msat,
    Period, WalletEvent, WalletEventEmitter, WalletSession,
};

#[derive(Debug, Parser)]
#[command(name = "nwc-wallet", about = "Lightning wallet client over Nostr Wallet Connect")]
struct Cli {
    /// Log verbosity: off, error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    log_level: log::LevelFilter,

    /// Directory for persisted session state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect a wallet from a nostr+walletconnect:// URI.
    Connect { uri: String },
    /// Disconnect and forget the persisted session.
    Disconnect,
    /// Show the current wallet balance.
    Balance {
        /// Also show the USD value (best effort).
        #[arg(long)]
        usd: bool,
    },
    /// Generate a payment request and wait for it to settle.
    Invoice {
        amount_sats: u64,
        #[arg(long, default_value = "")]
        description: String,
        /// Print the payment request and exit without waiting.
        #[arg(long)]
        no_wait: bool,
    },
    /// List transaction history.
    Transactions {
        /// Filter by direction: incoming or outgoing.
        #[arg(long)]
        direction: Option<String>,
        /// Case-insensitive search in descriptions.
        #[arg(long)]
        search: Option<String>,
        /// Show oldest transactions first.
        #[arg(long)]
        oldest_first: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show aggregated metrics for a period.
    Dashboard {
        /// One of: today, week, 30days, 60days.
        #[arg(long, default_value = "30days")]
        period: String,
    },
}

// ============================================================================
// Event sink
// ============================================================================

/// Prints settlement events and feeds the notification center.
struct CliEmitter {
    notifications: NotificationCenter,
    price: PriceFeed,
}

#[async_trait]
impl WalletEventEmitter for CliEmitter {
    async fn emit(&self, event: WalletEvent) {
        match event {
            WalletEvent::InvoiceCreated { amount_sats, .. } => {
                debug!("invoice created for {} sats", amount_sats);
            }
            WalletEvent::SettlementDetected {
                amount_sats,
                balance,
            } => {
                self.notifications.publish(Notification {
                    message: format!("payment received: {} sats", amount_sats),
                    amount_sats,
                });
                println!(
                    "payment received: {} sats (balance now {})",
                    amount_sats,
                    format_amount(balance, self.price.rate()),
                );
            }
            WalletEvent::TransactionsRefreshRequested => {
                debug!("transaction list refresh requested");
            }
            WalletEvent::InvoiceDismissed => debug!("invoice cleared"),
            WalletEvent::SettlementTimedOut { attempts } => {
                debug!("settlement watch gave up after {} attempts", attempts);
            }
            WalletEvent::WatchCancelled => debug!("settlement watch cancelled"),
            WalletEvent::BalanceUpdated { balance } => debug!("balance updated: {}", balance),
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn setup_logger(level: log::LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("nwc-wallet"))
        .context("could not determine a data directory; pass --data-dir")
}

fn open_session(data_dir: &std::path::Path) -> WalletSession {
    let store = Arc::new(FileUriStore::new(data_dir.join("session.json")));
    WalletSession::new(Arc::new(NwcConnector::new()), store)
}

/// Restores the persisted session; fails the command when there is none.
async fn restored_session(data_dir: &std::path::Path) -> Result<WalletSession> {
    let session = open_session(data_dir);
    session.restore().await;
    if !session.is_connected().await {
        bail!("no wallet connected; run `nwc-wallet connect <uri>` first");
    }
    Ok(session)
}

fn parse_direction(value: &str) -> Result<Direction> {
    match value {
        "incoming" => Ok(Direction::Incoming),
        "outgoing" => Ok(Direction::Outgoing),
        other => bail!("unknown direction '{}', expected incoming|outgoing", other),
    }
}

fn price_feed() -> Result<PriceFeed> {
    Ok(PriceFeed::new(
        Arc::new(CoingeckoSource::new()?),
        PriceConfig::default(),
    ))
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.log_level).context("initializing logger")?;
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    match cli.command {
        Command::Connect { uri } => {
            let session = open_session(&data_dir);
            session.connect(&uri).await?;
            let balance = session.balance().await.unwrap_or(Msat(0));
            println!("wallet connected, balance {}", format_sats(balance));
        }

        Command::Disconnect => {
            let session = open_session(&data_dir);
            session.restore().await;
            session.disconnect().await;
            println!("wallet disconnected");
        }

        Command::Balance { usd } => {
            let session = restored_session(&data_dir).await?;
            let balance = session.refresh_balance().await?;
            if usd {
                let feed = price_feed()?;
                feed.refresh_once().await;
                println!(
                    "{} ({})",
                    format_sats(balance),
                    format_amount(balance, feed.rate()),
                );
            } else {
                println!("{}", format_sats(balance));
            }
        }

        Command::Invoice {
            amount_sats,
            description,
            no_wait,
        } => {
            let session = restored_session(&data_dir).await?;
            let config = MonitorConfig::default();
            let feed = price_feed()?;
            let notifications = NotificationCenter::new(config.notification_ttl);
            let emitter = Arc::new(CliEmitter {
                notifications,
                price: feed.clone(),
            });
            let manager = InvoiceManager::new(session, emitter, config.clone());

            // Keep the rate fresh while waiting so the settlement line can
            // show a USD value.
            let price_task = feed.spawn();

            let invoice = manager.create_invoice(amount_sats, &description).await?;
            println!("{}", invoice.payment_request);
            println!(
                "amount: {} sats ({})",
                invoice.amount_sats,
                format_amount(Msat::from_sats(invoice.amount_sats), feed.rate()),
            );
            if !invoice.description.is_empty() {
                println!("description: {}", invoice.description);
            }

            if !no_wait {
                println!("waiting for payment...");
                let outcome = wait_for_outcome(&manager).await;
                match outcome {
                    LifecyclePhase::Settled | LifecyclePhase::Idle => {
                        println!("invoice settled");
                    }
                    LifecyclePhase::TimedOut => {
                        println!(
                            "stopped watching after {} minutes; the invoice can still be paid later",
                            manager_timeout_minutes(&config),
                        );
                    }
                    other => debug!("settlement wait ended in phase {}", other),
                }
            }

            price_task.abort();
            manager.cancel().await;
        }

        Command::Transactions {
            direction,
            search,
            oldest_first,
            limit,
            json,
        } => {
            let session = restored_session(&data_dir).await?;
            let transactions = session.list_transactions().await?;
            let filter = HistoryFilter {
                direction: direction.as_deref().map(parse_direction).transpose()?,
                search,
                order: if oldest_first {
                    SortOrder::OldestFirst
                } else {
                    SortOrder::NewestFirst
                },
            };
            let mut filtered = filter_transactions(&transactions, &filter);
            if let Some(limit) = limit {
                filtered.truncate(limit);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&filtered)?);
            } else if filtered.is_empty() {
                println!("no transactions found");
            } else {
                for tx in &filtered {
                    let when = DateTime::<Utc>::from_timestamp(tx.effective_timestamp(), 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let sign = match tx.direction {
                        Direction::Incoming => '+',
                        Direction::Outgoing => '-',
                    };
                    let status = if tx.is_settled() { "" } else { " (unsettled)" };
                    println!(
                        "{}  {}{} sats{}  {}",
                        when, sign, tx.amount_sats, status, tx.description
                    );
                }
            }
        }

        Command::Dashboard { period } => {
            let period: Period = period.parse().map_err(anyhow::Error::msg)?;
            let session = restored_session(&data_dir).await?;
            let transactions = session.list_transactions().await?;
            let feed = price_feed()?;
            feed.refresh_once().await;
            let rate = feed.rate();

            let metrics = compute_metrics(&transactions, period, Utc::now().timestamp());
            println!("metrics for {}", period.label());
            println!(
                "  revenue:       {} ({:+.1}% vs previous period)",
                format_amount(Msat::from_sats(metrics.total_revenue_sats), rate),
                metrics.revenue_change_percent,
            );
            println!(
                "  transactions:  {} ({:+.1}% vs previous period)",
                metrics.total_transactions, metrics.transactions_change_percent,
            );
            println!(
                "  average:       {:.0} sats per transaction",
                metrics.average_transaction_sats,
            );
            println!("  success rate:  {:.1}%", metrics.success_rate);
        }
    }

    Ok(())
}

/// Blocks until the invoice lifecycle reaches a terminal phase.
async fn wait_for_outcome<E>(manager: &InvoiceManager<E>) -> LifecyclePhase
where
    E: WalletEventEmitter + 'static,
{
    let mut rx = manager.subscribe();
    loop {
        let phase = *rx.borrow_and_update();
        match phase {
            LifecyclePhase::Settled
            | LifecyclePhase::TimedOut
            | LifecyclePhase::Cancelled
            // Idle after the watch started means settled and dismissed.
            | LifecyclePhase::Idle => return phase,
            LifecyclePhase::Creating | LifecyclePhase::AwaitingSettlement => {}
        }
        if rx.changed().await.is_err() {
            return manager.phase();
        }
    }
}

fn manager_timeout_minutes(config: &MonitorConfig) -> u64 {
    (config.poll_interval.as_secs() * config.max_attempts as u64) / 60
}
