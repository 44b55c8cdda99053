//! BANKFETCH: banking session client and ledger exporter
//!
//! Entry point. Loads configuration, initialises structured logging,
//! logs in (credentials + app confirmation) and writes every account and
//! transaction of the configured period to stdout as JSON lines.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

use bankfetch::client::BankClient;
use bankfetch::config::AppConfig;
use bankfetch::handshake::Credentials;
use bankfetch::ledger::SkippedRow;
use bankfetch::mfa::PollPolicy;
use bankfetch::surfaces::api::ApiSurface;
use bankfetch::surfaces::web::WebSurface;
use bankfetch::surfaces::{Surface, SurfaceKind};
use bankfetch::transport::{ReqwestTransport, Transport};
use bankfetch::types::{AccountSummary, TransactionRecord};

/// One line of output.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Account(&'a AccountSummary),
    Transaction {
        account: &'a str,
        #[serde(flatten)]
        record: &'a TransactionRecord,
    },
    Skipped {
        account: &'a str,
        #[serde(flatten)]
        row: &'a SkippedRow,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();
    info!(
        surface = ?cfg.client.surface,
        config = %config_path,
        "BANKFETCH starting up"
    );

    let credentials = cfg.credentials()?;
    let transport: Arc<dyn Transport> = Arc::new(
        ReqwestTransport::new(&cfg.client.user_agent, cfg.timeout())
            .context("Failed to build HTTP client")?,
    );
    let base = cfg.base_url()?;
    let policy = cfg.poll_policy(tokio::time::Instant::now());

    match cfg.client.surface {
        SurfaceKind::Web => run(WebSurface::new(base), transport, &cfg, &credentials, policy).await,
        SurfaceKind::Api => run(ApiSurface::new(base), transport, &cfg, &credentials, policy).await,
    }
}

/// Log in, then export every ledger of the configured period.
async fn run<S: Surface>(
    surface: S,
    transport: Arc<dyn Transport>,
    cfg: &AppConfig,
    credentials: &Credentials,
    policy: PollPolicy,
) -> Result<()> {
    let mut client = BankClient::new(surface, transport, cfg.method_selection(), policy);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        result = client.login(credentials) => {
            if let Err(e) = result {
                if e.is_user_actionable() {
                    warn!(error = %e, "Login not completed, check credentials or confirm in the app");
                } else {
                    error!(error = %e, "Login failed");
                }
                return Err(e).context("Login failed");
            }
        }
        _ = &mut shutdown => {
            info!("Shutdown signal received during login.");
            return Ok(());
        }
    }

    let range = cfg.date_range(chrono::Local::now().date_naive())?;
    let accounts = client.accounts().await.context("Failed to fetch accounts")?;
    info!(
        count = accounts.len(),
        from = %range.from,
        to = %range.to,
        "Exporting ledgers"
    );

    let batches = client
        .fetch_ledgers(&accounts, &range)
        .await
        .context("Failed to fetch transactions")?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for account in &accounts {
        write_line(&mut out, &OutputLine::Account(account))?;
    }

    let mut skipped = 0usize;
    for batch in &batches {
        let outside = batch
            .records
            .iter()
            .filter(|r| !range.contains(r.booking_date))
            .count();
        if outside > 0 {
            warn!(account = %batch.account, outside, "Bank returned bookings outside the requested range");
        }
        for record in &batch.records {
            write_line(&mut out, &OutputLine::Transaction { account: &batch.account, record })?;
        }
        skipped += batch.skipped.len();
        if cfg.export.include_skipped {
            for row in &batch.skipped {
                write_line(&mut out, &OutputLine::Skipped { account: &batch.account, row })?;
            }
        }
    }
    out.flush().context("Failed to flush output")?;

    let records: usize = batches.iter().map(|b| b.records.len()).sum();
    if skipped > 0 {
        warn!(skipped, "Some transaction rows could not be decoded");
    }
    info!(accounts = accounts.len(), records, skipped, "Export complete");
    Ok(())
}

fn write_line(out: &mut impl Write, line: &OutputLine<'_>) -> Result<()> {
    serde_json::to_writer(&mut *out, line).context("Failed to serialize output")?;
    out.write_all(b"\n").context("Failed to write output")?;
    Ok(())
}

/// Initialise the `tracing` subscriber. Logs go to stderr; stdout is data.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bankfetch=info"));

    let json_logging = std::env::var("BANKFETCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
