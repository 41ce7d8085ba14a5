//! ousd-history CLI: import, history, report, transactions, compare.

use clap::{Args, Parser, Subcommand};
use ousd_history::chain::{parse_block_or_time, ResponseCache, RpcChainReader, RpcConfig};
use ousd_history::compute::{
    address_history, analyze_transactions, generate_report, generate_report_parallel,
    transaction_report, ReportInputs, ReportWindow, TrailingApy,
};
use ousd_history::ousd::{Precision, ProtocolConfig, RawLog};
use ousd_history::report::{
    load_record, period_blocks, AnalyticsReportRecord, ReportArchive, ReportChanges,
    ReportPeriod, ReportView,
};
use ousd_history::store::{
    AccountScope, BlockRecord, SqliteConnector, SqliteLedger, TransactionRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Import(args) => run_import(args),
        Command::History(args) => run_history(args),
        Command::Report(args) => run_report(args),
        Command::Transactions(args) => run_transactions(args),
        Command::Compare(args) => run_compare(args),
    }
}

#[derive(Parser)]
#[command(name = "ousd-history")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "OUSD balance history, yield attribution and holder reports")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import blocks, logs and transactions (JSON arrays) into the ledger.
    Import(ImportArgs),
    /// Print an address's balance history.
    History(HistoryArgs),
    /// Generate a weekly or monthly holder report.
    Report(ReportArgs),
    /// Classify transactions and aggregate them per contract.
    Transactions(TransactionsArgs),
    /// Percentage change between two saved reports.
    Compare(CompareArgs),
}

#[derive(Args)]
struct LedgerArgs {
    #[arg(long, default_value = "./data/ledger.sqlite")]
    db: PathBuf,
}

#[derive(Args)]
struct RpcArgs {
    #[arg(long)]
    rpc_url: Option<String>,
    /// Extra attempts after a transport error.
    #[arg(long, default_value_t = 0)]
    retries: u32,
    #[arg(long, default_value = "./data/cache")]
    cache_dir: PathBuf,
    #[arg(long)]
    offline: bool,
}

#[derive(Parser)]
struct ImportArgs {
    #[command(flatten)]
    ledger: LedgerArgs,
    #[arg(long)]
    blocks: Option<PathBuf>,
    #[arg(long)]
    logs: Option<PathBuf>,
    #[arg(long)]
    transactions: Option<PathBuf>,
}

#[derive(Parser)]
struct HistoryArgs {
    #[arg(long)]
    address: String,
    #[command(flatten)]
    ledger: LedgerArgs,
    #[command(flatten)]
    rpc: RpcArgs,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct ReportArgs {
    /// Week number (Monday-first). Defaults to the last completed week.
    #[arg(long, conflicts_with = "month")]
    week: Option<u8>,
    /// Month number 1-12.
    #[arg(long)]
    month: Option<u8>,
    /// Report a month instead of a week when no number is given.
    #[arg(long)]
    monthly: bool,
    #[arg(long)]
    year: Option<i32>,
    /// Analyze accounts on parallel workers.
    #[arg(long)]
    parallel: bool,
    /// Only refresh the transaction analytics of an existing report.
    #[arg(long)]
    only_transactions: bool,
    /// Regenerate even when a finished or in-progress report exists.
    #[arg(long)]
    force: bool,
    #[arg(long, default_value = "./reports")]
    reports_dir: PathBuf,
    #[command(flatten)]
    ledger: LedgerArgs,
    #[command(flatten)]
    rpc: RpcArgs,
}

#[derive(Parser)]
struct TransactionsArgs {
    /// Analyze from this account's side; all transactions when omitted.
    #[arg(long)]
    account: Option<String>,
    /// Block number or RFC 3339 time.
    #[arg(long, requires = "to")]
    from: Option<String>,
    #[arg(long, requires = "from")]
    to: Option<String>,
    /// Print every analyzed transaction instead of the per-contract report.
    #[arg(long)]
    details: bool,
    #[command(flatten)]
    ledger: LedgerArgs,
}

#[derive(Parser)]
struct CompareArgs {
    #[arg(long)]
    current: PathBuf,
    #[arg(long)]
    previous: Option<PathBuf>,
}

fn cache_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("rpc.sqlite")
}

fn chain_reader(
    rpc: &RpcArgs,
    config: &ProtocolConfig,
) -> Result<RpcChainReader, Box<dyn std::error::Error>> {
    let cache = ResponseCache::open(cache_path(&rpc.cache_dir))?;
    let mut rpc_config = RpcConfig {
        max_retries: rpc.retries,
        offline: rpc.offline,
        ..Default::default()
    };
    if let Some(url) = &rpc.rpc_url {
        rpc_config.url = url.clone();
    }
    Ok(RpcChainReader::new(rpc_config, config, Some(cache))?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_output(
    value: &impl Serialize,
    out: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, format!("{}\n", json))?;
            info!(path = %path.display(), "output written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProtocolConfig::load();
    let mut ledger = SqliteLedger::open(&args.ledger.db)?;
    if let Some(path) = &args.blocks {
        let blocks: Vec<BlockRecord> = read_json(path)?;
        let summary = ledger.import_blocks(&blocks)?;
        info!(inserted = summary.inserted, "blocks imported");
    }
    if let Some(path) = &args.logs {
        let logs: Vec<RawLog> = read_json(path)?;
        let summary = ledger.import_logs(&logs, &config.token_address)?;
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            transfers = summary.transfers,
            skipped = summary.skipped,
            "logs imported"
        );
    }
    if let Some(path) = &args.transactions {
        let transactions: Vec<TransactionRecord> = read_json(path)?;
        let summary = ledger.import_transactions(&transactions)?;
        info!(inserted = summary.inserted, "transactions imported");
    }
    Ok(())
}

fn run_history(args: HistoryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProtocolConfig::load();
    let ledger = SqliteLedger::open(&args.ledger.db)?;
    let reader = chain_reader(&args.rpc, &config)?;
    let history = address_history(&ledger, &reader, &config, &args.address, Precision::ON_CHAIN)?;
    info!(
        address = %args.address,
        records = history.len(),
        requests = reader.request_count(),
        "history complete"
    );
    write_output(&history, args.out.as_deref())
}

fn report_period(
    args: &ReportArgs,
    now: OffsetDateTime,
) -> Result<ReportPeriod, Box<dyn std::error::Error>> {
    let year = args.year.unwrap_or_else(|| now.year());
    let period = match (args.week, args.month) {
        (Some(week), _) => ReportPeriod::week(year, week)?,
        (None, Some(month)) => ReportPeriod::month(year, month)?,
        (None, None) if args.monthly => ReportPeriod::last_completed_month(now),
        (None, None) => ReportPeriod::last_completed_week(now),
    };
    Ok(period)
}

fn run_report(args: ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProtocolConfig::load();
    let now = OffsetDateTime::now_utc();
    let period = report_period(&args, now)?;
    let archive = ReportArchive::new(&args.reports_dir);
    let existing = archive.load(period)?;

    if args.only_transactions {
        let mut record = existing.ok_or_else(|| format!("no report for {} to update", period))?;
        let ledger = SqliteLedger::open(&args.ledger.db)?;
        let analyses =
            analyze_transactions(&ledger, &AccountScope::All, Some(&record.window()), &config)?;
        record.transaction_report = transaction_report(&analyses, &config);
        record.updated_at = now;
        let path = archive.save(&record)?;
        info!(%period, path = %path.display(), "transaction analytics refreshed");
        return Ok(());
    }

    if !args.force && !AnalyticsReportRecord::needs_regeneration(existing.as_ref(), now) {
        info!(%period, "report does not need creation");
        return Ok(());
    }

    let ledger = SqliteLedger::open(&args.ledger.db)?;
    let window = period_blocks(&ledger, period)?;
    info!(
        %period,
        from_block = window.from_block,
        to_block = window.to_block,
        "generating report"
    );
    let analyses = analyze_transactions(&ledger, &AccountScope::All, Some(&window), &config)?;
    let record = AnalyticsReportRecord::processing(
        period,
        window,
        transaction_report(&analyses, &config),
        now,
    );
    archive.save(&record)?;

    let reader = Arc::new(chain_reader(&args.rpc, &config)?);
    let apy = TrailingApy::new(Arc::clone(&reader));
    let report = if args.parallel {
        let rt = tokio::runtime::Runtime::new()?;
        let connector = Arc::new(SqliteConnector::new(&args.ledger.db));
        generate_report_parallel(
            &rt,
            connector,
            Arc::clone(&reader),
            reader.as_ref(),
            &apy,
            &config,
            window,
        )?
    } else {
        let inputs = ReportInputs {
            chain: reader.as_ref(),
            supply: reader.as_ref(),
            apy: &apy,
            config: &config,
        };
        generate_report(&ledger, &inputs, window)?
    };

    let record = record.complete(&report, OffsetDateTime::now_utc())?;
    let path = archive.save(&record)?;
    info!(
        %period,
        accounts = report.counts.accounts_analyzed,
        requests = reader.request_count(),
        path = %path.display(),
        "report complete"
    );
    Ok(())
}

fn run_transactions(args: TransactionsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProtocolConfig::load();
    let ledger = SqliteLedger::open(&args.ledger.db)?;
    let scope = match &args.account {
        Some(account) => AccountScope::account(account),
        None => AccountScope::All,
    };
    let window = match (&args.from, &args.to) {
        (Some(from), Some(to)) => Some(ReportWindow::resolve(
            &ledger,
            parse_block_or_time(from)?,
            parse_block_or_time(to)?,
        )?),
        _ => None,
    };
    let analyses = analyze_transactions(&ledger, &scope, window.as_ref(), &config)?;
    info!(transactions = analyses.len(), "transactions analyzed");
    if args.details {
        write_output(&analyses, None)
    } else {
        write_output(&transaction_report(&analyses, &config), None)
    }
}

fn run_compare(args: CompareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let current = ReportView::load(&load_record(&args.current)?)?;
    let previous = match &args.previous {
        Some(path) => Some(ReportView::load(&load_record(path)?)?),
        None => None,
    };
    let changes = ReportChanges::between(&current, previous.as_ref());
    write_output(&changes, None)
}
