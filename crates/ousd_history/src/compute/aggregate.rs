//! Population report: analyze every holder over one window and tally the facts.

use crate::chain::abi::normalize_address;
use crate::chain::{
    ApyProvider, BlockOrTime, BlockTag, ChainError, ChainReader, CurveData,
    SupplyData, SupplySource,
};
use crate::compute::facts::{derive_facts, AccountFacts};
use crate::ousd::classify::{classify_batch, Perspective};
use crate::ousd::events::{LedgerError, LogEvent, RebaseEvent};
use crate::ousd::merge::merge_ledger;
use crate::ousd::precision::{Precision, PrecisionError};
use crate::ousd::protocol_config::ProtocolConfig;
use crate::ousd::reconstruct::{reconstruct, ReconstructError};
use crate::store::{
    block_number_for_time, AccountScope, BlockRange, LedgerConnector, LedgerStore, StoreError,
    TimeDirection, TimeWindow,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("reconstruct: {0}")]
    Reconstruct(#[from] ReconstructError),
    #[error("precision: {0}")]
    Precision(#[from] PrecisionError),
    #[error("{} account(s) failed analysis, first: {}", .0.len(), first_failure(.0))]
    AccountsFailed(Vec<AccountFailure>),
    #[error("analysis worker panicked: {0}")]
    WorkerPanicked(String),
}

#[derive(Debug)]
pub struct AccountFailure {
    pub account: String,
    pub error: Box<AnalysisError>,
}

impl fmt::Display for AccountFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.account, self.error)
    }
}

fn first_failure(failures: &[AccountFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Reporting window: blocks `[from_block, to_block]` and times `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub from_block: u64,
    pub to_block: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl ReportWindow {
    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// Transactions are selected with the end block excluded.
    pub fn block_range(&self) -> BlockRange {
        BlockRange::new(self.from_block, self.to_block)
    }

    /// Resolve each bound given as a block or a time into both.
    pub fn resolve<S: LedgerStore + ?Sized>(
        store: &S,
        from: BlockOrTime,
        to: BlockOrTime,
    ) -> Result<Self, AnalysisError> {
        let (from_block, start) = resolve_bound(store, from, TimeDirection::AtOrAfter)?;
        let (to_block, end) = resolve_bound(store, to, TimeDirection::AtOrBefore)?;
        Ok(Self {
            from_block,
            to_block,
            start,
            end,
        })
    }
}

fn resolve_bound<S: LedgerStore + ?Sized>(
    store: &S,
    bound: BlockOrTime,
    direction: TimeDirection,
) -> Result<(u64, OffsetDateTime), AnalysisError> {
    match bound {
        BlockOrTime::Time(t) => Ok((block_number_for_time(store, t, direction)?, t)),
        BlockOrTime::Block(n) => {
            let time = store
                .block_times(&[n])?
                .get(&n)
                .copied()
                .ok_or(StoreError::MissingBlockTime { block_number: n })?;
            Ok((n, time))
        }
    }
}

/// Everything shared read-only by every account analysis of one report.
#[derive(Clone, Debug)]
pub struct AnalysisContext {
    pub config: ProtocolConfig,
    pub rebases: Arc<[RebaseEvent]>,
    pub window: ReportWindow,
    pub precision: Precision,
}

/// Rebases of the tracked token in `range`, newest first, each with its block time.
pub fn load_rebases<S: LedgerStore + ?Sized>(
    store: &S,
    config: &ProtocolConfig,
    range: Option<BlockRange>,
) -> Result<Vec<RebaseEvent>, AnalysisError> {
    let raw = store.rebase_logs(&config.token_address, range)?;
    let batch = classify_batch(&raw, Perspective::All, &config.token_address);
    let mut rebases = Vec::with_capacity(batch.events.len());
    for event in batch.events {
        match event {
            LogEvent::Rebase(r) => rebases.push(r),
            other => {
                return Err(LedgerError::UnrecognizedLedgerEntry {
                    kind: other.kind(),
                    transaction_hash: other.transaction_hash().to_string(),
                }
                .into())
            }
        }
    }

    let blocks: Vec<u64> = rebases.iter().map(|r| r.block_number).collect();
    let times = store.block_times(&blocks)?;
    rebases
        .into_iter()
        .map(|r| match times.get(&r.block_number) {
            Some(t) => Ok(r.with_block_time(*t)),
            None => Err(StoreError::MissingBlockTime {
                block_number: r.block_number,
            }
            .into()),
        })
        .collect()
}

pub fn prepare_context<S: LedgerStore + ?Sized>(
    store: &S,
    config: ProtocolConfig,
    window: ReportWindow,
) -> Result<AnalysisContext, AnalysisError> {
    let range = BlockRange::through(window.from_block, window.to_block);
    let rebases = load_rebases(store, &config, Some(range))?;
    debug!(
        rebases = rebases.len(),
        from = window.from_block,
        to = window.to_block,
        "rebases loaded"
    );
    Ok(AnalysisContext {
        config,
        rebases: rebases.into(),
        window,
        precision: Precision::ON_CHAIN,
    })
}

pub fn analyze_account<S, R>(
    store: &S,
    chain: &R,
    ctx: &AnalysisContext,
    account: &str,
) -> Result<AccountFacts, AnalysisError>
where
    S: LedgerStore + ?Sized,
    R: ChainReader + ?Sized,
{
    let address = normalize_address(account);
    let scope = AccountScope::Account(address.clone());
    let config = &ctx.config;

    let transfers = store.events_for_account(&scope, Some(ctx.window.time_window()))?;
    let previous = store.events_for_account(
        &scope,
        Some(TimeWindow::new(config.start_of_everything, ctx.window.start)),
    )?;
    let pre_campaign = store.events_for_account(
        &scope,
        Some(TimeWindow::new(
            config.start_of_everything,
            config.curve_campaign_start,
        )),
    )?;

    let credits = chain.credits_balance_of(&address, BlockTag::Number(ctx.window.to_block))?;
    let current_balance = credits.balance(ctx.precision)?;

    let merged = merge_ledger(&ctx.rebases, transfers, config.relaunch_block);
    let ledger = reconstruct(credits.credits, merged, ctx.precision)?;
    Ok(derive_facts(
        &address,
        &ledger,
        &previous,
        &pre_campaign,
        current_balance,
    ))
}

fn analyze_chunk<S, R>(
    store: &S,
    chain: &R,
    ctx: &AnalysisContext,
    accounts: &[String],
) -> (Vec<AccountFacts>, Vec<AccountFailure>)
where
    S: LedgerStore + ?Sized,
    R: ChainReader + ?Sized,
{
    let mut facts = Vec::with_capacity(accounts.len());
    let mut failures = Vec::new();
    for account in accounts {
        match analyze_account(store, chain, ctx, account) {
            Ok(f) => facts.push(f),
            Err(e) => {
                warn!(account = %account, error = %e, "account analysis failed");
                failures.push(AccountFailure {
                    account: account.clone(),
                    error: Box::new(e),
                });
            }
        }
    }
    (facts, failures)
}

fn collect_results(
    facts: Vec<AccountFacts>,
    failures: Vec<AccountFailure>,
) -> Result<Vec<AccountFacts>, AnalysisError> {
    if failures.is_empty() {
        Ok(facts)
    } else {
        Err(AnalysisError::AccountsFailed(failures))
    }
}

/// Analyze accounts one after another. Fails if any account fails.
pub fn analyze_accounts<S, R>(
    store: &S,
    chain: &R,
    ctx: &AnalysisContext,
    accounts: &[String],
) -> Result<Vec<AccountFacts>, AnalysisError>
where
    S: LedgerStore + ?Sized,
    R: ChainReader + ?Sized,
{
    info!(accounts = accounts.len(), "analyzing accounts");
    let (facts, failures) = analyze_chunk(store, chain, ctx, accounts);
    collect_results(facts, failures)
}

/// One blocking worker per chunk of `config.parallelism` accounts, each with its own store
/// connection. Results come back in chunk order.
pub async fn analyze_accounts_parallel<C, R>(
    connector: Arc<C>,
    chain: Arc<R>,
    ctx: Arc<AnalysisContext>,
    accounts: &[String],
) -> Result<Vec<AccountFacts>, AnalysisError>
where
    C: LedgerConnector + 'static,
    R: ChainReader + ?Sized + 'static,
{
    let chunk_size = ctx.config.parallelism.max(1);
    info!(
        accounts = accounts.len(),
        chunk_size,
        workers = accounts.len().div_ceil(chunk_size),
        "analyzing accounts in parallel"
    );

    let mut handles = Vec::new();
    for chunk in accounts.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let connector = Arc::clone(&connector);
        let chain = Arc::clone(&chain);
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::task::spawn_blocking(
            move || -> Result<_, AnalysisError> {
                let store = connector.connect()?;
                Ok(analyze_chunk(&store, &*chain, &ctx, &chunk))
            },
        ));
    }

    let mut facts = Vec::with_capacity(accounts.len());
    let mut failures = Vec::new();
    for handle in handles {
        let (ok, failed) = handle
            .await
            .map_err(|e| AnalysisError::WorkerPanicked(e.to_string()))??;
        facts.extend(ok);
        failures.extend(failed);
    }
    collect_results(facts, failures)
}

/// Distinct holder addresses, zero and burn addresses excluded, sorted.
pub fn holder_set<I>(addresses: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    addresses
        .into_iter()
        .map(|a| normalize_address(a.as_ref()))
        .filter(|a| !ProtocolConfig::is_excluded_holder(a))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Metapool size and the share of it staked in the gauge. Share is zero for an empty pool.
pub fn curve_data<R: ChainReader + ?Sized>(
    chain: &R,
    config: &ProtocolConfig,
    block: u64,
) -> Result<CurveData, AnalysisError> {
    let at = BlockTag::Number(block);
    let staked = chain.balance_of(&config.curve_metapool, &config.curve_metapool_gauge, 18, at)?;
    let total_supply = chain.total_supply(&config.curve_metapool, 18, at)?;
    let earning_ogn = if total_supply.is_zero() {
        Decimal::ZERO
    } else {
        Precision::ON_CHAIN.div(staked, total_supply)?
    };
    Ok(CurveData {
        total_supply,
        earning_ogn,
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCounts {
    pub accounts_analyzed: u64,
    pub accounts_holding_ousd: u64,
    pub accounts_holding_more_than_100_ousd: u64,
    pub accounts_holding_more_than_100_ousd_after_curve_start: u64,
    pub new_accounts: u64,
    pub new_accounts_after_curve_start: u64,
    pub accounts_with_non_rebase_balance_increase: u64,
    pub accounts_with_non_rebase_balance_decrease: u64,
}

impl AccountCounts {
    pub fn tally(facts: &[AccountFacts]) -> Self {
        let count = |pred: fn(&AccountFacts) -> bool| facts.iter().filter(|f| pred(f)).count() as u64;
        Self {
            accounts_analyzed: facts.len() as u64,
            accounts_holding_ousd: count(|f| f.is_holding),
            accounts_holding_more_than_100_ousd: count(|f| f.is_large_holder),
            accounts_holding_more_than_100_ousd_after_curve_start: count(|f| {
                f.new_after_campaign_and_large
            }),
            new_accounts: count(|f| f.is_new_account),
            new_accounts_after_curve_start: count(|f| f.is_new_after_campaign_start),
            accounts_with_non_rebase_balance_increase: count(AccountFacts::has_increased),
            accounts_with_non_rebase_balance_decrease: count(AccountFacts::has_decreased),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    #[serde(flatten)]
    pub counts: AccountCounts,
    pub supply_data: Option<SupplyData>,
    pub apy: Decimal,
    pub curve_data: Option<CurveData>,
}

pub fn build_report(
    facts: &[AccountFacts],
    supply_data: SupplyData,
    apy: Decimal,
    curve_data: CurveData,
) -> AggregateReport {
    AggregateReport {
        counts: AccountCounts::tally(facts),
        supply_data: Some(supply_data),
        apy,
        curve_data: Some(curve_data),
    }
}

/// Collaborators needed for one report besides the store.
pub struct ReportInputs<'a, R: ?Sized, S: ?Sized, A: ?Sized> {
    pub chain: &'a R,
    pub supply: &'a S,
    pub apy: &'a A,
    pub config: &'a ProtocolConfig,
}

fn window_snapshot<R, S, A>(
    inputs: &ReportInputs<'_, R, S, A>,
    block: u64,
) -> Result<(SupplyData, Decimal, CurveData), AnalysisError>
where
    R: ChainReader + ?Sized,
    S: SupplySource + ?Sized,
    A: ApyProvider + ?Sized,
{
    let supply_data = inputs.supply.supply_data(block)?;
    let apy = inputs.apy.trailing_apy(block)?;
    let curve = curve_data(inputs.chain, inputs.config, block)?;
    Ok((supply_data, apy, curve))
}

/// Sequential report over every holder.
pub fn generate_report<St, R, S, A>(
    store: &St,
    inputs: &ReportInputs<'_, R, S, A>,
    window: ReportWindow,
) -> Result<AggregateReport, AnalysisError>
where
    St: LedgerStore + ?Sized,
    R: ChainReader + ?Sized,
    S: SupplySource + ?Sized,
    A: ApyProvider + ?Sized,
{
    let holders = holder_set(store.all_transfer_addresses()?);
    let ctx = prepare_context(store, inputs.config.clone(), window)?;
    let (supply_data, apy, curve) = window_snapshot(inputs, window.to_block)?;
    let facts = analyze_accounts(store, inputs.chain, &ctx, &holders)?;
    info!(accounts = facts.len(), to_block = window.to_block, "report generated");
    Ok(build_report(&facts, supply_data, apy, curve))
}

/// Same report, analyzing holders on blocking workers of `runtime`. Snapshot reads happen on
/// the calling thread, so blocking chain readers stay out of async contexts.
pub fn generate_report_parallel<C, R, S, A>(
    runtime: &Runtime,
    connector: Arc<C>,
    chain: Arc<R>,
    supply: &S,
    apy: &A,
    config: &ProtocolConfig,
    window: ReportWindow,
) -> Result<AggregateReport, AnalysisError>
where
    C: LedgerConnector + 'static,
    R: ChainReader + ?Sized + 'static,
    S: SupplySource + ?Sized,
    A: ApyProvider + ?Sized,
{
    let (holders, ctx) = {
        let store = connector.connect()?;
        let holders = holder_set(store.all_transfer_addresses()?);
        (holders, prepare_context(&store, config.clone(), window)?)
    };
    let inputs = ReportInputs {
        chain: &*chain,
        supply,
        apy,
        config,
    };
    let (supply_data, apy, curve) = window_snapshot(&inputs, window.to_block)?;
    let facts = runtime.block_on(analyze_accounts_parallel(
        connector,
        Arc::clone(&chain),
        Arc::new(ctx),
        &holders,
    ))?;
    info!(accounts = facts.len(), to_block = window.to_block, "report generated");
    Ok(build_report(&facts, supply_data, apy, curve))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::abi::address_to_topic;
    use crate::chain::CreditsBalance;
    use crate::ousd::classify::{TOTAL_SUPPLY_UPDATED_TOPIC, TRANSFER_TOPIC};
    use crate::ousd::events::RawLog;
    use crate::ousd::protocol_config::{BURN_ADDRESS, OUSD_ADDRESS, ZERO_ADDRESS};
    use crate::store::{BlockRecord, SqliteConnector, SqliteLedger};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;
    use time::macros::datetime;

    pub(crate) const ALICE: &str = "0x1111111111111111111111111111111111111111";
    pub(crate) const BOB: &str = "0x2222222222222222222222222222222222222222";

    /// Chain reader answering from fixed maps.
    #[derive(Default)]
    pub(crate) struct FakeChain {
        pub credits: HashMap<String, CreditsBalance>,
        pub balances: HashMap<(String, String), Decimal>,
        pub supplies: HashMap<String, Decimal>,
    }

    impl ChainReader for FakeChain {
        fn credits_balance_of(
            &self,
            account: &str,
            _at: BlockTag,
        ) -> Result<CreditsBalance, ChainError> {
            self.credits
                .get(account)
                .copied()
                .ok_or_else(|| ChainError::Rpc {
                    code: -32000,
                    message: format!("no credits for {account}"),
                })
        }

        fn balance_of(
            &self,
            token: &str,
            account: &str,
            _decimals: u32,
            _at: BlockTag,
        ) -> Result<Decimal, ChainError> {
            Ok(self
                .balances
                .get(&(token.to_string(), account.to_string()))
                .copied()
                .unwrap_or_default())
        }

        fn total_supply(
            &self,
            token: &str,
            _decimals: u32,
            _at: BlockTag,
        ) -> Result<Decimal, ChainError> {
            Ok(self.supplies.get(token).copied().unwrap_or_default())
        }
    }

    pub(crate) struct FixedSupply;

    impl SupplySource for FixedSupply {
        fn supply_data(&self, _block: u64) -> Result<SupplyData, ChainError> {
            Ok(SupplyData::from_parts(dec!(1000), dec!(400), vec![]))
        }

        fn rebasing_credits_ratio(&self, _block: u64) -> Result<Decimal, ChainError> {
            Ok(dec!(1))
        }
    }

    pub(crate) struct FixedApy(pub Decimal);

    impl ApyProvider for FixedApy {
        fn trailing_apy(&self, _block: u64) -> Result<Decimal, ChainError> {
            Ok(self.0)
        }
    }

    fn log(block: u64, tx: &str, index: u64, topics: Vec<String>, data: String) -> RawLog {
        RawLog {
            address: OUSD_ADDRESS.into(),
            topics,
            data,
            block_number: block,
            transaction_hash: tx.into(),
            transaction_index: 0,
            log_index: index,
            block_time: None,
        }
    }

    fn rebase_log(block: u64, tx: &str, rate_e18: u128) -> RawLog {
        log(
            block,
            tx,
            0,
            vec![TOTAL_SUPPLY_UPDATED_TOPIC.into()],
            format!("0x{:064x}{:064x}{:064x}", 0, 0, rate_e18),
        )
    }

    fn transfer_log(block: u64, tx: &str, from: &str, to: &str, whole: u128) -> RawLog {
        log(
            block,
            tx,
            1,
            vec![
                TRANSFER_TOPIC.into(),
                address_to_topic(from),
                address_to_topic(to),
            ],
            format!("0x{:064x}", whole * 10u128.pow(18)),
        )
    }

    /// Blocks 100..=300 one minute apart from 2021-04-05, a rebase at 110 (rate 2) and
    /// transfers at 150 (mint 50 to bob) and 200 (bob sends alice 10).
    pub(crate) fn seeded_ledger(ledger: &mut SqliteLedger) {
        let base = datetime!(2021-04-05 00:00 UTC);
        let blocks: Vec<BlockRecord> = (100..=300)
            .map(|n| BlockRecord {
                block_number: n,
                block_time: base + time::Duration::minutes(n as i64 - 100),
            })
            .collect();
        ledger.import_blocks(&blocks).unwrap();
        ledger
            .import_logs(
                &[
                    rebase_log(110, "0xr110", 2 * 10u128.pow(18)),
                    transfer_log(150, "0xt150", ZERO_ADDRESS, BOB, 50),
                    transfer_log(200, "0xt200", BOB, ALICE, 10),
                ],
                OUSD_ADDRESS,
            )
            .unwrap();
    }

    pub(crate) fn test_config() -> ProtocolConfig {
        ProtocolConfig {
            relaunch_block: 50,
            start_of_everything: datetime!(2021-01-01 00:00 UTC),
            curve_campaign_start: datetime!(2021-03-01 00:00 UTC),
            parallelism: 1,
            ..ProtocolConfig::default()
        }
    }

    pub(crate) fn fake_chain() -> FakeChain {
        let config = ProtocolConfig::default();
        let mut chain = FakeChain::default();
        chain.credits.insert(
            ALICE.into(),
            CreditsBalance {
                credits: dec!(20),
                credits_per_token: dec!(2),
            },
        );
        chain.credits.insert(
            BOB.into(),
            CreditsBalance {
                credits: dec!(80),
                credits_per_token: dec!(2),
            },
        );
        chain
            .supplies
            .insert(config.curve_metapool.clone(), dec!(200));
        chain.balances.insert(
            (config.curve_metapool, config.curve_metapool_gauge),
            dec!(50),
        );
        chain
    }

    fn window() -> ReportWindow {
        ReportWindow {
            from_block: 100,
            to_block: 300,
            start: datetime!(2021-04-05 00:00 UTC),
            end: datetime!(2021-04-05 03:20 UTC),
        }
    }

    #[test]
    fn holder_set_excludes_zero_and_burn() {
        let holders = holder_set([
            BOB,
            ZERO_ADDRESS,
            "0x1111111111111111111111111111111111111111",
            BURN_ADDRESS,
            "0x2222222222222222222222222222222222222222",
        ]);
        assert_eq!(holders, vec![ALICE.to_string(), BOB.to_string()]);
    }

    #[test]
    fn resolves_window_from_times_and_blocks() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let w = ReportWindow::resolve(
            &ledger,
            BlockOrTime::Time(datetime!(2021-04-05 00:00:30 UTC)),
            BlockOrTime::Block(300),
        )
        .unwrap();
        assert_eq!(w.from_block, 101);
        assert_eq!(w.end, datetime!(2021-04-05 03:20 UTC));

        let err = ReportWindow::resolve(&ledger, BlockOrTime::Block(5), BlockOrTime::Block(300))
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Store(StoreError::MissingBlockTime { block_number: 5 })
        ));
    }

    #[test]
    fn rebases_carry_block_times() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let rebases = load_rebases(&ledger, &test_config(), None).unwrap();
        assert_eq!(rebases.len(), 1);
        assert_eq!(rebases[0].credits_per_token, dec!(2));
        assert_eq!(
            rebases[0].block_time,
            Some(datetime!(2021-04-05 00:10 UTC))
        );
    }

    #[test]
    fn account_facts_from_window() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let ctx = prepare_context(&ledger, test_config(), window()).unwrap();
        let chain = fake_chain();

        let alice = analyze_account(&ledger, &chain, &ctx, ALICE).unwrap();
        assert_eq!(alice.balance, dec!(10));
        assert!(alice.is_holding && alice.is_new_account);
        assert!(alice.is_new_after_campaign_start);
        assert_eq!(alice.non_rebase_balance_diff, dec!(10));

        let bob = analyze_account(&ledger, &chain, &ctx, BOB).unwrap();
        assert_eq!(bob.balance, dec!(40));
        assert_eq!(bob.non_rebase_balance_diff, dec!(40));
        assert!(bob.is_new_after_campaign_start);
    }

    #[test]
    fn report_counts_and_curve_share() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let chain = fake_chain();
        let config = test_config();
        let inputs = ReportInputs {
            chain: &chain,
            supply: &FixedSupply,
            apy: &FixedApy(dec!(12.5)),
            config: &config,
        };
        let report = generate_report(&ledger, &inputs, window()).unwrap();
        assert_eq!(report.counts.accounts_analyzed, 2);
        assert_eq!(report.counts.accounts_holding_ousd, 2);
        assert_eq!(report.counts.accounts_holding_more_than_100_ousd, 0);
        assert_eq!(report.counts.new_accounts, 2);
        assert_eq!(report.counts.accounts_with_non_rebase_balance_increase, 2);
        assert_eq!(report.apy, dec!(12.5));
        let curve = report.curve_data.unwrap();
        assert_eq!(curve.earning_ogn, dec!(0.25));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["accounts_analyzed"], 2);
        assert_eq!(json["apy"], "12.5");
    }

    #[test]
    fn failed_account_blocks_report() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let mut chain = fake_chain();
        chain.credits.remove(BOB);
        let ctx = prepare_context(&ledger, test_config(), window()).unwrap();
        let err = analyze_accounts(&ledger, &chain, &ctx, &[ALICE.into(), BOB.into()]).unwrap_err();
        match err {
            AnalysisError::AccountsFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].account, BOB);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parallel_matches_sequential() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut ledger = SqliteLedger::open(tmp.path()).unwrap();
            seeded_ledger(&mut ledger);
        }
        let connector = Arc::new(SqliteConnector::new(tmp.path()));
        let chain = Arc::new(fake_chain());
        let config = test_config();

        let runtime = Runtime::new().unwrap();
        let parallel = generate_report_parallel(
            &runtime,
            Arc::clone(&connector),
            Arc::clone(&chain),
            &FixedSupply,
            &FixedApy(dec!(3)),
            &config,
            window(),
        )
        .unwrap();

        let ledger = SqliteLedger::open(tmp.path()).unwrap();
        let inputs = ReportInputs {
            chain: &*chain,
            supply: &FixedSupply,
            apy: &FixedApy(dec!(3)),
            config: &config,
        };
        let sequential = generate_report(&ledger, &inputs, window()).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[tokio::test]
    async fn parallel_surfaces_failures() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut ledger = SqliteLedger::open(tmp.path()).unwrap();
            seeded_ledger(&mut ledger);
        }
        let connector = Arc::new(SqliteConnector::new(tmp.path()));
        let ctx = {
            let ledger = SqliteLedger::open(tmp.path()).unwrap();
            Arc::new(prepare_context(&ledger, test_config(), window()).unwrap())
        };
        let chain = Arc::new(FakeChain::default());
        let err = analyze_accounts_parallel(connector, chain, ctx, &[ALICE.into(), BOB.into()])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::AccountsFailed(ref f) if f.len() == 2));
    }
}
