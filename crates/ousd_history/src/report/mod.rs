//! Persisted analytics reports: record, typed view, periods, and period-over-period changes.

mod changes;
mod period;

pub use changes::{percent_change, ReportChanges};
pub use period::{period_blocks, ReportPeriod};

use crate::chain::PoolSupply;
use crate::compute::aggregate::{AccountCounts, AggregateReport, ReportWindow};
use crate::compute::transactions::TransactionReport;
use crate::store::StoreError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("invalid period: {0}")]
    InvalidPeriod(String),
}

/// A processing report older than this is assumed abandoned.
pub const STALE_PROCESSING_AFTER: Duration = Duration::hours(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Processing,
    Done,
}

/// One period's report as written to disk. `report` holds the serialized
/// [`AggregateReport`] once the report is done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsReportRecord {
    pub period: ReportPeriod,
    pub status: ReportStatus,
    pub block_start: u64,
    pub block_end: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    #[serde(flatten)]
    pub counts: AccountCounts,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub transaction_report: TransactionReport,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl AnalyticsReportRecord {
    /// Record for a report whose account analysis has not finished yet.
    pub fn processing(
        period: ReportPeriod,
        window: ReportWindow,
        transaction_report: TransactionReport,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            period,
            status: ReportStatus::Processing,
            block_start: window.from_block,
            block_end: window.to_block,
            start_time: window.start,
            end_time: window.end,
            counts: AccountCounts::default(),
            report: None,
            transaction_report,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(
        self,
        report: &AggregateReport,
        now: OffsetDateTime,
    ) -> Result<Self, ReportError> {
        Ok(Self {
            status: ReportStatus::Done,
            counts: report.counts,
            report: Some(serde_json::to_string(report)?),
            updated_at: now,
            ..self
        })
    }

    pub fn window(&self) -> ReportWindow {
        ReportWindow {
            from_block: self.block_start,
            to_block: self.block_end,
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// False for a done report or one still plausibly being processed.
    pub fn needs_regeneration(existing: Option<&Self>, now: OffsetDateTime) -> bool {
        match existing {
            None => true,
            Some(r) if r.status == ReportStatus::Done => false,
            Some(r) => now - r.updated_at >= STALE_PROCESSING_AFTER,
        }
    }

    pub fn aggregate(&self) -> Result<Option<AggregateReport>, ReportError> {
        self.report
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(ReportError::from)
    }
}

/// Report stats resolved once from a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportView {
    pub period: ReportPeriod,
    pub counts: AccountCounts,
    /// Rounded to 2 places.
    pub total_supply: Option<Decimal>,
    pub apy: Option<Decimal>,
    pub pools: Vec<PoolSupply>,
    pub other_rebasing: Option<Decimal>,
    pub other_non_rebasing: Option<Decimal>,
    pub curve_metapool_total_supply: Option<Decimal>,
    pub share_earning_curve_ogn: Option<Decimal>,
}

impl ReportView {
    pub fn load(record: &AnalyticsReportRecord) -> Result<Self, ReportError> {
        let aggregate = record.aggregate()?;
        let supply = aggregate.as_ref().and_then(|a| a.supply_data.as_ref());
        let curve = aggregate.as_ref().and_then(|a| a.curve_data);
        Ok(Self {
            period: record.period,
            counts: record.counts,
            total_supply: supply.map(|s| {
                s.total_supply
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
            }),
            apy: aggregate.as_ref().map(|a| a.apy),
            pools: supply.map(|s| s.pools.clone()).unwrap_or_default(),
            other_rebasing: supply.map(|s| s.other_rebasing),
            other_non_rebasing: supply.map(|s| s.other_non_rebasing),
            curve_metapool_total_supply: curve.map(|c| c.total_supply),
            share_earning_curve_ogn: curve.map(|c| c.earning_ogn),
        })
    }

    pub fn has_supply_data(&self) -> bool {
        self.other_rebasing.is_some()
    }

    pub fn has_curve_data(&self) -> bool {
        self.curve_metapool_total_supply.is_some()
    }
}

/// Directory of report records, one JSON file per period.
#[derive(Clone, Debug)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, period: ReportPeriod) -> PathBuf {
        self.dir.join(format!("{period}.json"))
    }

    pub fn load(&self, period: ReportPeriod) -> Result<Option<AnalyticsReportRecord>, ReportError> {
        let path = self.path_for(period);
        if !path.exists() {
            return Ok(None);
        }
        load_record(&path).map(Some)
    }

    /// Write the record, replacing any earlier one for the same period.
    pub fn save(&self, record: &AnalyticsReportRecord) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(record.period);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), status = ?record.status, "report saved");
        Ok(path)
    }
}

pub fn load_record(path: &Path) -> Result<AnalyticsReportRecord, ReportError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
