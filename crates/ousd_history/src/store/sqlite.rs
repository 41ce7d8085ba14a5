//! SQLite ledger. Tracked-token transfers are materialized at import with their block time.

use super::{
    AccountScope, BlockRange, BlockRecord, LedgerConnector, LedgerStore, StoreError,
    TimeDirection, TimeWindow, TransactionRecord,
};
use crate::chain::abi::normalize_address;
use crate::ousd::classify::{
    classify_log, Perspective, TOTAL_SUPPLY_UPDATED_HIGHRES_TOPIC, TOTAL_SUPPLY_UPDATED_TOPIC,
};
use crate::ousd::events::{LogEvent, RawLog, TransferEvent};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS blocks (
        block_number INTEGER PRIMARY KEY,
        block_time INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_blocks_time ON blocks(block_time);

    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        address TEXT NOT NULL,
        topic_0 TEXT,
        topic_1 TEXT,
        topic_2 TEXT,
        topic_3 TEXT,
        data TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        transaction_hash TEXT NOT NULL,
        transaction_index INTEGER NOT NULL,
        log_index INTEGER NOT NULL,
        UNIQUE (transaction_hash, log_index)
    );
    CREATE INDEX IF NOT EXISTS idx_logs_topic ON logs(topic_0, block_number);
    CREATE INDEX IF NOT EXISTS idx_logs_tx ON logs(transaction_hash);

    CREATE TABLE IF NOT EXISTS transfers (
        transaction_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        block_time INTEGER NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        amount TEXT NOT NULL,
        PRIMARY KEY (transaction_hash, log_index)
    );
    CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_address, block_time);
    CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_address, block_time);

    CREATE TABLE IF NOT EXISTS transactions (
        hash TEXT PRIMARY KEY,
        block_number INTEGER NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT,
        value TEXT NOT NULL,
        internal_transactions TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_number);
"#;

const LOG_COLUMNS: &str = "l.address, l.topic_0, l.topic_1, l.topic_2, l.topic_3, l.data, \
     l.block_number, l.transaction_hash, l.transaction_index, l.log_index, b.block_time";

/// SQLite caps bound parameters per statement; block lookups go in chunks of this size.
const IN_CHUNK: usize = 500;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    /// Tracked-token transfers indexed from the inserted logs.
    pub transfers: usize,
    /// Records dropped because they could not be decoded or lacked a block time.
    pub skipped: usize,
}

pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open or create the ledger at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn import_blocks(&mut self, blocks: &[BlockRecord]) -> Result<ImportSummary, StoreError> {
        let tx = self.conn.transaction()?;
        let mut summary = ImportSummary::default();
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO blocks (block_number, block_time) VALUES (?1, ?2)",
            )?;
            for block in blocks {
                stmt.execute(params![
                    sql_int(block.block_number)?,
                    block.block_time.unix_timestamp()
                ])?;
                summary.inserted += 1;
            }
        }
        tx.commit()?;
        debug!(inserted = summary.inserted, "imported blocks");
        Ok(summary)
    }

    /// Import raw logs. Transfers of `token` are indexed using the log's own block time or the
    /// stored block, so import blocks first. Undecodable records are skipped with a warning.
    pub fn import_logs(
        &mut self,
        logs: &[RawLog],
        token: &str,
    ) -> Result<ImportSummary, StoreError> {
        let tx = self.conn.transaction()?;
        let mut summary = ImportSummary::default();
        {
            let mut insert_log = tx.prepare(
                "INSERT OR IGNORE INTO logs (address, topic_0, topic_1, topic_2, topic_3, data, \
                 block_number, transaction_hash, transaction_index, log_index) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_transfer = tx.prepare(
                "INSERT OR IGNORE INTO transfers (transaction_hash, log_index, block_number, \
                 block_time, from_address, to_address, amount) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut stored_time =
                tx.prepare("SELECT block_time FROM blocks WHERE block_number = ?1")?;

            for log in logs {
                let event = match classify_log(log, Perspective::All, token) {
                    Ok(event) => event,
                    Err(fault) => {
                        warn!(error = %fault, "skipping undecodable log");
                        summary.skipped += 1;
                        continue;
                    }
                };
                let transfer = match event {
                    Some(LogEvent::Transfer(t)) => {
                        let time = match log.block_time {
                            Some(t) => Some(t.unix_timestamp()),
                            None => stored_time
                                .query_row([sql_int(log.block_number)?], |r| r.get::<_, i64>(0))
                                .optional()?,
                        };
                        match time {
                            Some(time) => Some((t, time)),
                            None => {
                                warn!(
                                    block = log.block_number,
                                    tx = %log.transaction_hash,
                                    "transfer without block time, skipping"
                                );
                                summary.skipped += 1;
                                continue;
                            }
                        }
                    }
                    _ => None,
                };

                let topic = |i: usize| log.topics.get(i).map(|t| t.to_lowercase());
                let changed = insert_log.execute(params![
                    normalize_address(&log.address),
                    topic(0),
                    topic(1),
                    topic(2),
                    topic(3),
                    log.data.to_lowercase(),
                    sql_int(log.block_number)?,
                    log.transaction_hash,
                    sql_int(log.transaction_index)?,
                    sql_int(log.log_index)?,
                ])?;
                if changed == 0 {
                    summary.duplicates += 1;
                    continue;
                }
                summary.inserted += 1;

                if let Some((t, time)) = transfer {
                    insert_transfer.execute(params![
                        t.transaction_hash,
                        sql_int(t.log_index)?,
                        sql_int(t.block_number)?,
                        time,
                        t.from_address,
                        t.to_address,
                        t.amount.to_string(),
                    ])?;
                    summary.transfers += 1;
                }
            }
        }
        tx.commit()?;
        debug!(
            inserted = summary.inserted,
            transfers = summary.transfers,
            skipped = summary.skipped,
            "imported logs"
        );
        Ok(summary)
    }

    pub fn import_transactions(
        &mut self,
        transactions: &[TransactionRecord],
    ) -> Result<ImportSummary, StoreError> {
        let tx = self.conn.transaction()?;
        let mut summary = ImportSummary::default();
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO transactions (hash, block_number, from_address, \
                 to_address, value, internal_transactions) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in transactions {
                let internal: Vec<_> = record
                    .internal_transactions
                    .iter()
                    .map(|i| super::InternalTransaction {
                        to: normalize_address(&i.to),
                        value: i.value.clone(),
                    })
                    .collect();
                stmt.execute(params![
                    record.hash,
                    sql_int(record.block_number)?,
                    normalize_address(&record.from_address),
                    record.to_address.as_deref().map(normalize_address),
                    record.value,
                    serde_json::to_string(&internal)?,
                ])?;
                summary.inserted += 1;
            }
        }
        tx.commit()?;
        debug!(inserted = summary.inserted, "imported transactions");
        Ok(summary)
    }

    fn query_transfers(
        &self,
        columns: &str,
        scope: &AccountScope,
        window: Option<TimeWindow>,
        tail: &str,
    ) -> Result<(rusqlite::Statement<'_>, Vec<Value>), StoreError> {
        let mut sql = format!("SELECT {} FROM transfers WHERE 1 = 1", columns);
        let mut args = Vec::new();
        if let AccountScope::Account(account) = scope {
            sql.push_str(" AND (from_address = ? OR to_address = ?)");
            args.push(Value::Text(account.clone()));
            args.push(Value::Text(account.clone()));
        }
        if let Some(w) = window {
            sql.push_str(" AND block_time >= ? AND block_time < ?");
            args.push(Value::Integer(w.start.unix_timestamp()));
            args.push(Value::Integer(w.end.unix_timestamp()));
        }
        sql.push(' ');
        sql.push_str(tail);
        Ok((self.conn.prepare(&sql)?, args))
    }
}

impl LedgerStore for SqliteLedger {
    fn rebase_logs(
        &self,
        token: &str,
        range: Option<BlockRange>,
    ) -> Result<Vec<RawLog>, StoreError> {
        let mut filter = String::from("address = ? AND topic_0 IN (?, ?)");
        let mut args = vec![
            Value::Text(normalize_address(token)),
            Value::Text(TOTAL_SUPPLY_UPDATED_TOPIC.to_string()),
            Value::Text(TOTAL_SUPPLY_UPDATED_HIGHRES_TOPIC.to_string()),
        ];
        if let Some(r) = range {
            filter.push_str(" AND block_number >= ? AND block_number < ?");
            args.push(Value::Integer(sql_int(r.start)?));
            args.push(Value::Integer(sql_int(r.end)?));
        }
        let sql = format!(
            "SELECT {} FROM logs l LEFT JOIN blocks b ON b.block_number = l.block_number \
             WHERE l.id IN (SELECT MIN(id) FROM logs WHERE {} GROUP BY topic_0, transaction_hash) \
             ORDER BY l.block_number DESC, l.log_index DESC",
            LOG_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), raw_log_row)?;
        rows.map(|r| r?.into_log()).collect()
    }

    fn events_for_account(
        &self,
        scope: &AccountScope,
        window: Option<TimeWindow>,
    ) -> Result<Vec<TransferEvent>, StoreError> {
        let (mut stmt, args) = self.query_transfers(
            "transaction_hash, log_index, block_number, block_time, from_address, to_address, amount",
            scope,
            window,
            "ORDER BY block_number, log_index",
        )?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok(TransferRow {
                transaction_hash: r.get(0)?,
                log_index: r.get(1)?,
                block_number: r.get(2)?,
                block_time: r.get(3)?,
                from_address: r.get(4)?,
                to_address: r.get(5)?,
                amount: r.get(6)?,
            })
        })?;
        rows.map(|r| r?.into_event(scope)).collect()
    }

    fn all_transfer_addresses(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT from_address FROM transfers UNION SELECT to_address FROM transfers",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn block_times(&self, blocks: &[u64]) -> Result<BTreeMap<u64, OffsetDateTime>, StoreError> {
        let mut out = BTreeMap::new();
        for chunk in blocks.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT block_number, block_time FROM blocks WHERE block_number IN ({})",
                placeholders
            );
            let args = chunk
                .iter()
                .map(|b| sql_int(*b).map(Value::Integer))
                .collect::<Result<Vec<_>, _>>()?;
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (block, ts) = row?;
                out.insert(from_sql_int(block)?, from_timestamp(ts)?);
            }
        }
        Ok(out)
    }

    fn block_number_at(
        &self,
        time: OffsetDateTime,
        direction: TimeDirection,
    ) -> Result<Option<u64>, StoreError> {
        let sql = match direction {
            TimeDirection::AtOrAfter => {
                "SELECT block_number FROM blocks WHERE block_time >= ?1 \
                 ORDER BY block_time ASC, block_number ASC LIMIT 1"
            }
            TimeDirection::AtOrBefore => {
                "SELECT block_number FROM blocks WHERE block_time <= ?1 \
                 ORDER BY block_time DESC, block_number DESC LIMIT 1"
            }
        };
        let block = self
            .conn
            .query_row(sql, [time.unix_timestamp()], |r| r.get::<_, i64>(0))
            .optional()?;
        block.map(from_sql_int).transpose()
    }

    fn transactions(
        &self,
        scope: &AccountScope,
        blocks: Option<BlockRange>,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT hash, block_number, from_address, to_address, value, internal_transactions \
             FROM transactions WHERE 1 = 1",
        );
        let mut args = Vec::new();
        if let AccountScope::Account(account) = scope {
            sql.push_str(" AND (from_address = ? OR to_address = ?)");
            args.push(Value::Text(account.clone()));
            args.push(Value::Text(account.clone()));
        }
        if let Some(r) = blocks {
            sql.push_str(" AND block_number >= ? AND block_number < ?");
            args.push(Value::Integer(sql_int(r.start)?));
            args.push(Value::Integer(sql_int(r.end)?));
        }
        sql.push_str(" ORDER BY block_number, hash");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), transaction_row)?;
        rows.map(|r| r?.into_record()).collect()
    }

    fn transfer_transaction_hashes(
        &self,
        scope: &AccountScope,
        window: Option<TimeWindow>,
    ) -> Result<Vec<String>, StoreError> {
        let (mut stmt, args) = self.query_transfers(
            "transaction_hash",
            scope,
            window,
            "GROUP BY transaction_hash ORDER BY MIN(block_number), MIN(log_index)",
        )?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT hash, block_number, from_address, to_address, value, \
                 internal_transactions FROM transactions WHERE hash = ?1",
                [hash],
                transaction_row,
            )
            .optional()?;
        row.map(TransactionRow::into_record).transpose()
    }

    fn logs_for_transaction(&self, hash: &str) -> Result<Vec<RawLog>, StoreError> {
        let sql = format!(
            "SELECT {} FROM logs l LEFT JOIN blocks b ON b.block_number = l.block_number \
             WHERE l.transaction_hash = ?1 ORDER BY l.log_index",
            LOG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([hash], raw_log_row)?;
        rows.map(|r| r?.into_log()).collect()
    }
}

/// Opens one `SqliteLedger` per call against the same database file.
#[derive(Clone, Debug)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerConnector for SqliteConnector {
    type Store = SqliteLedger;

    fn connect(&self) -> Result<SqliteLedger, StoreError> {
        SqliteLedger::open(&self.path)
    }
}

fn sql_int(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Corrupt(format!("integer out of range: {}", v)))
}

fn from_sql_int(v: i64) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative integer: {}", v)))
}

fn from_timestamp(ts: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| StoreError::Corrupt(format!("timestamp {}: {}", ts, e)))
}

struct RawLogRow {
    address: String,
    topics: [Option<String>; 4],
    data: String,
    block_number: i64,
    transaction_hash: String,
    transaction_index: i64,
    log_index: i64,
    block_time: Option<i64>,
}

fn raw_log_row(r: &Row<'_>) -> rusqlite::Result<RawLogRow> {
    Ok(RawLogRow {
        address: r.get(0)?,
        topics: [r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?],
        data: r.get(5)?,
        block_number: r.get(6)?,
        transaction_hash: r.get(7)?,
        transaction_index: r.get(8)?,
        log_index: r.get(9)?,
        block_time: r.get(10)?,
    })
}

impl RawLogRow {
    fn into_log(self) -> Result<RawLog, StoreError> {
        Ok(RawLog {
            address: self.address,
            topics: self.topics.into_iter().flatten().collect(),
            data: self.data,
            block_number: from_sql_int(self.block_number)?,
            transaction_hash: self.transaction_hash,
            transaction_index: from_sql_int(self.transaction_index)?,
            log_index: from_sql_int(self.log_index)?,
            block_time: self.block_time.map(from_timestamp).transpose()?,
        })
    }
}

struct TransferRow {
    transaction_hash: String,
    log_index: i64,
    block_number: i64,
    block_time: i64,
    from_address: String,
    to_address: String,
    amount: String,
}

impl TransferRow {
    fn into_event(self, scope: &AccountScope) -> Result<TransferEvent, StoreError> {
        let value = Decimal::from_str(&self.amount)
            .map_err(|e| StoreError::Corrupt(format!("amount {}: {}", self.amount, e)))?;
        let amount = match scope {
            AccountScope::Account(a) if *a != self.to_address => -value,
            _ => value,
        };
        Ok(TransferEvent {
            block_number: from_sql_int(self.block_number)?,
            transaction_hash: self.transaction_hash,
            amount,
            from_address: self.from_address,
            to_address: self.to_address,
            block_time: Some(from_timestamp(self.block_time)?),
            log_index: from_sql_int(self.log_index)?,
        })
    }
}

struct TransactionRow {
    hash: String,
    block_number: i64,
    from_address: String,
    to_address: Option<String>,
    value: String,
    internal_transactions: String,
}

fn transaction_row(r: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        hash: r.get(0)?,
        block_number: r.get(1)?,
        from_address: r.get(2)?,
        to_address: r.get(3)?,
        value: r.get(4)?,
        internal_transactions: r.get(5)?,
    })
}

impl TransactionRow {
    fn into_record(self) -> Result<TransactionRecord, StoreError> {
        Ok(TransactionRecord {
            hash: self.hash,
            block_number: from_sql_int(self.block_number)?,
            from_address: self.from_address,
            to_address: self.to_address,
            value: self.value,
            internal_transactions: serde_json::from_str(&self.internal_transactions)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi::address_to_topic;
    use crate::ousd::classify::TRANSFER_TOPIC;
    use crate::ousd::protocol_config::OUSD_ADDRESS;
    use crate::store::{block_number_for_time, InternalTransaction};
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;
    use time::macros::datetime;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    fn transfer_log(block: u64, hash: &str, from: &str, to: &str, value: u128) -> RawLog {
        RawLog {
            address: OUSD_ADDRESS.to_string(),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                address_to_topic(from),
                address_to_topic(to),
            ],
            data: format!("0x{:064x}", value),
            block_number: block,
            transaction_hash: hash.to_string(),
            transaction_index: 0,
            log_index: 1,
            block_time: None,
        }
    }

    fn rebase_log(block: u64, hash: &str, log_index: u64) -> RawLog {
        RawLog {
            address: OUSD_ADDRESS.to_string(),
            topics: vec![TOTAL_SUPPLY_UPDATED_TOPIC.to_string()],
            data: format!("0x{:064x}{:064x}{:064x}", 0, 0, 2 * 10u128.pow(18)),
            block_number: block,
            transaction_hash: hash.to_string(),
            transaction_index: 0,
            log_index,
            block_time: None,
        }
    }

    fn seeded() -> (NamedTempFile, SqliteLedger) {
        let tmp = NamedTempFile::new().unwrap();
        let mut ledger = SqliteLedger::open(tmp.path()).unwrap();
        ledger
            .import_blocks(&[
                BlockRecord {
                    block_number: 100,
                    block_time: datetime!(2021-04-01 00:00 UTC),
                },
                BlockRecord {
                    block_number: 150,
                    block_time: datetime!(2021-04-06 00:00 UTC),
                },
                BlockRecord {
                    block_number: 200,
                    block_time: datetime!(2021-04-10 00:00 UTC),
                },
            ])
            .unwrap();
        ledger
            .import_logs(
                &[
                    rebase_log(100, "0xr1", 0),
                    rebase_log(100, "0xr1", 1),
                    transfer_log(150, "0xt1", ALICE, BOB, 10u128.pow(19)),
                    transfer_log(200, "0xt2", BOB, ALICE, 10u128.pow(18)),
                ],
                OUSD_ADDRESS,
            )
            .unwrap();
        (tmp, ledger)
    }

    #[test]
    fn import_counts_and_dedupes() {
        let (_tmp, mut ledger) = seeded();
        let again = ledger
            .import_logs(
                &[transfer_log(150, "0xt1", ALICE, BOB, 10u128.pow(19))],
                OUSD_ADDRESS,
            )
            .unwrap();
        assert_eq!(again.duplicates, 1);
        assert_eq!(again.inserted, 0);
    }

    #[test]
    fn import_skips_malformed_and_timeless() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let mut bad = transfer_log(150, "0xbad", ALICE, BOB, 1);
        bad.topics[1] = "0x1234".into();
        let timeless = transfer_log(999, "0xlate", ALICE, BOB, 1);
        let summary = ledger.import_logs(&[bad, timeless], OUSD_ADDRESS).unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.inserted, 0);
        assert!(ledger.logs_for_transaction("0xbad").unwrap().is_empty());
    }

    #[test]
    fn rebase_logs_dedupe_per_transaction() {
        let (_tmp, ledger) = seeded();
        let logs = ledger.rebase_logs(OUSD_ADDRESS, None).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_index, 0);
        assert_eq!(logs[0].block_time, Some(datetime!(2021-04-01 00:00 UTC)));
        assert!(ledger
            .rebase_logs(OUSD_ADDRESS, Some(BlockRange::through(101, 300)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn transfers_signed_by_scope_and_windowed() {
        let (_tmp, ledger) = seeded();
        let alice = ledger
            .events_for_account(&AccountScope::account(ALICE), None)
            .unwrap();
        let amounts: Vec<_> = alice.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![dec!(-10), dec!(1)]);

        let window = TimeWindow::new(
            datetime!(2021-04-06 00:00 UTC),
            datetime!(2021-04-10 00:00 UTC),
        );
        let in_window = ledger
            .events_for_account(&AccountScope::account(BOB), Some(window))
            .unwrap();
        assert_eq!(in_window.len(), 1);
        assert_eq!(in_window[0].amount, dec!(10));

        let hashes = ledger
            .transfer_transaction_hashes(&AccountScope::All, None)
            .unwrap();
        assert_eq!(hashes, vec!["0xt1".to_string(), "0xt2".to_string()]);
    }

    #[test]
    fn addresses_and_block_lookup() {
        let (_tmp, ledger) = seeded();
        let mut addresses = ledger.all_transfer_addresses().unwrap();
        addresses.sort();
        assert_eq!(addresses, vec![ALICE.to_string(), BOB.to_string()]);

        let t = datetime!(2021-04-05 00:00 UTC);
        assert_eq!(
            block_number_for_time(&ledger, t, TimeDirection::AtOrAfter).unwrap(),
            150
        );
        assert_eq!(
            block_number_for_time(&ledger, t, TimeDirection::AtOrBefore).unwrap(),
            100
        );
        assert!(matches!(
            block_number_for_time(
                &ledger,
                datetime!(2022-01-01 00:00 UTC),
                TimeDirection::AtOrAfter
            ),
            Err(StoreError::MissingTimeBoundary { .. })
        ));
        let times = ledger.block_times(&[100, 7]).unwrap();
        assert_eq!(times.len(), 1);
    }

    #[test]
    fn transactions_roundtrip_and_scope() {
        let (_tmp, mut ledger) = seeded();
        ledger
            .import_transactions(&[TransactionRecord {
                hash: "0xt1".into(),
                block_number: 150,
                from_address: "0x1111111111111111111111111111111111111111".into(),
                to_address: Some("0x7A250D5630B4CF539739DF2C5DACB4C659F2488D".into()),
                value: "0x0".into(),
                internal_transactions: vec![InternalTransaction {
                    to: ALICE.into(),
                    value: "0x10".into(),
                }],
            }])
            .unwrap();
        let tx = ledger.transaction("0xt1").unwrap().unwrap();
        assert_eq!(
            tx.to_address.as_deref(),
            Some("0x7a250d5630b4cf539739df2c5dacb4c659f2488d")
        );
        assert_eq!(tx.internal_transactions.len(), 1);

        let scoped = ledger
            .transactions(&AccountScope::account(ALICE), Some(BlockRange::new(100, 150)))
            .unwrap();
        assert!(scoped.is_empty());
        let scoped = ledger
            .transactions(&AccountScope::account(ALICE), Some(BlockRange::new(100, 151)))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(ledger.logs_for_transaction("0xt1").unwrap().len(), 1);
    }

    #[test]
    fn connector_opens_same_file() {
        let (tmp, _ledger) = seeded();
        let connector = SqliteConnector::new(tmp.path());
        let other = connector.connect().unwrap();
        assert_eq!(other.all_transfer_addresses().unwrap().len(), 2);
    }
}
