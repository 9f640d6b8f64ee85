//! Duplicate guard: durable record of every bill already discovered.
//!
//! `seen_bills` is append-only. The UNIQUE constraint on
//! `(congress, chamber_type, number)` is what makes [`SeenStore::check_and_mark_seen`]
//! atomic across tasks and processes sharing the same database file.
//! `bill_log` keeps the details of licensed bills and the post id once published.
//! `range_cursor` remembers how far number probing has settled per chamber.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::bill::{BillKey, BillRecord, ChamberType};
use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS seen_bills (
        congress      INTEGER NOT NULL,
        chamber_type  TEXT    NOT NULL,
        number        INTEGER NOT NULL,
        first_seen_at TEXT    NOT NULL,
        UNIQUE (congress, chamber_type, number)
    )",
    "CREATE TABLE IF NOT EXISTS bill_log (
        congress        INTEGER NOT NULL,
        chamber_type    TEXT    NOT NULL,
        number          INTEGER NOT NULL,
        title           TEXT    NOT NULL,
        sponsor         TEXT    NOT NULL,
        introduced_date TEXT,
        url             TEXT    NOT NULL,
        logged_at       TEXT    NOT NULL,
        post_id         TEXT,
        PRIMARY KEY (congress, chamber_type, number)
    )",
    "CREATE TABLE IF NOT EXISTS range_cursor (
        congress         INTEGER NOT NULL,
        chamber_type     TEXT    NOT NULL,
        resolved_through INTEGER NOT NULL,
        updated_at       TEXT    NOT NULL,
        PRIMARY KEY (congress, chamber_type)
    )",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub key: BillKey,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillLogEntry {
    pub key: BillKey,
    pub title: String,
    pub sponsor: String,
    pub introduced_date: Option<NaiveDate>,
    pub url: String,
    pub logged_at: DateTime<Utc>,
    pub post_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct LogRow {
    congress: i64,
    chamber_type: String,
    number: i64,
    title: String,
    sponsor: String,
    introduced_date: Option<NaiveDate>,
    url: String,
    logged_at: DateTime<Utc>,
    post_id: Option<String>,
}

fn row_key(congress: i64, chamber_type: &str, number: i64) -> Result<BillKey, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        key: format!("{chamber_type}.{number}/{congress}"),
        message,
    };
    let congress = u32::try_from(congress).map_err(|e| corrupt(e.to_string()))?;
    let number = u32::try_from(number).map_err(|e| corrupt(e.to_string()))?;
    BillKey::new(congress, ChamberType::parse(chamber_type), number)
        .map_err(|e| corrupt(e.to_string()))
}

#[derive(Clone, Debug)]
pub struct SeenStore {
    pool: SqlitePool,
}

impl SeenStore {
    /// Opens (creating if needed) the database file in WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection so every query sees the same data.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub async fn exists(&self, key: &BillKey) -> Result<bool, StoreError> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM seen_bills WHERE congress = ?1 AND chamber_type = ?2 AND number = ?3",
        )
        .bind(i64::from(key.congress()))
        .bind(key.chamber_type().code())
        .bind(i64::from(key.number()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    /// Inserts a `SeenRecord` unless one exists. `true` is an exclusive licence to
    /// post and log the bill; `false` means another caller already holds it.
    pub async fn check_and_mark_seen(&self, key: &BillKey) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "INSERT INTO seen_bills (congress, chamber_type, number, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (congress, chamber_type, number) DO NOTHING",
        )
        .bind(i64::from(key.congress()))
        .bind(key.chamber_type().code())
        .bind(i64::from(key.number()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn seen_record(&self, key: &BillKey) -> Result<Option<SeenRecord>, StoreError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT first_seen_at FROM seen_bills
             WHERE congress = ?1 AND chamber_type = ?2 AND number = ?3",
        )
        .bind(i64::from(key.congress()))
        .bind(key.chamber_type().code())
        .bind(i64::from(key.number()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(first_seen_at,)| SeenRecord {
            key: key.clone(),
            first_seen_at,
        }))
    }

    pub async fn count_seen(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_bills")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    /// Highest bill number recorded for one congress and chamber type.
    pub async fn high_water_mark(
        &self,
        congress: u32,
        chamber: &ChamberType,
    ) -> Result<Option<u32>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(number) FROM seen_bills WHERE congress = ?1 AND chamber_type = ?2",
        )
        .bind(i64::from(congress))
        .bind(chamber.code())
        .fetch_one(&self.pool)
        .await?;
        Ok(max.and_then(|n| u32::try_from(n).ok()))
    }

    /// Number up to which range probing has settled every bill, if probing ever ran.
    pub async fn range_cursor(
        &self,
        congress: u32,
        chamber: &ChamberType,
    ) -> Result<Option<u32>, StoreError> {
        let through: Option<i64> = sqlx::query_scalar(
            "SELECT resolved_through FROM range_cursor WHERE congress = ?1 AND chamber_type = ?2",
        )
        .bind(i64::from(congress))
        .bind(chamber.code())
        .fetch_optional(&self.pool)
        .await?;
        through
            .map(|n| {
                u32::try_from(n).map_err(|e| StoreError::Corrupt {
                    key: format!("{chamber}/{congress}"),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Moves the range cursor forward to `through`. Never moves it back.
    pub async fn advance_range_cursor(
        &self,
        congress: u32,
        chamber: &ChamberType,
        through: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO range_cursor (congress, chamber_type, resolved_through, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (congress, chamber_type) DO UPDATE SET
               resolved_through = MAX(resolved_through, excluded.resolved_through),
               updated_at = excluded.updated_at",
        )
        .bind(i64::from(congress))
        .bind(chamber.code())
        .bind(i64::from(through))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records the details of a licensed bill. Returns `false` if it was already logged.
    pub async fn log_bill(&self, record: &BillRecord) -> Result<bool, StoreError> {
        let key = &record.key;
        let res = sqlx::query(
            "INSERT INTO bill_log
               (congress, chamber_type, number, title, sponsor, introduced_date, url, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (congress, chamber_type, number) DO NOTHING",
        )
        .bind(i64::from(key.congress()))
        .bind(key.chamber_type().code())
        .bind(i64::from(key.number()))
        .bind(&record.title)
        .bind(record.sponsor_display())
        .bind(record.introduced_date)
        .bind(key.url())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Sets the post id once; later calls for the same bill are no-ops.
    pub async fn mark_posted(&self, key: &BillKey, post_id: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE bill_log SET post_id = ?4
             WHERE congress = ?1 AND chamber_type = ?2 AND number = ?3 AND post_id IS NULL",
        )
        .bind(i64::from(key.congress()))
        .bind(key.chamber_type().code())
        .bind(i64::from(key.number()))
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Logged bills that never got a post id, oldest first.
    pub async fn unposted(&self, limit: u32) -> Result<Vec<BillLogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT congress, chamber_type, number, title, sponsor, introduced_date, url,
                    logged_at, post_id
             FROM bill_log WHERE post_id IS NULL
             ORDER BY logged_at ASC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(BillLogEntry {
                    key: row_key(r.congress, &r.chamber_type, r.number)?,
                    title: r.title,
                    sponsor: r.sponsor,
                    introduced_date: r.introduced_date,
                    url: r.url,
                    logged_at: r.logged_at,
                    post_id: r.post_id,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> BillKey {
        BillKey::new(119, ChamberType::HR, n).unwrap()
    }

    #[tokio::test]
    async fn mark_seen_twice_is_true_then_false() {
        let store = SeenStore::in_memory().await.unwrap();
        assert!(!store.exists(&key(42)).await.unwrap());
        assert!(store.check_and_mark_seen(&key(42)).await.unwrap());
        assert!(!store.check_and_mark_seen(&key(42)).await.unwrap());
        assert!(store.exists(&key(42)).await.unwrap());
        assert_eq!(store.count_seen().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn seen_record_keeps_first_timestamp() {
        let store = SeenStore::in_memory().await.unwrap();
        store.check_and_mark_seen(&key(7)).await.unwrap();
        let first = store.seen_record(&key(7)).await.unwrap().unwrap();
        store.check_and_mark_seen(&key(7)).await.unwrap();
        let again = store.seen_record(&key(7)).await.unwrap().unwrap();
        assert_eq!(first, again);
        assert!(store.seen_record(&key(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn range_cursor_only_moves_forward() {
        let store = SeenStore::in_memory().await.unwrap();
        assert_eq!(store.range_cursor(119, &ChamberType::HR).await.unwrap(), None);
        store.advance_range_cursor(119, &ChamberType::HR, 0).await.unwrap();
        assert_eq!(store.range_cursor(119, &ChamberType::HR).await.unwrap(), Some(0));
        store.advance_range_cursor(119, &ChamberType::HR, 12).await.unwrap();
        store.advance_range_cursor(119, &ChamberType::HR, 5).await.unwrap();
        assert_eq!(store.range_cursor(119, &ChamberType::HR).await.unwrap(), Some(12));
        assert_eq!(store.range_cursor(119, &ChamberType::S).await.unwrap(), None);
        assert_eq!(store.range_cursor(118, &ChamberType::HR).await.unwrap(), None);
    }

    #[tokio::test]
    async fn high_water_mark_is_per_congress_and_chamber() {
        let store = SeenStore::in_memory().await.unwrap();
        assert_eq!(
            store.high_water_mark(119, &ChamberType::HR).await.unwrap(),
            None
        );
        for n in [3, 90, 12] {
            store.check_and_mark_seen(&key(n)).await.unwrap();
        }
        let s5 = BillKey::new(119, ChamberType::S, 500).unwrap();
        let old = BillKey::new(118, ChamberType::HR, 9000).unwrap();
        store.check_and_mark_seen(&s5).await.unwrap();
        store.check_and_mark_seen(&old).await.unwrap();
        assert_eq!(
            store.high_water_mark(119, &ChamberType::HR).await.unwrap(),
            Some(90)
        );
        assert_eq!(
            store.high_water_mark(119, &ChamberType::S).await.unwrap(),
            Some(500)
        );
    }
}
