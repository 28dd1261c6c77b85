//! Ordered key-value stores holding [`DatumGroup`] records, and a cursor over them.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: an in-memory ordered map, for tests and small datasets.
//! - [`SqliteStore`]: a single-table SQLite database, opened read-only for feeding.
//!
//! Keys are visited in ascending byte order. Writers usually zero-pad numeric keys
//! (`00000042`) so that this matches insertion order.

use crate::error::FeedError;
use crate::source::{DatumGroup, SourceCursor};
use anyhow::{bail, Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

pub trait KeyValueStore: Send {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The first record whose key sorts strictly after `after`, or the first record
    /// of the store when `after` is `None`.
    fn seek(&self, after: Option<&str>) -> Result<Option<(String, Vec<u8>)>>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).cloned())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn seek(&self, after: Option<&str>) -> Result<Option<(String, Vec<u8>)>> {
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(self
            .records
            .range::<str, _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}

// ============================================================================
// SqliteStore
// ============================================================================

/// Records kept in one `records(key TEXT PRIMARY KEY, value BLOB)` table.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a writable store.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );",
        )
        .with_context(|| format!("Failed to initialise schema in {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Opens an existing store for feeding. Writes through this handle fail.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .and_then(|conn| {
                // Opening is lazy; touch the table so bad files fail here.
                conn.query_row("SELECT 1 FROM records LIMIT 1", [], |_| Ok(()))
                    .optional()?;
                Ok(conn)
            })
            .map_err(|e| {
                FeedError::Config(format!("cannot open store {}: {}", path.display(), e))
            })?;
        Ok(Self { conn })
    }

    /// Inserts many records in one transaction.
    pub fn put_batch<'a, I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let tx = self.conn.transaction().context("Failed to start transaction")?;
        let mut written = 0;
        {
            let mut stmt = tx
                .prepare("INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)")
                .context("Failed to prepare insert")?;
            for (key, value) in records {
                stmt.execute(params![key, value])
                    .with_context(|| format!("Failed to insert record '{}'", key))?;
                written += 1;
            }
        }
        tx.commit().context("Failed to commit records")?;
        Ok(written)
    }
}

impl KeyValueStore for SqliteStore {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .with_context(|| format!("Failed to insert record '{}'", key))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("Failed to read record '{}'", key))
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .context("Failed to count records")?;
        Ok(count as usize)
    }

    fn seek(&self, after: Option<&str>) -> Result<Option<(String, Vec<u8>)>> {
        let row = match after {
            Some(key) => self
                .conn
                .query_row(
                    "SELECT key, value FROM records WHERE key > ?1 ORDER BY key LIMIT 1",
                    params![key],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional(),
            None => self
                .conn
                .query_row(
                    "SELECT key, value FROM records ORDER BY key LIMIT 1",
                    [],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional(),
        };
        row.context("Failed to position store cursor")
    }
}

// ============================================================================
// StoreCursor
// ============================================================================

/// The record under a [`StoreCursor`], already deserialized.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub key: String,
    pub group: DatumGroup,
}

/// Ordered cursor over a [`KeyValueStore`] with random initial skip and random step.
///
/// - `rand_skip > 0`: at construction the cursor skips a uniform `[0, rand_skip)`
///   records, stopping at the last record so a sample is always available.
/// - `rand_step > 1`: [`StoreCursor::next_step`] draws the distance to the next item
///   uniformly from `[1, rand_step]`.
pub struct StoreCursor {
    store: Box<dyn KeyValueStore>,
    current: Option<StoreRecord>,
    rand_step: usize,
    rng: StdRng,
}

impl StoreCursor {
    pub fn new(
        store: Box<dyn KeyValueStore>,
        rand_skip: usize,
        rand_step: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut cursor = Self {
            store,
            current: None,
            rand_step,
            rng: StdRng::seed_from_u64(seed),
        };
        cursor.reset()?;
        if cursor.current.is_none() {
            bail!(FeedError::ExhaustedSource("store holds no records".into()));
        }

        if rand_skip > 0 {
            let skip = cursor.rng.random_range(0..rand_skip);
            info!("Skipping first {} data points", skip);
            for _ in 0..skip {
                let Some(record) = &cursor.current else { break };
                match cursor.store.seek(Some(&record.key))? {
                    Some(next) => cursor.load(next)?,
                    None => break,
                }
            }
        }
        Ok(cursor)
    }

    /// Distance to the next item: 1, or uniform in `[1, rand_step]`.
    pub fn next_step(&mut self) -> usize {
        if self.rand_step > 1 {
            self.rng.random_range(1..=self.rand_step)
        } else {
            1
        }
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    fn load(&mut self, (key, value): (String, Vec<u8>)) -> Result<()> {
        let group = DatumGroup::from_bytes(&value, &key)?;
        self.current = Some(StoreRecord { key, group });
        Ok(())
    }
}

impl SourceCursor for StoreCursor {
    type Item = StoreRecord;

    fn current(&self) -> Result<&StoreRecord> {
        self.current.as_ref().ok_or_else(|| {
            FeedError::ExhaustedSource("store cursor is past the last record".into()).into()
        })
    }

    fn advance(&mut self, step: usize) -> Result<()> {
        let mut key = match &self.current {
            Some(record) => record.key.clone(),
            None => bail!(FeedError::ExhaustedSource(
                "cannot advance past the last record".into()
            )),
        };
        let mut landed = None;
        for _ in 0..step.max(1) {
            match self.store.seek(Some(&key))? {
                Some(next) => {
                    key = next.0.clone();
                    landed = Some(next);
                }
                None => {
                    landed = None;
                    break;
                }
            }
        }
        match landed {
            Some(record) => self.load(record),
            None => {
                self.current = None;
                Ok(())
            }
        }
    }

    fn at_end(&self) -> bool {
        self.current.is_none()
    }

    fn reset(&mut self) -> Result<()> {
        debug!("Store cursor seeking to the first record");
        match self.store.seek(None)? {
            Some(first) => self.load(first),
            None => {
                self.current = None;
                Ok(())
            }
        }
    }
}
