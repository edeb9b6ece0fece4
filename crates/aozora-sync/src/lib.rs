//! Sync pipeline orchestration: watermark selection, entity aggregation and
//! idempotent batch upserts for the catalog, plus the roster refresh.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aozora_adapters::{
    decode_catalog_row, decode_roster_row, parse_timestamp, CatalogArchiveSource, DecodeError,
    DecodedRow, FeedContext, FeedLocation, FeedSource, RawRosterRow, RawRow, RosterPageSource,
    CATALOG_ARCHIVE_URL, ROSTER_PAGE_URL,
};
use aozora_core::{Book, Person, CATALOG_COLUMNS, RELEASE_DATE_COLUMN};
use aozora_storage::{
    Collection, DocumentStore, HttpClientConfig, HttpFetcher, PgDocumentStore, PgStoreConfig,
    UpsertOp,
};

pub use aozora_storage::{BulkWriteReport, WriteFailure};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "aozora-sync";

/// Everything a run needs, built once at the process boundary.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub write_concurrency: usize,
    pub catalog: FeedLocation,
    pub roster: FeedLocation,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let store = PgStoreConfig::default();
        Self {
            database_url: store.database_url,
            max_connections: store.max_connections,
            write_concurrency: store.write_concurrency,
            catalog: FeedLocation::Remote(CATALOG_ARCHIVE_URL.to_string()),
            roster: FeedLocation::Remote(ROSTER_PAGE_URL.to_string()),
            user_agent: "aozora-sync/0.1".to_string(),
            http_timeout_secs: 60,
        }
    }
}

impl SyncConfig {
    pub fn store_config(&self) -> PgStoreConfig {
        PgStoreConfig {
            database_url: self.database_url.clone(),
            max_connections: self.max_connections,
            write_concurrency: self.write_concurrency,
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn with_catalog_archive(mut self, path: PathBuf) -> Self {
        self.catalog = FeedLocation::Local(path);
        self
    }

    pub fn with_roster_page(mut self, path: PathBuf) -> Self {
        self.roster = FeedLocation::Local(path);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncMode {
    Incremental,
    FullRefresh,
}

/// Which catalog rows a run should process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Everything,
    NewerThan(DateTime<Utc>),
}

/// Watermark used when the store holds no books yet.
pub fn epoch_watermark() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

pub async fn resolve_selection(store: &dyn DocumentStore, mode: SyncMode) -> Result<Selection> {
    match mode {
        SyncMode::FullRefresh => Ok(Selection::Everything),
        SyncMode::Incremental => {
            let latest = store
                .latest_release_date()
                .await
                .context("reading release_date watermark")?;
            Ok(Selection::NewerThan(latest.unwrap_or_else(epoch_watermark)))
        }
    }
}

/// Keeps rows whose `release_date` is strictly newer than the watermark.
/// Rows without a release date can never be newer and are dropped.
pub fn select_rows(rows: Vec<RawRow>, selection: Selection) -> Result<Vec<RawRow>, DecodeError> {
    let watermark = match selection {
        Selection::Everything => return Ok(rows),
        Selection::NewerThan(watermark) => watermark,
    };

    let mut selected = Vec::new();
    for row in rows {
        let Some(raw) = row.get(RELEASE_DATE_COLUMN) else {
            return Err(DecodeError::RowShape {
                expected: CATALOG_COLUMNS.len(),
                actual: row.len(),
            });
        };
        if raw.is_empty() {
            continue;
        }
        if parse_timestamp("release_date", raw)? > watermark {
            selected.push(row);
        }
    }
    Ok(selected)
}

/// Decodes rows in input order; the first malformed row fails the run.
pub fn decode_rows(rows: &[RawRow]) -> Result<Vec<DecodedRow>> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            decode_catalog_row(row).with_context(|| {
                format!(
                    "decoding catalog row {} (book_id {:?})",
                    index + 1,
                    row.first().map(String::as_str).unwrap_or_default()
                )
            })
        })
        .collect()
}

/// Deduplicated entities of one sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityBatch {
    pub books: BTreeMap<i64, Book>,
    pub persons: BTreeMap<i64, Person>,
}

/// Folds decoded rows into books and persons. The first fragment per id wins;
/// role edges are appended in row order and are not deduplicated.
pub fn aggregate(rows: impl IntoIterator<Item = DecodedRow>) -> EntityBatch {
    let mut batch = EntityBatch::default();
    for DecodedRow { book, person, role } in rows {
        let book_id = book.book_id;
        let entry = batch.books.entry(book_id).or_insert(book);
        if let Some(role) = role {
            entry.role_list_mut(role).push(person.reference());
        }
        batch.persons.entry(person.person_id).or_insert(person);
    }
    batch
}

fn to_document<T: Serialize>(entity: &T) -> Result<aozora_storage::Document> {
    match serde_json::to_value(entity).context("serializing entity")? {
        JsonValue::Object(map) => Ok(map),
        other => bail!("entity serialized to {other} instead of an object"),
    }
}

/// Commits keyed entities as one unordered batch of upserts per collection.
pub struct BatchUpsertEngine<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> BatchUpsertEngine<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub async fn commit<T: Serialize>(
        &self,
        collection: Collection,
        entries: impl IntoIterator<Item = (i64, T)>,
    ) -> Result<BulkWriteReport> {
        let ops = entries
            .into_iter()
            .map(|(key, entity)| -> Result<UpsertOp> {
                Ok(UpsertOp {
                    key,
                    document: to_document(&entity)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if ops.is_empty() {
            return Ok(BulkWriteReport::default());
        }

        let report = self
            .store
            .bulk_upsert(collection, ops)
            .await
            .with_context(|| format!("writing {} batch", collection.name()))?;

        for failure in &report.failures {
            warn!(
                collection = collection.name(),
                key = failure.key,
                error = %failure.message,
                "upsert rejected"
            );
        }
        info!(
            collection = collection.name(),
            attempted = report.attempted,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failures.len(),
            "batch committed"
        );

        Ok(report)
    }

    /// Books and persons are written concurrently; one failing does not undo the other.
    pub async fn commit_entities(
        &self,
        batch: EntityBatch,
    ) -> Result<(BulkWriteReport, BulkWriteReport)> {
        let (books, persons) = tokio::join!(
            self.commit(Collection::Books, batch.books),
            self.commit(Collection::Persons, batch.persons),
        );
        Ok((books?, persons?))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: SyncMode,
    pub watermark: Option<DateTime<Utc>>,
    pub fetched_rows: usize,
    pub selected_rows: usize,
    pub books: BulkWriteReport,
    pub persons: BulkWriteReport,
}

/// Runs selection, decoding, aggregation and the two collection batches over
/// already-fetched catalog rows.
pub async fn sync_catalog_rows(
    store: &dyn DocumentStore,
    rows: Vec<RawRow>,
    mode: SyncMode,
    run_id: Uuid,
) -> Result<CatalogRunSummary> {
    let started_at = Utc::now();
    let selection = resolve_selection(store, mode).await?;
    let watermark = match selection {
        Selection::Everything => None,
        Selection::NewerThan(ts) => Some(ts),
    };
    let fetched_rows = rows.len();
    let selected = select_rows(rows, selection).context("selecting rows past the watermark")?;
    info!(%run_id, fetched = fetched_rows, selected = selected.len(), "{} entries are updated", selected.len());

    let selected_rows = selected.len();
    let (books, persons) = if selected.is_empty() {
        (BulkWriteReport::default(), BulkWriteReport::default())
    } else {
        let batch = aggregate(decode_rows(&selected)?);
        BatchUpsertEngine::new(store).commit_entities(batch).await?
    };

    Ok(CatalogRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        mode,
        watermark,
        fetched_rows,
        selected_rows,
        books,
        persons,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scraped: usize,
    pub rejected: Vec<RejectedRecord>,
    pub workers: BulkWriteReport,
}

/// Full refresh of the roster collection. Records with an unparseable id are
/// rejected individually.
pub async fn sync_roster_rows(
    store: &dyn DocumentStore,
    rows: Vec<RawRosterRow>,
    run_id: Uuid,
) -> Result<RosterRunSummary> {
    let started_at = Utc::now();
    let scraped = rows.len();
    let mut records = Vec::with_capacity(scraped);
    let mut rejected = Vec::new();

    for row in rows {
        let id = row.id.clone();
        match decode_roster_row(row) {
            Ok(record) => records.push((record.id, record)),
            Err(err) => {
                warn!(%run_id, id = %id, error = %err, "roster record rejected");
                rejected.push(RejectedRecord {
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }
    info!(%run_id, scraped, accepted = records.len(), "updating {} roster entries", records.len());

    let workers = BatchUpsertEngine::new(store)
        .commit(Collection::Workers, records)
        .await?;

    Ok(RosterRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        scraped,
        rejected,
        workers,
    })
}

pub struct SyncPipeline {
    config: SyncConfig,
    http: HttpFetcher,
    store: Arc<dyn DocumentStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_config()).context("building http client")?;
        Ok(Self {
            config,
            http,
            store,
        })
    }

    pub async fn run_catalog(&self, mode: SyncMode) -> Result<CatalogRunSummary> {
        let run_id = Uuid::new_v4();
        let ctx = FeedContext { run_id };
        let source = CatalogArchiveSource::new(self.config.catalog.clone());
        let rows = source
            .load(&self.http, &ctx)
            .await
            .with_context(|| format!("loading catalog feed from {:?}", self.config.catalog))?;
        sync_catalog_rows(self.store.as_ref(), rows, mode, run_id).await
    }

    pub async fn run_roster(&self) -> Result<RosterRunSummary> {
        let run_id = Uuid::new_v4();
        let ctx = FeedContext { run_id };
        let source = RosterPageSource::new(self.config.roster.clone());
        let rows = source
            .load(&self.http, &ctx)
            .await
            .with_context(|| format!("loading roster page from {:?}", self.config.roster))?;
        sync_roster_rows(self.store.as_ref(), rows, run_id).await
    }
}

async fn connect_store(config: &SyncConfig) -> Result<PgDocumentStore> {
    let store = PgDocumentStore::connect(&config.store_config())
        .await
        .context("connecting to document store")?;
    store.migrate().await.context("applying store migrations")?;
    Ok(store)
}

pub async fn migrate(config: &SyncConfig) -> Result<()> {
    connect_store(config).await.map(|_| ())
}

pub async fn run_catalog_sync(config: SyncConfig, mode: SyncMode) -> Result<CatalogRunSummary> {
    let store = connect_store(&config).await?;
    SyncPipeline::new(config, Arc::new(store))?
        .run_catalog(mode)
        .await
}

pub async fn run_roster_sync(config: SyncConfig) -> Result<RosterRunSummary> {
    let store = connect_store(&config).await?;
    SyncPipeline::new(config, Arc::new(store))?.run_roster().await
}
