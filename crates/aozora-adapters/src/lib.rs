//! Feed source contracts, raw row extraction and the catalog row decoder.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use aozora_core::{
    attribute_kind, attribute_route, AttributeError, AttributeKind, AttributeRoute,
    AttributeValue, Book, Person, Role, RosterRecord, BOOK_ID_COLUMN, CATALOG_COLUMNS,
    NO_COPYRIGHT, PERSON_ID_COLUMN,
};
use aozora_storage::{FetchError, HttpFetcher};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "aozora-adapters";

pub const CATALOG_ARCHIVE_URL: &str =
    "https://github.com/aozorabunko/aozorabunko/raw/master/index_pages/list_person_all_extended_utf8.zip";
pub const ROSTER_PAGE_URL: &str = "http://reception.aozora.gr.jp/widlist.php?page=1&pagerow=-1";

/// One catalog CSV record, fields in [`CATALOG_COLUMNS`] order.
pub type RawRow = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRosterRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedContext {
    pub run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    Remote(String),
    Local(PathBuf),
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("reading archive entry: {0}")]
    Read(#[from] std::io::Error),
    #[error("opening catalog archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("parsing catalog csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("row has {actual} fields, expected {expected}")]
    RowShape { expected: usize, actual: usize },
    #[error("row has no {column}")]
    MissingKey { column: &'static str },
    #[error("{column}: {value:?} is not an integer")]
    InvalidInteger { column: &'static str, value: String },
    #[error("{column}: {value:?} is not a date")]
    InvalidDate { column: &'static str, value: String },
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    type Row: Send;

    fn feed_id(&self) -> &'static str;

    fn location(&self) -> &FeedLocation;

    fn parse(&self, body: &[u8]) -> Result<Vec<Self::Row>, AdapterError>;

    async fn fetch(&self, http: &HttpFetcher, ctx: &FeedContext) -> Result<Vec<u8>, AdapterError> {
        match self.location() {
            FeedLocation::Remote(url) => Ok(http.fetch_bytes(ctx.run_id, self.feed_id(), url).await?.body),
            FeedLocation::Local(path) => tokio::fs::read(path).await.map_err(|source| AdapterError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    async fn load(&self, http: &HttpFetcher, ctx: &FeedContext) -> Result<Vec<Self::Row>, AdapterError> {
        let body = self.fetch(http, ctx).await?;
        self.parse(&body)
    }
}

/// Zipped catalog CSV published by Aozora Bunko.
#[derive(Debug, Clone)]
pub struct CatalogArchiveSource {
    location: FeedLocation,
}

impl CatalogArchiveSource {
    pub fn new(location: FeedLocation) -> Self {
        Self { location }
    }
}

impl Default for CatalogArchiveSource {
    fn default() -> Self {
        Self::new(FeedLocation::Remote(CATALOG_ARCHIVE_URL.to_string()))
    }
}

#[async_trait]
impl FeedSource for CatalogArchiveSource {
    type Row = RawRow;

    fn feed_id(&self) -> &'static str {
        "catalog"
    }

    fn location(&self) -> &FeedLocation {
        &self.location
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<RawRow>, AdapterError> {
        let csv_bytes = extract_first_entry(body)?;
        parse_catalog_csv(&csv_bytes)
    }
}

/// Contributor roster HTML page.
#[derive(Debug, Clone)]
pub struct RosterPageSource {
    location: FeedLocation,
}

impl RosterPageSource {
    pub fn new(location: FeedLocation) -> Self {
        Self { location }
    }
}

impl Default for RosterPageSource {
    fn default() -> Self {
        Self::new(FeedLocation::Remote(ROSTER_PAGE_URL.to_string()))
    }
}

#[async_trait]
impl FeedSource for RosterPageSource {
    type Row = RawRosterRow;

    fn feed_id(&self) -> &'static str {
        "roster"
    }

    fn location(&self) -> &FeedLocation {
        &self.location
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<RawRosterRow>, AdapterError> {
        parse_roster_page(&String::from_utf8_lossy(body))
    }
}

pub fn extract_first_entry(archive: &[u8]) -> Result<Vec<u8>, AdapterError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    if zip.is_empty() {
        return Err(AdapterError::Message("catalog archive has no entries".to_string()));
    }
    // The declared size comes from the archive header and is not trusted.
    let mut entry = zip.by_index(0)?;
    let mut out = Vec::new();
    entry.read_to_end(&mut out)?;
    Ok(out)
}

/// Reads every data record; the header line is consumed by the reader.
pub fn parse_catalog_csv(bytes: &[u8]) -> Result<Vec<RawRow>, AdapterError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Extracts `(id, name)` pairs from `tr[valign]` rows, skipping the heading row.
pub fn parse_roster_page(html: &str) -> Result<Vec<RawRosterRow>, AdapterError> {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse("tr[valign]").map_err(|e| AdapterError::Message(e.to_string()))?;
    let cell_sel = Selector::parse("td, th").map_err(|e| AdapterError::Message(e.to_string()))?;

    Ok(document
        .select(&row_sel)
        .skip(1)
        .map(|row| {
            let mut cells = row.select(&cell_sel).map(cell_text);
            let id = cells.next().unwrap_or_default();
            let name = cells.next().unwrap_or_default().replacen('\u{3000}', " ", 1);
            RawRosterRow { id, name }
        })
        .collect())
}

/// Semantic fragments carried by one catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub book: Book,
    pub person: Person,
    pub role: Option<Role>,
}

pub fn parse_integer(column: &'static str, raw: &str) -> Result<i64, DecodeError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidInteger {
            column,
            value: raw.to_string(),
        })
}

pub fn parse_copyright(raw: &str) -> bool {
    raw != NO_COPYRIGHT
}

/// Accepts RFC 3339, `YYYY-MM-DD[ HH:MM:SS]`, `YYYY/MM/DD`, `YYYY-MM` and `YYYY`.
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    let value = raw.trim();
    let invalid = || DecodeError::InvalidDate {
        column,
        value: raw.to_string(),
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .ok()
        .or_else(|| partial_date(value))
        .ok_or_else(invalid)?;
    date.and_hms_opt(0, 0, 0)
        .map(|ts| ts.and_utc())
        .ok_or_else(invalid)
}

fn partial_date(value: &str) -> Option<NaiveDate> {
    let mut parts = value.split('-');
    let year = parts.next().filter(|y| y.len() == 4)?.parse::<i32>().ok()?;
    let month = match parts.next() {
        Some(m) => m.parse::<u32>().ok()?,
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn coerce(column: &'static str, raw: &str) -> Result<AttributeValue, DecodeError> {
    Ok(match attribute_kind(column) {
        AttributeKind::Identifier => AttributeValue::Integer(parse_integer(column, raw)?),
        AttributeKind::Copyright => AttributeValue::Flag(parse_copyright(raw)),
        AttributeKind::Date => AttributeValue::Timestamp(parse_timestamp(column, raw)?),
        AttributeKind::Text => AttributeValue::Text(raw.to_string()),
    })
}

fn required_key(row: &[String], index: usize) -> Result<i64, DecodeError> {
    let column = CATALOG_COLUMNS[index];
    match row[index].as_str() {
        "" => Err(DecodeError::MissingKey { column }),
        raw => parse_integer(column, raw),
    }
}

/// Splits one catalog row into its book fragment, person fragment and role tag.
/// Empty fields are skipped; an unknown role label yields no role tag.
pub fn decode_catalog_row(row: &[String]) -> Result<DecodedRow, DecodeError> {
    if row.len() != CATALOG_COLUMNS.len() {
        return Err(DecodeError::RowShape {
            expected: CATALOG_COLUMNS.len(),
            actual: row.len(),
        });
    }

    let mut book = Book::new(required_key(row, BOOK_ID_COLUMN)?);
    let mut person = Person::new(required_key(row, PERSON_ID_COLUMN)?);
    let mut role = None;

    for (column, raw) in CATALOG_COLUMNS.iter().copied().zip(row) {
        if raw.is_empty() {
            continue;
        }
        match attribute_route(column) {
            AttributeRoute::Role => role = Role::from_label(raw),
            AttributeRoute::Book => book.assign(column, coerce(column, raw)?)?,
            AttributeRoute::Person => person.assign(column, coerce(column, raw)?)?,
        }
    }

    Ok(DecodedRow { book, person, role })
}

pub fn decode_roster_row(row: RawRosterRow) -> Result<RosterRecord, DecodeError> {
    Ok(RosterRecord {
        id: parse_integer("id", &row.id)?,
        name: row.name,
    })
}
