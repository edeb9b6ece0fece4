//! Catalog entity model and the fixed column layout of the Aozora Bunko feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "aozora-core";

/// Column order of `list_person_all_extended_utf8.csv`.
pub const CATALOG_COLUMNS: [&str; 55] = [
    "book_id",
    "title",
    "title_yomi",
    "title_sort",
    "subtitle",
    "subtitle_yomi",
    "original_title",
    "first_appearance",
    "ndc_code",
    "font_kana_type",
    "copyright",
    "release_date",
    "last_modified",
    "card_url",
    "person_id",
    "last_name",
    "first_name",
    "last_name_yomi",
    "first_name_yomi",
    "last_name_sort",
    "first_name_sort",
    "last_name_roman",
    "first_name_roman",
    "role",
    "date_of_birth",
    "date_of_death",
    "author_copyright",
    "base_book_1",
    "base_book_1_publisher",
    "base_book_1_1st_edition",
    "base_book_1_edition_input",
    "base_book_1_edition_proofing",
    "base_book_1_parent",
    "base_book_1_parent_publisher",
    "base_book_1_parent_1st_edition",
    "base_book_2",
    "base_book_2_publisher",
    "base_book_2_1st_edition",
    "base_book_2_edition_input",
    "base_book_2_edition_proofing",
    "base_book_2_parent",
    "base_book_2_parent_publisher",
    "base_book_2_parent_1st_edition",
    "input",
    "proofing",
    "text_url",
    "text_last_modified",
    "text_encoding",
    "text_charset",
    "text_updated",
    "html_url",
    "html_last_modified",
    "html_encoding",
    "html_charset",
    "html_updated",
];

pub const BOOK_ID_COLUMN: usize = 0;
pub const RELEASE_DATE_COLUMN: usize = 11;
pub const PERSON_ID_COLUMN: usize = 14;
pub const ROLE_COLUMN: usize = 23;

/// Copyright sentinel: the work (or author) is out of copyright.
pub const NO_COPYRIGHT: &str = "なし";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Identifier,
    Copyright,
    Date,
    Text,
}

pub fn attribute_kind(name: &str) -> AttributeKind {
    match name {
        "book_id" | "person_id" | "text_updated" | "html_updated" => AttributeKind::Identifier,
        "copyright" | "author_copyright" => AttributeKind::Copyright,
        "release_date" | "last_modified" | "date_of_birth" | "date_of_death"
        | "text_last_modified" | "html_last_modified" => AttributeKind::Date,
        _ => AttributeKind::Text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRoute {
    Book,
    Person,
    Role,
}

pub fn attribute_route(name: &str) -> AttributeRoute {
    match name {
        "person_id" | "last_name" | "first_name" | "last_name_yomi" | "first_name_yomi"
        | "last_name_sort" | "first_name_sort" | "last_name_roman" | "first_name_roman"
        | "date_of_birth" | "date_of_death" | "author_copyright" => AttributeRoute::Person,
        "role" => AttributeRoute::Role,
        _ => AttributeRoute::Book,
    }
}

/// A coerced, non-empty catalog cell.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Flag(bool),
    Timestamp(DateTime<Utc>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("attribute {attribute} expects {expected} but got {found}")]
    Mismatch {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("attribute {0} is not part of this entity")]
    Unknown(String),
}

impl AttributeValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Flag(_) => "flag",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
        }
    }

    fn mismatch(&self, attribute: &str, expected: &'static str) -> AttributeError {
        AttributeError::Mismatch {
            attribute: attribute.to_string(),
            expected,
            found: self.type_name(),
        }
    }

    pub fn into_integer(self, attribute: &str) -> Result<i64, AttributeError> {
        match self {
            Self::Integer(v) => Ok(v),
            other => Err(other.mismatch(attribute, "integer")),
        }
    }

    pub fn into_flag(self, attribute: &str) -> Result<bool, AttributeError> {
        match self {
            Self::Flag(v) => Ok(v),
            other => Err(other.mismatch(attribute, "flag")),
        }
    }

    pub fn into_timestamp(self, attribute: &str) -> Result<DateTime<Utc>, AttributeError> {
        match self {
            Self::Timestamp(v) => Ok(v),
            other => Err(other.mismatch(attribute, "timestamp")),
        }
    }

    pub fn into_text(self, attribute: &str) -> Result<String, AttributeError> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(other.mismatch(attribute, "text")),
        }
    }
}

/// Contributor relationship recorded on a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Author,
    Translator,
    Editor,
    Reviser,
}

impl Role {
    /// Looks up the feed's role label. Unknown labels produce no role edge.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "著者" => Some(Self::Author),
            "翻訳者" => Some(Self::Translator),
            "編者" => Some(Self::Editor),
            "校訂者" => Some(Self::Reviser),
            _ => None,
        }
    }
}

/// Lightweight person reference embedded in a book's role lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub person_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

/// A catalog work. Absent attributes are never serialized, so an upsert
/// only touches what the source row actually carried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_yomi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_yomi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_appearance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndc_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_kana_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_1st_edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_edition_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_edition_proofing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_parent_publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_1_parent_1st_edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_1st_edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_edition_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_edition_proofing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_parent_publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_book_2_parent_1st_edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proofing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<PersonRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub translators: Vec<PersonRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editors: Vec<PersonRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisers: Vec<PersonRef>,
}

impl Book {
    pub fn new(book_id: i64) -> Self {
        Self {
            book_id,
            ..Default::default()
        }
    }

    /// Stores one decoded book attribute under its catalog column name.
    pub fn assign(&mut self, name: &str, value: AttributeValue) -> Result<(), AttributeError> {
        match name {
            "book_id" => self.book_id = value.into_integer(name)?,
            "title" => self.title = Some(value.into_text(name)?),
            "title_yomi" => self.title_yomi = Some(value.into_text(name)?),
            "title_sort" => self.title_sort = Some(value.into_text(name)?),
            "subtitle" => self.subtitle = Some(value.into_text(name)?),
            "subtitle_yomi" => self.subtitle_yomi = Some(value.into_text(name)?),
            "original_title" => self.original_title = Some(value.into_text(name)?),
            "first_appearance" => self.first_appearance = Some(value.into_text(name)?),
            "ndc_code" => self.ndc_code = Some(value.into_text(name)?),
            "font_kana_type" => self.font_kana_type = Some(value.into_text(name)?),
            "copyright" => self.copyright = Some(value.into_flag(name)?),
            "release_date" => self.release_date = Some(value.into_timestamp(name)?),
            "last_modified" => self.last_modified = Some(value.into_timestamp(name)?),
            "card_url" => self.card_url = Some(value.into_text(name)?),
            "base_book_1" => self.base_book_1 = Some(value.into_text(name)?),
            "base_book_1_publisher" => self.base_book_1_publisher = Some(value.into_text(name)?),
            "base_book_1_1st_edition" => {
                self.base_book_1_1st_edition = Some(value.into_text(name)?)
            }
            "base_book_1_edition_input" => {
                self.base_book_1_edition_input = Some(value.into_text(name)?)
            }
            "base_book_1_edition_proofing" => {
                self.base_book_1_edition_proofing = Some(value.into_text(name)?)
            }
            "base_book_1_parent" => self.base_book_1_parent = Some(value.into_text(name)?),
            "base_book_1_parent_publisher" => {
                self.base_book_1_parent_publisher = Some(value.into_text(name)?)
            }
            "base_book_1_parent_1st_edition" => {
                self.base_book_1_parent_1st_edition = Some(value.into_text(name)?)
            }
            "base_book_2" => self.base_book_2 = Some(value.into_text(name)?),
            "base_book_2_publisher" => self.base_book_2_publisher = Some(value.into_text(name)?),
            "base_book_2_1st_edition" => {
                self.base_book_2_1st_edition = Some(value.into_text(name)?)
            }
            "base_book_2_edition_input" => {
                self.base_book_2_edition_input = Some(value.into_text(name)?)
            }
            "base_book_2_edition_proofing" => {
                self.base_book_2_edition_proofing = Some(value.into_text(name)?)
            }
            "base_book_2_parent" => self.base_book_2_parent = Some(value.into_text(name)?),
            "base_book_2_parent_publisher" => {
                self.base_book_2_parent_publisher = Some(value.into_text(name)?)
            }
            "base_book_2_parent_1st_edition" => {
                self.base_book_2_parent_1st_edition = Some(value.into_text(name)?)
            }
            "input" => self.input = Some(value.into_text(name)?),
            "proofing" => self.proofing = Some(value.into_text(name)?),
            "text_url" => self.text_url = Some(value.into_text(name)?),
            "text_last_modified" => self.text_last_modified = Some(value.into_timestamp(name)?),
            "text_encoding" => self.text_encoding = Some(value.into_text(name)?),
            "text_charset" => self.text_charset = Some(value.into_text(name)?),
            "text_updated" => self.text_updated = Some(value.into_integer(name)?),
            "html_url" => self.html_url = Some(value.into_text(name)?),
            "html_last_modified" => self.html_last_modified = Some(value.into_timestamp(name)?),
            "html_encoding" => self.html_encoding = Some(value.into_text(name)?),
            "html_charset" => self.html_charset = Some(value.into_text(name)?),
            "html_updated" => self.html_updated = Some(value.into_integer(name)?),
            other => return Err(AttributeError::Unknown(other.to_string())),
        }
        Ok(())
    }

    pub fn role_list_mut(&mut self, role: Role) -> &mut Vec<PersonRef> {
        match role {
            Role::Author => &mut self.authors,
            Role::Translator => &mut self.translators,
            Role::Editor => &mut self.editors,
            Role::Reviser => &mut self.revisers,
        }
    }
}

/// A contributor. The same person repeats on every row of every work they
/// contributed to, with identical contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_yomi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name_yomi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name_sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name_roman: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name_roman: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_death: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_copyright: Option<bool>,
}

impl Person {
    pub fn new(person_id: i64) -> Self {
        Self {
            person_id,
            ..Default::default()
        }
    }

    pub fn assign(&mut self, name: &str, value: AttributeValue) -> Result<(), AttributeError> {
        match name {
            "person_id" => self.person_id = value.into_integer(name)?,
            "last_name" => self.last_name = Some(value.into_text(name)?),
            "first_name" => self.first_name = Some(value.into_text(name)?),
            "last_name_yomi" => self.last_name_yomi = Some(value.into_text(name)?),
            "first_name_yomi" => self.first_name_yomi = Some(value.into_text(name)?),
            "last_name_sort" => self.last_name_sort = Some(value.into_text(name)?),
            "first_name_sort" => self.first_name_sort = Some(value.into_text(name)?),
            "last_name_roman" => self.last_name_roman = Some(value.into_text(name)?),
            "first_name_roman" => self.first_name_roman = Some(value.into_text(name)?),
            "date_of_birth" => self.date_of_birth = Some(value.into_timestamp(name)?),
            "date_of_death" => self.date_of_death = Some(value.into_timestamp(name)?),
            "author_copyright" => self.author_copyright = Some(value.into_flag(name)?),
            other => return Err(AttributeError::Unknown(other.to_string())),
        }
        Ok(())
    }

    pub fn reference(&self) -> PersonRef {
        PersonRef {
            person_id: self.person_id,
            last_name: self.last_name.clone(),
            first_name: self.first_name.clone(),
        }
    }
}

/// Row of the contributor roster page (`widlist.php`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_column_positions_match_layout() {
        assert_eq!(CATALOG_COLUMNS[BOOK_ID_COLUMN], "book_id");
        assert_eq!(CATALOG_COLUMNS[RELEASE_DATE_COLUMN], "release_date");
        assert_eq!(CATALOG_COLUMNS[PERSON_ID_COLUMN], "person_id");
        assert_eq!(CATALOG_COLUMNS[ROLE_COLUMN], "role");
    }

    #[test]
    fn routes_split_columns_between_entities() {
        let person = CATALOG_COLUMNS
            .iter()
            .filter(|c| attribute_route(c) == AttributeRoute::Person)
            .count();
        let role = CATALOG_COLUMNS
            .iter()
            .filter(|c| attribute_route(c) == AttributeRoute::Role)
            .count();
        assert_eq!(person, 12);
        assert_eq!(role, 1);
        assert_eq!(CATALOG_COLUMNS.len() - person - role, 42);
    }

    #[test]
    fn every_column_is_assignable_to_its_entity() {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        let mut book = Book::default();
        let mut person = Person::default();
        for name in CATALOG_COLUMNS {
            let value = match attribute_kind(name) {
                AttributeKind::Identifier => AttributeValue::Integer(1),
                AttributeKind::Copyright => AttributeValue::Flag(true),
                AttributeKind::Date => AttributeValue::Timestamp(ts),
                AttributeKind::Text => AttributeValue::Text("x".into()),
            };
            match attribute_route(name) {
                AttributeRoute::Book => book.assign(name, value).unwrap(),
                AttributeRoute::Person => person.assign(name, value).unwrap(),
                AttributeRoute::Role => {}
            }
        }
        assert_eq!(book.release_date, Some(ts));
        assert_eq!(person.author_copyright, Some(true));
    }

    #[test]
    fn assign_rejects_mismatched_types_and_foreign_columns() {
        let mut book = Book::new(1);
        let err = book
            .assign("release_date", AttributeValue::Text("2020".into()))
            .unwrap_err();
        assert_eq!(
            err,
            AttributeError::Mismatch {
                attribute: "release_date".into(),
                expected: "timestamp",
                found: "text",
            }
        );
        assert_eq!(
            book.assign("last_name", AttributeValue::Text("x".into())),
            Err(AttributeError::Unknown("last_name".into()))
        );
    }

    #[test]
    fn role_labels_route_references_to_their_lists() {
        for (label, list) in [
            ("著者", "authors"),
            ("翻訳者", "translators"),
            ("編者", "editors"),
            ("校訂者", "revisers"),
        ] {
            let role = Role::from_label(label).unwrap();
            let mut book = Book::new(1);
            book.role_list_mut(role).push(Person::new(7).reference());
            let json = serde_json::to_value(&book).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj[list][0]["person_id"], 7, "{label}");
            assert_eq!(obj.len(), 2, "{label}");
        }
        assert_eq!(Role::from_label("その他"), None);
        assert_eq!(Role::from_label("校正者"), None);
    }

    #[test]
    fn absent_attributes_are_not_serialized() {
        let mut book = Book::new(42);
        book.title = Some("羅生門".into());
        let json = serde_json::to_value(&book).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["book_id"], 42);
        assert!(!obj.contains_key("authors"));
        assert!(!obj.contains_key("copyright"));
    }
}
