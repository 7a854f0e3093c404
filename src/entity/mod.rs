//! Entity model - the typed catalogue graph
//!
//! Entities:
//! - `Resource`: a biodata resource at one pipeline version, owning its `Url`
//! - `Url` / `ConnectionStatus`: an address and its ping history
//! - `Version`: one pipeline run
//! - `Publication`, `Grant`, `GrantAgency`: literature and funding
//! - `Accession`: a data identifier tied to a resource and citing publications
//! - `ResourceMention` / `MatchedAlias`: a resource found in a publication's text
//!
//! Every entity is built from an [`Input`] through [`FromInput`], written with its own
//! `write` cascade and rebuilt by the fetchers in [`crate::fetch`].

pub mod accession;
pub mod grant;
pub mod input;
pub mod mention;
pub mod publication;
pub mod resource;
pub mod url;
pub mod version;

pub use accession::Accession;
pub use grant::{Grant, GrantAgency};
pub use input::{Field, Input};
pub use mention::{MatchedAlias, ResourceMention};
pub use publication::Publication;
pub use resource::Resource;
pub use url::{ConnectionStatus, Url};
pub use version::Version;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;

use crate::storage::{Row, Session};
use crate::{Error, Result};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Construction from an attribute mapping or an already-built entity
pub trait FromInput: Sized {
    /// Name used in validation messages
    const KIND: &'static str;

    fn from_input(input: &Input) -> Result<Self>;

    /// The entity's own variant, if `entity` holds one
    fn from_entity(entity: &Entity) -> Option<Self>;
}

/// Any catalogue entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Resource(Box<Resource>),
    Url(Url),
    ConnectionStatus(ConnectionStatus),
    Version(Version),
    Publication(Box<Publication>),
    Grant(Grant),
    GrantAgency(GrantAgency),
    Accession(Box<Accession>),
    ResourceMention(Box<ResourceMention>),
    MatchedAlias(MatchedAlias),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Resource(_) => Resource::KIND,
            Entity::Url(_) => Url::KIND,
            Entity::ConnectionStatus(_) => ConnectionStatus::KIND,
            Entity::Version(_) => Version::KIND,
            Entity::Publication(_) => Publication::KIND,
            Entity::Grant(_) => Grant::KIND,
            Entity::GrantAgency(_) => GrantAgency::KIND,
            Entity::Accession(_) => Accession::KIND,
            Entity::ResourceMention(_) => ResourceMention::KIND,
            Entity::MatchedAlias(_) => MatchedAlias::KIND,
        }
    }

    /// Build the entity named `kind` (e.g. "resource", "grant_agency")
    pub fn from_kind(kind: &str, input: &Input) -> Result<Entity> {
        let entity = match kind.to_lowercase().replace('-', "_").as_str() {
            "resource" => Resource::from_input(input)?.into(),
            "url" => Url::from_input(input)?.into(),
            "connection_status" | "status" => ConnectionStatus::from_input(input)?.into(),
            "version" => Version::from_input(input)?.into(),
            "publication" => Publication::from_input(input)?.into(),
            "grant" => Grant::from_input(input)?.into(),
            "grant_agency" | "agency" => GrantAgency::from_input(input)?.into(),
            "accession" => Accession::from_input(input)?.into(),
            "resource_mention" | "mention" => ResourceMention::from_input(input)?.into(),
            "matched_alias" => MatchedAlias::from_input(input)?.into(),
            other => return Err(Error::Validation(format!("Unknown entity kind: {}", other))),
        };
        Ok(entity)
    }

    /// Write the entity with its cascade
    pub fn write(&mut self, session: &Session<'_>) -> Result<()> {
        match self {
            Entity::Resource(r) => r.write(session, false).map(drop),
            Entity::Url(u) => u.write(session).map(drop),
            Entity::ConnectionStatus(s) => s.write(session),
            Entity::Version(v) => v.write(session).map(drop),
            Entity::Publication(p) => p.write(session).map(drop),
            Entity::Grant(g) => g.write(session).map(drop),
            Entity::GrantAgency(a) => a.write(session).map(drop),
            Entity::Accession(a) => a.write(session),
            Entity::ResourceMention(m) => m.write(session),
            Entity::MatchedAlias(_) => Err(Error::Validation(
                "a matched alias is written through its resource mention".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Resource(r) => write!(f, "{}", r),
            Entity::Url(u) => write!(f, "{}", u),
            Entity::ConnectionStatus(s) => write!(f, "{}", s),
            Entity::Version(v) => write!(f, "{}", v),
            Entity::Publication(p) => write!(f, "{}", p),
            Entity::Grant(g) => write!(f, "{}", g),
            Entity::GrantAgency(a) => write!(f, "{}", a),
            Entity::Accession(a) => write!(f, "{}", a),
            Entity::ResourceMention(m) => write!(f, "{}", m),
            Entity::MatchedAlias(m) => write!(f, "{}", m),
        }
    }
}

macro_rules! entity_from {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for Entity {
                fn from(value: $ty) -> Self {
                    Entity::$ty(value.into())
                }
            }
        )*
    };
}

entity_from!(
    Resource,
    Url,
    ConnectionStatus,
    Version,
    Publication,
    Grant,
    GrantAgency,
    Accession,
    ResourceMention,
    MatchedAlias,
);

/// Parse a `YYYY-MM-DD` date
pub(crate) fn parse_date(key: &str, text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| Error::Validation(format!("{}: cannot parse date {:?}: {}", key, text, e)))
}

/// Parse `YYYY-MM-DD HH:MM:SS`, or a bare date at midnight
pub(crate) fn parse_datetime(key: &str, text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        return Ok(dt);
    }
    // ISO form produced by serde
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt);
    }
    parse_date(key, text).map(|d| d.and_time(chrono::NaiveTime::MIN))
}

/// First present date among `keys`
pub(crate) fn date_field(input: &Input, keys: &[&str]) -> Result<Option<NaiveDate>> {
    match keys.iter().find_map(|k| input.text(k).map(|t| (*k, t))) {
        Some((key, text)) if !text.is_empty() => parse_date(key, &text).map(Some),
        _ => Ok(None),
    }
}

/// First present text among `keys`
pub(crate) fn text_field(input: &Input, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| input.text(k))
}

/// First present integer among `keys`
pub(crate) fn int_field(input: &Input, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| input.int(k))
}

/// Build a row, dropping absent values
pub(crate) fn row_of<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Shorthand for the "missing key" validation error
pub(crate) fn missing(kind: &str, what: &str) -> Error {
    Error::Validation(format!("{} requires {}", kind, what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_date("date", "2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        let dt = parse_datetime("date", "2024-03-01 12:30:00").unwrap();
        assert_eq!(dt.format(DATETIME_FORMAT).to_string(), "2024-03-01 12:30:00");
        let midnight = parse_datetime("date", "2024-03-01").unwrap();
        assert_eq!(midnight.format(DATETIME_FORMAT).to_string(), "2024-03-01 00:00:00");
        assert!(matches!(parse_date("date", "01/03/2024"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_from_kind_dispatch() {
        let input = Input::from_json(json!({"name": "run", "date": "2024-01-01"})).unwrap();
        let entity = Entity::from_kind("version", &input).unwrap();
        assert_eq!(entity.kind(), "version");
        assert!(Entity::from_kind("dataset", &input).is_err());
    }

    #[test]
    fn test_row_of_drops_nulls() {
        let row = row_of([("a", json!(1)), ("b", Value::Null)]);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_matched_alias_cannot_be_written_alone() {
        let store = crate::storage::SqliteStore::open_in_memory().unwrap();
        let mut entity = Entity::from(MatchedAlias::new("uniprot", 1, 0.9));
        assert!(entity.write(&store.session()).is_err());
    }
}
