//! Version - one run of the catalogue pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{date_field, int_field, missing, row_of, text_field, Entity, FromInput, Input, DATE_FORMAT};
use crate::fetch::{self, FetchOptions};
use crate::storage::{delete_where, upsert, Filters, Session, UpsertOptions};
use crate::Result;

/// A pipeline run, unique by (name, date). Immutable once written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub user: Option<String>,
    pub additional_metadata: Option<Value>,
}

impl Version {
    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: Some(name.into()),
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.additional_metadata = Some(metadata);
        self
    }

    /// Nothing to identify or write
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.date.is_none()
    }

    /// Upsert and return the id
    pub fn write(&mut self, session: &Session<'_>) -> Result<i64> {
        let row = row_of([
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("date", self.date.map(|d| d.format(DATE_FORMAT).to_string()).into()),
            ("user", self.user.clone().into()),
            ("additional_metadata", self.additional_metadata.clone().into()),
        ]);
        let id = upsert(session, "version", &row, UpsertOptions::default())?;
        self.id = Some(id);
        Ok(id)
    }

    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        delete_where(session, "version", &Filters::new().eq("id", id))
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<Version>> {
        fetch::fetch_version(session, &Filters::new().eq("id", id), &FetchOptions::default())
            .map(|found| found.into_first())
    }
}

impl FromInput for Version {
    const KIND: &'static str = "version";

    fn from_input(input: &Input) -> Result<Self> {
        Ok(Self {
            id: int_field(input, &["id", "version_id"]),
            name: text_field(input, &["name", "version_name"]),
            date: date_field(input, &["date", "version_date"])?,
            user: text_field(input, &["user", "version_user"]),
            additional_metadata: input
                .json("additional_metadata")
                .or_else(|| input.json("additional_version_metadata")),
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Version(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("<unnamed>"))?;
        if let Some(date) = self.date {
            write!(f, " ({})", date)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_from_prefixed_and_plain_keys() {
        let flat = Input::from_json(json!({
            "version_name": "2024 run",
            "version_date": "2024-05-01",
            "version_user": "curator",
            "additional_version_metadata": "{\"model\": \"v2\"}"
        }))
        .unwrap();
        let version = Version::from_input(&flat).unwrap();
        assert_eq!(version.name.as_deref(), Some("2024 run"));
        assert_eq!(version.date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(version.additional_metadata, Some(json!({"model": "v2"})));

        let bad = Input::new().with("date", "May 2024");
        assert!(matches!(Version::from_input(&bad), Err(Error::Validation(_))));
    }

    #[test]
    fn test_write_is_idempotent_and_fetchable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let mut first = Version::new("run", date).with_user("curator");
        let mut second = Version::new("run", date).with_user("curator");
        let id = first.write(&session).unwrap();
        assert_eq!(second.write(&session).unwrap(), id);

        let fetched = Version::fetch_by_id(&session, id).unwrap().unwrap();
        assert_eq!(fetched, first);
        assert!(Version::fetch_by_id(&session, id + 1).unwrap().is_none());
    }

    #[test]
    fn test_delete_requires_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        assert!(Version::default().delete(&session).is_err());

        let mut version = Version::new("run", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        version.write(&session).unwrap();
        assert_eq!(version.delete(&session).unwrap(), 1);
        assert_eq!(store.count("version").unwrap(), 0);
    }

    #[test]
    fn test_is_empty() {
        assert!(Version::default().is_empty());
        assert!(Version::default().with_user("x").is_empty());
        let written = Version {
            id: Some(1),
            ..Version::default()
        };
        assert!(!written.is_empty());
    }
}
