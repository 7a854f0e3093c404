//! Url and ConnectionStatus - a resource's address and its ping history
//!
//! A URL is deduplicated by its literal string and owns an ordered list of
//! connection statuses. At most one status per URL carries `is_latest`; writing a
//! latest status clears the flag on the others first.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{int_field, missing, parse_datetime, row_of, Entity, Field, FromInput, Input, DATETIME_FORMAT};
use crate::fetch::{self, FetchOptions};
use crate::storage::{clear_latest, delete_where, upsert, Filters, Session, UpsertOptions};
use crate::{Error, Result};

/// Status prefixes that mean the URL could not be reached
const OFFLINE_PREFIXES: &[&str] = &["404", "500", "HTTPConnectionPool"];

/// A resource URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Url {
    pub id: Option<i64>,
    pub url: Option<String>,
    pub url_country: Option<String>,
    pub url_coordinates: Option<String>,
    pub wayback_url: Option<String>,
    /// Latest first once fetched
    pub status: Vec<ConnectionStatus>,
}

impl Url {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status.push(status);
        self
    }

    /// The status flagged latest, else the first one
    pub fn latest_connection_status(&self) -> Option<&ConnectionStatus> {
        let first = self.status.first()?;
        if first.is_latest {
            return Some(first);
        }
        Some(self.status.iter().find(|s| s.is_latest).unwrap_or(first))
    }

    pub fn is_online(&self) -> bool {
        self.latest_connection_status().is_some_and(|s| s.is_online)
    }

    /// Upsert the URL, then each status under its id
    pub fn write(&mut self, session: &Session<'_>) -> Result<i64> {
        let row = row_of([
            ("id", self.id.into()),
            ("url", self.url.clone().into()),
            ("url_country", self.url_country.clone().into()),
            ("url_coordinates", self.url_coordinates.clone().into()),
            ("wayback_url", self.wayback_url.clone().into()),
        ]);
        let id = upsert(session, "url", &row, UpsertOptions::default())?;
        self.id = Some(id);

        for status in &mut self.status {
            status.url_id = Some(id);
            status.write(session)?;
        }
        Ok(id)
    }

    /// Delete the statuses, then the URL
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        session.atomically("url", |session| {
            delete_where(session, "connection_status", &Filters::new().eq("url_id", id))?;
            delete_where(session, "url", &Filters::new().eq("id", id))
        })
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<Url>> {
        fetch::fetch_url(session, &Filters::new().eq("id", id), &FetchOptions::default())
            .map(|found| found.into_first())
    }

    pub fn fetch_by_url(session: &Session<'_>, url: &str) -> Result<Option<Url>> {
        fetch::fetch_url(session, &Filters::new().eq("url", url), &FetchOptions::default())
            .map(|found| found.into_first())
    }
}

impl FromInput for Url {
    const KIND: &'static str = "url";

    fn from_input(input: &Input) -> Result<Self> {
        let status = match input.get("status") {
            Some(Field::Raw(Value::String(_))) | Some(Field::Raw(Value::Number(_))) => {
                vec![ConnectionStatus::from_input(input)?]
            }
            Some(_) => input.many::<ConnectionStatus>("status")?.unwrap_or_default(),
            None if input.is_set("url_status") => vec![ConnectionStatus::from_input(input)?],
            None => Vec::new(),
        };

        Ok(Self {
            id: int_field(input, &["id", "url_id"]),
            url: input.text("url"),
            url_country: input.text("url_country"),
            url_coordinates: input.text("url_coordinates"),
            wayback_url: input.text("wayback_url"),
            status,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Url(u) => Some(u.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.latest_connection_status() {
            Some(s) if s.is_online => "online",
            Some(_) => "offline",
            None => "unchecked",
        };
        write!(f, "{} [{}]", self.url.as_deref().unwrap_or("<no url>"), state)
    }
}

/// One ping of a URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub url_id: Option<i64>,
    pub status: String,
    pub date: NaiveDateTime,
    pub is_online: bool,
    pub is_latest: bool,
}

impl ConnectionStatus {
    /// A status observed now; it becomes the latest one
    pub fn now(status: impl Into<String>) -> Self {
        let status = status.into();
        Self {
            url_id: None,
            is_online: online_from_status(&status),
            status,
            date: now(),
            is_latest: true,
        }
    }

    pub fn at(status: impl Into<String>, date: NaiveDateTime, is_latest: bool) -> Self {
        let status = status.into();
        Self {
            url_id: None,
            is_online: online_from_status(&status),
            status,
            date,
            is_latest,
        }
    }

    /// Clear the other latest flags of this URL, then upsert
    pub fn write(&mut self, session: &Session<'_>) -> Result<()> {
        let url_id = self.url_id.ok_or_else(|| missing(Self::KIND, "a url_id"))?;
        if self.is_latest {
            clear_latest(session, "connection_status", "url_id", &Value::from(url_id))?;
        }
        let row = row_of([
            ("url_id", url_id.into()),
            ("date", self.date.format(DATETIME_FORMAT).to_string().into()),
            ("status", self.status.clone().into()),
            ("is_online", self.is_online.into()),
            ("is_latest", self.is_latest.into()),
        ]);
        upsert(session, "connection_status", &row, UpsertOptions::default())?;
        Ok(())
    }

    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let url_id = self.url_id.ok_or_else(|| missing(Self::KIND, "a url_id to delete"))?;
        delete_where(
            session,
            "connection_status",
            &Filters::new()
                .eq("url_id", url_id)
                .eq("date", self.date.format(DATETIME_FORMAT).to_string()),
        )
    }

    /// Statuses of one URL, latest first
    pub fn fetch_by_url_id(session: &Session<'_>, url_id: i64) -> Result<Vec<ConnectionStatus>> {
        fetch::fetch_statuses_of(session, url_id)
    }
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Offline when the status starts with a known failure prefix
pub fn online_from_status(status: &str) -> bool {
    !OFFLINE_PREFIXES.iter().any(|p| status.starts_with(p))
}

impl FromInput for ConnectionStatus {
    const KIND: &'static str = "connection_status";

    fn from_input(input: &Input) -> Result<Self> {
        let status = input
            .text("status")
            .or_else(|| input.text("url_status"))
            .ok_or_else(|| missing(Self::KIND, "a status"))?;

        let date_text = ["connection_date", "date"]
            .iter()
            .find_map(|k| input.text(k).filter(|t| !t.is_empty()).map(|t| (*k, t)));
        let (date, dated) = match date_text {
            Some((key, text)) => (parse_datetime(key, &text)?, true),
            None => (now(), false),
        };

        let is_online = match input.get("is_online") {
            Some(Field::Raw(Value::Null)) | None => online_from_status(&status),
            Some(_) => input.bool("is_online").ok_or_else(|| {
                Error::Validation(format!("is_online must be a boolean for status {:?}", status))
            })?,
        };

        Ok(Self {
            url_id: input.int("url_id"),
            is_online,
            is_latest: input.bool("is_latest").unwrap_or(!dated),
            status,
            date,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::ConnectionStatus(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.status, self.date.format(DATETIME_FORMAT))?;
        if self.is_latest {
            write!(f, " (latest)")?;
        }
        Ok(())
    }
}
