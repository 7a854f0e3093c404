//! Resource - a biodata resource at one pipeline version
//!
//! A resource row is unique by (short_name, url_id, version_id). Rows sharing a
//! short name are versions of one resource; at most one of them is flagged latest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::grant::grants_from_input;
use super::{
    int_field, missing, row_of, Accession, Entity, Field, FromInput, Grant, Input, Publication, ResourceMention, Url,
    Version,
};
use crate::fetch::{self, FetchOptions};
use crate::storage::{
    clear_latest, delete_where, detach, select_where, upsert, Filters, Select, Session, UpsertOptions,
};
use crate::Result;

/// Input keys that describe grants rather than the publication built from a flat input
const GRANT_KEYS: &[&str] = &["grants", "ext_grant_ids", "grant_agencies"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Option<i64>,
    pub short_name: Option<String>,
    pub common_name: Option<String>,
    pub full_name: Option<String>,
    pub url: Option<Url>,
    pub version: Option<Version>,
    pub prediction_metadata: Option<Value>,
    pub is_gcbr: Option<bool>,
    pub is_latest: Option<bool>,
    /// `None` when not loaded
    pub publications: Option<Vec<Publication>>,
    /// `None` when not loaded
    pub grants: Option<Vec<Grant>>,
}

impl Resource {
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: Some(short_name.into()),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_publications(mut self, publications: Vec<Publication>) -> Self {
        self.publications = Some(publications);
        self
    }

    pub fn with_grants(mut self, grants: Vec<Grant>) -> Self {
        self.grants = Some(grants);
        self
    }

    pub fn latest(mut self) -> Self {
        self.is_latest = Some(true);
        self
    }

    /// Write URL, version, the resource row and its publication / grant links.
    ///
    /// Sub-entities that already carry an id are only linked unless `force` is set.
    pub fn write(&mut self, session: &Session<'_>, force: bool) -> Result<i64> {
        if let Some(url) = &mut self.url {
            if url.id.is_none() || force {
                url.write(session)?;
            }
        }
        if let Some(version) = &mut self.version {
            if !version.is_empty() && (version.id.is_none() || force) {
                version.write(session)?;
            }
        }

        if self.is_latest == Some(true) {
            let short_name = self
                .short_name
                .clone()
                .ok_or_else(|| missing(Self::KIND, "a short_name to be flagged latest"))?;
            let cleared = clear_latest(session, "resource", "short_name", &Value::String(short_name))?;
            tracing::debug!("Cleared latest flag on {} resource rows", cleared);
        }

        let row = row_of([
            ("id", self.id.into()),
            ("short_name", self.short_name.clone().into()),
            ("common_name", self.common_name.clone().into()),
            ("full_name", self.full_name.clone().into()),
            ("url_id", self.url.as_ref().and_then(|u| u.id).into()),
            ("version_id", self.version.as_ref().and_then(|v| v.id).into()),
            ("prediction_metadata", self.prediction_metadata.clone().into()),
            ("is_gcbr", self.is_gcbr.into()),
            ("is_latest", self.is_latest.into()),
        ]);
        let id = upsert(session, "resource", &row, UpsertOptions::default())?;
        self.id = Some(id);

        for publication in self.publications.iter_mut().flatten() {
            let publication_id = match publication.id {
                Some(pid) if !force => pid,
                _ => publication.write(session)?,
            };
            let link = row_of([("resource_id", id.into()), ("publication_id", publication_id.into())]);
            upsert(session, "resource_publication", &link, UpsertOptions::default())?;
        }
        for grant in self.grants.iter_mut().flatten() {
            let grant_id = match grant.id {
                Some(gid) if !force => gid,
                _ => grant.write(session)?,
            };
            let link = row_of([("resource_id", id.into()), ("grant_id", grant_id.into())]);
            upsert(session, "resource_grant", &link, UpsertOptions::default())?;
        }

        tracing::debug!("Wrote resource {} as {}", self, id);
        Ok(id)
    }

    /// Remove links, mentions and the row in one transaction; accessions are kept with
    /// their resource unset. The URL goes too unless another resource row uses it.
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        session.atomically("resource", |session| {
            for table in ["resource_publication", "resource_grant", "resource_mention"] {
                delete_where(session, table, &Filters::new().eq("resource_id", id))?;
            }
            detach(session, "accession", "resource_id", &Value::from(id))?;
            let deleted = delete_where(session, "resource", &Filters::new().eq("id", id))?;

            if let Some(url) = self.url.as_ref().filter(|u| u.id.is_some()) {
                let users = select_where(
                    session,
                    &Select::from("resource").filters(Filters::new().eq("url_id", url.id)),
                )?;
                if users.is_empty() {
                    url.delete(session)?;
                }
            }
            Ok(deleted)
        })
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<Resource>> {
        fetch::fetch_resource(session, &Filters::new().eq("id", id), &FetchOptions::default())
            .map(|found| found.into_first())
    }

    /// Latest resources whose short, common or full name matches, merged by id
    pub fn fetch_by_name(session: &Session<'_>, name: &str) -> Result<Vec<Resource>> {
        let mut found: Vec<Resource> = Vec::new();
        for column in ["short_name", "common_name", "full_name"] {
            let filters = Filters::new().eq(column, name).eq("is_latest", true);
            for resource in fetch::fetch_resource(session, &filters, &FetchOptions::default())?.into_vec() {
                if !found.iter().any(|r| r.id == resource.id) {
                    found.push(resource);
                }
            }
        }
        Ok(found)
    }

    pub fn is_online(&self) -> bool {
        self.url.as_ref().is_some_and(Url::is_online)
    }

    /// Accessions attributed to this resource
    pub fn accessions(&self, session: &Session<'_>) -> Result<Vec<Accession>> {
        match self.id {
            Some(id) => Accession::fetch_by_resource(session, id),
            None => Ok(Vec::new()),
        }
    }

    /// Mentions of this resource in publications
    pub fn mentions(&self, session: &Session<'_>) -> Result<Vec<ResourceMention>> {
        match self.id {
            Some(id) => ResourceMention::fetch_by_resource_id(session, id),
            None => Ok(Vec::new()),
        }
    }

    /// Publications that mention this resource, first mention first
    pub fn referenced_by(&self, session: &Session<'_>) -> Result<Vec<Publication>> {
        let mut publications: Vec<Publication> = Vec::new();
        for mention in self.mentions(session)? {
            let Some(publication) = mention.publication else { continue };
            if publication.id.is_some() && publications.iter().any(|p| p.id == publication.id) {
                continue;
            }
            publications.push(publication);
        }
        Ok(publications)
    }
}

impl FromInput for Resource {
    const KIND: &'static str = "resource";

    fn from_input(input: &Input) -> Result<Self> {
        // the flat input's own id belongs to the resource
        let flat = input.without("id");

        let url = match input.get("url") {
            Some(Field::Raw(Value::String(_))) => Some(Url::from_input(&flat)?),
            Some(Field::Raw(Value::Null)) | None if input.is_set("url_id") => Some(Url::from_input(&flat)?),
            _ => input.one::<Url>("url")?,
        };

        let version = match input.one::<Version>("version")? {
            Some(version) => Some(version),
            None => {
                let mut prefixed = input.prefixed("version");
                if let Some(field) = input.get("additional_version_metadata") {
                    prefixed.insert("additional_metadata", field.clone());
                }
                if prefixed.is_empty() {
                    None
                } else {
                    Some(Version::from_input(&prefixed)?)
                }
            }
        };

        let publications = match input.many::<Publication>("publications")? {
            Some(publications) => Some(publications),
            None if input.is_set("title") && input.is_set("pubmed_id") && input.is_set("authors") => {
                let own = GRANT_KEYS.iter().fold(flat.clone(), |acc, key| acc.without(key));
                Some(vec![Publication::from_input(&own)?])
            }
            None => None,
        };

        Ok(Self {
            id: int_field(input, &["id", "resource_id"]),
            short_name: input.text("short_name"),
            common_name: input.text("common_name"),
            full_name: input.text("full_name"),
            url,
            version,
            prediction_metadata: input
                .json("prediction_metadata")
                .or_else(|| input.json("resource_prediction_metadata")),
            is_gcbr: input.bool("is_gcbr"),
            is_latest: input.bool("is_latest"),
            publications,
            grants: grants_from_input(input)?,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Resource(r) => Some(r.as_ref().clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name.as_deref().unwrap_or("<unnamed>"))?;
        if let Some(full_name) = &self.full_name {
            write!(f, " ({})", full_name)?;
        }
        if let Some(version) = &self.version {
            if version.name.is_some() {
                write!(f, " @ {}", version)?;
            }
        }
        Ok(())
    }
}
