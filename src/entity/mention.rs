//! ResourceMention - a resource found in a publication's text
//!
//! A mention aggregates one row per matched alias. `match_count` is the sum of
//! the alias counts and `mean_confidence` the unweighted mean of the alias means.

use serde::{Deserialize, Serialize};

use super::{missing, Entity, FromInput, Input, Publication, Resource, Version};
use crate::fetch::{self, FetchOptions};
use crate::storage::{delete_where, upsert, Filters, Session, UpsertOptions};
use crate::Result;

/// One alias of a resource matched in a publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedAlias {
    pub matched_alias: String,
    pub match_count: i64,
    pub mean_confidence: f64,
}

impl MatchedAlias {
    pub fn new(matched_alias: impl Into<String>, match_count: i64, mean_confidence: f64) -> Self {
        Self {
            matched_alias: matched_alias.into(),
            match_count,
            mean_confidence,
        }
    }
}

impl FromInput for MatchedAlias {
    const KIND: &'static str = "matched_alias";

    fn from_input(input: &Input) -> Result<Self> {
        Ok(Self {
            matched_alias: input
                .text("matched_alias")
                .ok_or_else(|| missing(Self::KIND, "the alias text"))?,
            match_count: input.int("match_count").unwrap_or(0),
            mean_confidence: input.float("mean_confidence").unwrap_or(0.0),
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::MatchedAlias(m) => Some(m.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchedAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x{} ({:.2})", self.matched_alias, self.match_count, self.mean_confidence)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMention {
    pub publication: Option<Publication>,
    pub resource: Option<Resource>,
    pub version: Option<Version>,
    pub matched_aliases: Vec<MatchedAlias>,
    pub match_count: i64,
    pub mean_confidence: f64,
}

impl ResourceMention {
    pub fn new(
        publication: Option<Publication>,
        resource: Option<Resource>,
        version: Option<Version>,
        matched_aliases: Vec<MatchedAlias>,
    ) -> Self {
        let match_count = matched_aliases.iter().map(|a| a.match_count).sum();
        let mean_confidence = if matched_aliases.is_empty() {
            0.0
        } else {
            matched_aliases.iter().map(|a| a.mean_confidence).sum::<f64>() / matched_aliases.len() as f64
        };
        Self {
            publication,
            resource,
            version,
            matched_aliases,
            match_count,
            mean_confidence,
        }
    }

    fn ids(&self) -> Result<(i64, i64, i64)> {
        let publication_id = self
            .publication
            .as_ref()
            .and_then(|p| p.id)
            .ok_or_else(|| missing(Self::KIND, "a written publication"))?;
        let resource_id = self
            .resource
            .as_ref()
            .and_then(|r| r.id)
            .ok_or_else(|| missing(Self::KIND, "a written resource"))?;
        let version_id = self
            .version
            .as_ref()
            .and_then(|v| v.id)
            .ok_or_else(|| missing(Self::KIND, "a written version"))?;
        Ok((publication_id, resource_id, version_id))
    }

    /// Write publication, resource and version if unwritten, then one row per alias.
    ///
    /// All three parts are checked before anything is written.
    pub fn write(&mut self, session: &Session<'_>) -> Result<()> {
        if self.publication.is_none() {
            return Err(missing(Self::KIND, "a publication"));
        }
        if self.resource.is_none() {
            return Err(missing(Self::KIND, "a resource"));
        }
        if !self.version.as_ref().is_some_and(|v| v.id.is_some() || !v.is_empty()) {
            return Err(missing(Self::KIND, "a version"));
        }

        if let Some(publication) = self.publication.as_mut().filter(|p| p.id.is_none()) {
            publication.write(session)?;
        }
        if let Some(resource) = self.resource.as_mut().filter(|r| r.id.is_none()) {
            resource.write(session, false)?;
        }
        if let Some(version) = self.version.as_mut().filter(|v| v.id.is_none() && !v.is_empty()) {
            version.write(session)?;
        }

        let (publication_id, resource_id, version_id) = self.ids()?;
        for alias in &self.matched_aliases {
            let row = super::row_of([
                ("publication_id", publication_id.into()),
                ("resource_id", resource_id.into()),
                ("version_id", version_id.into()),
                ("matched_alias", alias.matched_alias.clone().into()),
                ("match_count", alias.match_count.into()),
                ("mean_confidence", alias.mean_confidence.into()),
            ]);
            upsert(session, "resource_mention", &row, UpsertOptions::default())?;
        }
        Ok(())
    }

    /// Delete the row of every alias
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let (publication_id, resource_id, version_id) = self.ids()?;
        session.atomically("resource_mention", |session| {
            let mut deleted = 0;
            for alias in &self.matched_aliases {
                let filters = Filters::new()
                    .eq("publication_id", publication_id)
                    .eq("resource_id", resource_id)
                    .eq("version_id", version_id)
                    .eq("matched_alias", alias.matched_alias.clone());
                deleted += delete_where(session, "resource_mention", &filters)?;
            }
            Ok(deleted)
        })
    }

    pub fn fetch_by_publication_id(session: &Session<'_>, publication_id: i64) -> Result<Vec<ResourceMention>> {
        fetch::fetch_resource_mention(
            session,
            &Filters::new().eq("publication_id", publication_id),
            &FetchOptions::shallow(),
        )
    }

    pub fn fetch_by_resource_id(session: &Session<'_>, resource_id: i64) -> Result<Vec<ResourceMention>> {
        fetch::fetch_resource_mention(
            session,
            &Filters::new().eq("resource_id", resource_id),
            &FetchOptions::shallow(),
        )
    }
}

impl FromInput for ResourceMention {
    const KIND: &'static str = "resource_mention";

    fn from_input(input: &Input) -> Result<Self> {
        let matched_aliases = match input.many::<MatchedAlias>("matched_aliases")? {
            Some(aliases) => aliases,
            None if input.is_set("matched_alias") => vec![MatchedAlias::from_input(input)?],
            None => Vec::new(),
        };

        Ok(Self::new(
            sub_entity(input, "publication")?,
            sub_entity(input, "resource")?,
            sub_entity(input, "version")?,
            matched_aliases,
        ))
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::ResourceMention(m) => Some(m.as_ref().clone()),
            _ => None,
        }
    }
}

/// Sub-entity given directly, or through `<key>_*` fields
fn sub_entity<T: FromInput>(input: &Input, key: &str) -> Result<Option<T>> {
    if let Some(found) = input.one::<T>(key)? {
        return Ok(Some(found));
    }
    let group = input.prefixed(key);
    if group.has_values() {
        T::from_input(&group).map(Some)
    } else {
        Ok(None)
    }
}

impl std::fmt::Display for ResourceMention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resource = self
            .resource
            .as_ref()
            .and_then(|r| r.short_name.clone())
            .unwrap_or_else(|| "<resource>".to_string());
        let publication = self
            .publication
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<publication>".to_string());
        write!(
            f,
            "{} in {}: {} match(es), confidence {:.2}",
            resource, publication, self.match_count, self.mean_confidence
        )
    }
}
