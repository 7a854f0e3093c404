//! Accession - a data identifier issued by a resource
//!
//! One row per accession string; the publications citing it live in the
//! `accession_publication` junction and are folded back into one list on fetch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{missing, row_of, Entity, FromInput, Input, Publication, Resource, Version};
use crate::fetch::{self, FetchOptions};
use crate::storage::{delete_where, upsert, Filters, Session, UpsertOptions};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accession {
    pub accession: Option<String>,
    pub resource: Option<Resource>,
    pub version: Option<Version>,
    pub publications: Vec<Publication>,
    pub url: Option<String>,
    pub additional_metadata: Option<Value>,
}

impl Accession {
    pub fn new(accession: impl Into<String>) -> Self {
        Self {
            accession: Some(accession.into()),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_publication(mut self, publication: Publication) -> Self {
        self.publications.push(publication);
        self
    }

    /// Write resource and version if unwritten, the accession, then publication links
    pub fn write(&mut self, session: &Session<'_>) -> Result<()> {
        let accession = self
            .accession
            .clone()
            .ok_or_else(|| missing(Self::KIND, "an accession"))?;

        if let Some(resource) = &mut self.resource {
            if resource.id.is_none() {
                resource.write(session, false)?;
            }
        }
        if let Some(version) = &mut self.version {
            if version.id.is_none() && !version.is_empty() {
                version.write(session)?;
            }
        }

        let row = row_of([
            ("accession", accession.clone().into()),
            ("resource_id", self.resource.as_ref().and_then(|r| r.id).into()),
            ("version_id", self.version.as_ref().and_then(|v| v.id).into()),
            ("url", self.url.clone().into()),
            ("additional_metadata", self.additional_metadata.clone().into()),
        ]);
        upsert(session, "accession", &row, UpsertOptions::default())?;

        for publication in &mut self.publications {
            let publication_id = match publication.id {
                Some(id) => id,
                None => publication.write(session)?,
            };
            let link = row_of([
                ("accession", accession.clone().into()),
                ("publication_id", publication_id.into()),
            ]);
            upsert(session, "accession_publication", &link, UpsertOptions::default())?;
        }
        Ok(())
    }

    /// Remove the publication links, then the accession
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let accession = self
            .accession
            .as_deref()
            .ok_or_else(|| missing(Self::KIND, "an accession to delete"))?;
        session.atomically("accession", |session| {
            delete_where(session, "accession_publication", &Filters::new().eq("accession", accession))?;
            delete_where(session, "accession", &Filters::new().eq("accession", accession))
        })
    }

    /// The accession with its resource and version; publications listed by id only
    pub fn fetch_by_accession(session: &Session<'_>, accession: &str) -> Result<Option<Accession>> {
        let found = fetch::fetch_accession(session, &Filters::new().eq("accession", accession), &FetchOptions::shallow())?;
        Ok(found.into_iter().next())
    }

    pub fn fetch_by_resource(session: &Session<'_>, resource_id: i64) -> Result<Vec<Accession>> {
        fetch::fetch_accession(session, &Filters::new().eq("resource_id", resource_id), &FetchOptions::default())
    }

    /// Accessions citing a publication; each carries its full publication list
    pub fn fetch_by_publication(session: &Session<'_>, publication_id: i64) -> Result<Vec<Accession>> {
        let citing = fetch::fetch_accession(
            session,
            &Filters::new().eq("publication_id", publication_id),
            &FetchOptions::shallow(),
        )?;
        let names: Vec<Value> = citing
            .into_iter()
            .filter_map(|a| a.accession.map(Value::String))
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        fetch::fetch_accession(session, &Filters::new().eq("accession", names), &FetchOptions::default())
    }
}

/// Sub-entity given directly, or through `<prefix>_*` fields
fn prefixed_one<T: FromInput>(input: &Input, key: &str) -> Result<Option<T>> {
    if let Some(found) = input.one::<T>(key)? {
        return Ok(Some(found));
    }
    let group = input.prefixed(key);
    if !group.has_values() {
        return Ok(None);
    }
    T::from_input(&group).map(Some)
}

impl FromInput for Accession {
    const KIND: &'static str = "accession";

    fn from_input(input: &Input) -> Result<Self> {
        let publications = match input.many::<Publication>("publications")? {
            Some(publications) => publications,
            None => prefixed_one::<Publication>(input, "publication")?.into_iter().collect(),
        };

        Ok(Self {
            accession: input.text("accession"),
            resource: prefixed_one(input, "resource")?,
            version: prefixed_one(input, "version")?,
            publications,
            url: input.text("url"),
            additional_metadata: input.json("additional_metadata"),
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Accession(a) => Some(a.as_ref().clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Accession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.accession.as_deref().unwrap_or("<no accession>"))?;
        if let Some(short_name) = self.resource.as_ref().and_then(|r| r.short_name.as_deref()) {
            write!(f, " ({})", short_name)?;
        }
        write!(f, ", {} publication(s)", self.publications.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use chrono::NaiveDate;
    use serde_json::json;

    fn publication(pubmed_id: i64) -> Publication {
        Publication::new(format!("Paper {}", pubmed_id), "Author A", 1).with_pubmed_id(pubmed_id)
    }

    #[test]
    fn test_from_prefixed_fields() {
        let input = Input::from_json(json!({
            "accession": "P12345",
            "url": "https://www.uniprot.org/uniprotkb/P12345",
            "resource_id": 7,
            "resource_short_name": "uniprot",
            "version_name": "run",
            "version_date": "2024-02-01",
            "publication_id": 432,
            "publication_title": "Paper",
            "additional_metadata": {"organism": "human"}
        }))
        .unwrap();
        let accession = Accession::from_input(&input).unwrap();

        let resource = accession.resource.unwrap();
        assert_eq!(resource.id, Some(7));
        assert_eq!(resource.short_name.as_deref(), Some("uniprot"));
        assert_eq!(accession.version.unwrap().date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(accession.publications.len(), 1);
        assert_eq!(accession.publications[0].id, Some(432));
        assert_eq!(accession.publications[0].title.as_deref(), Some("Paper"));
        assert_eq!(accession.additional_metadata, Some(json!({"organism": "human"})));
    }

    #[test]
    fn test_empty_prefix_group_means_absent() {
        let input = Input::from_json(json!({"accession": "X1", "resource_id": null})).unwrap();
        let accession = Accession::from_input(&input).unwrap();
        assert_eq!(accession.resource, None);
        assert_eq!(accession.version, None);
        assert!(accession.publications.is_empty());
    }

    #[test]
    fn test_write_requires_accession() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(Accession::default().write(&store.session()).is_err());
        assert!(Accession::default().delete(&store.session()).is_err());
    }

    #[test]
    fn test_grouping_on_fetch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();

        let mut resource = Resource::new("uniprot");
        resource.write(&session, false).unwrap();
        let version = Version::new("run", NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        for pubmed_id in [789, 432] {
            let mut publication = publication(pubmed_id);
            publication.id = Some(pubmed_id);
            publication.write(&session).unwrap();
            Accession::new("acc1.123")
                .with_resource(resource.clone())
                .with_version(version.clone())
                .with_publication(publication)
                .write(&session)
                .unwrap();
        }
        assert_eq!(store.count("accession").unwrap(), 1);
        assert_eq!(store.count("accession_publication").unwrap(), 2);

        let found = Accession::fetch_by_accession(&session, "acc1.123").unwrap().unwrap();
        let ids: Vec<Option<i64>> = found.publications.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![Some(432), Some(789)]);
        assert_eq!(found.resource.unwrap().short_name.as_deref(), Some("uniprot"));
        assert_eq!(found.version.unwrap().name.as_deref(), Some("run"));

        let by_publication = Accession::fetch_by_publication(&session, 789).unwrap();
        assert_eq!(by_publication.len(), 1);
        assert_eq!(by_publication[0].publications.len(), 2);
    }

    #[test]
    fn test_fetch_by_resource_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut resource = Resource::new("ena");
        let resource_id = resource.write(&session, false).unwrap();

        let mut cited = Accession::new("ERR000001")
            .with_resource(resource.clone())
            .with_publication(publication(1));
        cited.write(&session).unwrap();
        Accession::new("ERR000002").with_resource(resource).write(&session).unwrap();

        let found = Accession::fetch_by_resource(&session, resource_id).unwrap();
        let names: Vec<&str> = found.iter().filter_map(|a| a.accession.as_deref()).collect();
        assert_eq!(names, vec!["ERR000001", "ERR000002"]);
        assert_eq!(found[0].publications[0].title.as_deref(), Some("Paper 1"));
        assert!(found[1].publications.is_empty());

        assert_eq!(cited.delete(&session).unwrap(), 1);
        assert_eq!(store.count("accession_publication").unwrap(), 0);
        assert_eq!(store.count("publication").unwrap(), 1);
    }
}
