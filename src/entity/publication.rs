//! Publication - an article describing or citing resources

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::grant::grants_from_input;
use super::{
    date_field, int_field, missing, row_of, text_field, Accession, Entity, FromInput, Grant, Input, Resource,
    ResourceMention, DATE_FORMAT,
};
use crate::fetch::{self, FetchOptions};
use crate::storage::{delete_where, upsert, Filters, Session, UpsertOptions};
use crate::Result;

/// A publication, unique by (pubmed_id, pmc_id)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub pubmed_id: Option<i64>,
    pub pmc_id: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub authors: Option<String>,
    pub affiliation: Option<String>,
    pub affiliation_countries: Option<String>,
    pub citation_count: Option<i64>,
    pub keywords: Option<String>,
    /// `None` when not loaded
    pub grants: Option<Vec<Grant>>,
}

impl Publication {
    pub fn new(title: impl Into<String>, authors: impl Into<String>, citation_count: i64) -> Self {
        Self {
            title: Some(title.into()),
            authors: Some(authors.into()),
            citation_count: Some(citation_count),
            ..Self::default()
        }
    }

    pub fn with_pubmed_id(mut self, pubmed_id: i64) -> Self {
        self.pubmed_id = Some(pubmed_id);
        self
    }

    pub fn with_pmc_id(mut self, pmc_id: impl Into<String>) -> Self {
        self.pmc_id = Some(pmc_id.into());
        self
    }

    pub fn with_grants(mut self, grants: Vec<Grant>) -> Self {
        self.grants = Some(grants);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.as_deref().is_none_or(str::is_empty) {
            return Err(missing(Self::KIND, "a title"));
        }
        if self.authors.as_deref().is_none_or(str::is_empty) {
            return Err(missing(Self::KIND, "authors"));
        }
        if self.citation_count.is_none() {
            return Err(missing(Self::KIND, "a citation count"));
        }
        Ok(())
    }

    /// Upsert (long values offloaded), then grants and their links
    pub fn write(&mut self, session: &Session<'_>) -> Result<i64> {
        self.validate()?;
        let row = row_of([
            ("id", self.id.into()),
            ("title", self.title.clone().into()),
            ("pubmed_id", self.pubmed_id.into()),
            ("pmc_id", self.pmc_id.clone().into()),
            (
                "publication_date",
                self.publication_date.map(|d| d.format(DATE_FORMAT).to_string()).into(),
            ),
            ("authors", self.authors.clone().into()),
            ("affiliation", self.affiliation.clone().into()),
            ("affiliation_countries", self.affiliation_countries.clone().into()),
            ("citation_count", self.citation_count.into()),
            ("keywords", self.keywords.clone().into()),
        ]);
        let id = upsert(session, "publication", &row, UpsertOptions::offload())?;
        self.id = Some(id);

        for grant in self.grants.iter_mut().flatten() {
            let grant_id = match grant.id {
                Some(grant_id) => grant_id,
                None => grant.write(session)?,
            };
            let link = row_of([("publication_id", id.into()), ("grant_id", grant_id.into())]);
            upsert(session, "publication_grant", &link, UpsertOptions::default())?;
        }
        Ok(id)
    }

    /// Remove the publication's grant and resource links, then the row
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        session.atomically("publication", |session| {
            for table in ["publication_grant", "resource_publication", "accession_publication", "resource_mention"] {
                delete_where(session, table, &Filters::new().eq("publication_id", id))?;
            }
            delete_where(session, "publication", &Filters::new().eq("id", id))
        })
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<Publication>> {
        Self::fetch_one(session, Filters::new().eq("id", id))
    }

    pub fn fetch_by_pubmed_id(session: &Session<'_>, pubmed_id: i64) -> Result<Option<Publication>> {
        Self::fetch_one(session, Filters::new().eq("pubmed_id", pubmed_id))
    }

    pub fn fetch_by_pmc_id(session: &Session<'_>, pmc_id: &str) -> Result<Option<Publication>> {
        Self::fetch_one(session, Filters::new().eq("pmc_id", pmc_id))
    }

    fn fetch_one(session: &Session<'_>, filters: Filters) -> Result<Option<Publication>> {
        fetch::fetch_publication(session, &filters, &FetchOptions::default()).map(|found| found.into_first())
    }

    /// Accessions citing this publication
    pub fn accessions(&self, session: &Session<'_>) -> Result<Vec<Accession>> {
        match self.id {
            Some(id) => Accession::fetch_by_publication(session, id),
            None => Ok(Vec::new()),
        }
    }

    /// Resource mentions found in this publication
    pub fn mentions(&self, session: &Session<'_>) -> Result<Vec<ResourceMention>> {
        match self.id {
            Some(id) => ResourceMention::fetch_by_publication_id(session, id),
            None => Ok(Vec::new()),
        }
    }

    /// Resources mentioned by this publication, first mention first
    pub fn references_resources(&self, session: &Session<'_>) -> Result<Vec<Resource>> {
        let mut resources: Vec<Resource> = Vec::new();
        for mention in self.mentions(session)? {
            let Some(resource) = mention.resource else { continue };
            if resource.id.is_some() && resources.iter().any(|r| r.id == resource.id) {
                continue;
            }
            resources.push(resource);
        }
        Ok(resources)
    }
}

impl FromInput for Publication {
    const KIND: &'static str = "publication";

    fn from_input(input: &Input) -> Result<Self> {
        Ok(Self {
            id: int_field(input, &["id", "publication_id"]),
            title: text_field(input, &["title", "publication_title"]),
            pubmed_id: input.int("pubmed_id"),
            pmc_id: input.text("pmc_id").filter(|s| !s.is_empty()),
            publication_date: date_field(input, &["publication_date"])?,
            authors: input.text("authors"),
            affiliation: input.text("affiliation"),
            affiliation_countries: input.text("affiliation_countries"),
            citation_count: input.int("citation_count"),
            keywords: input.text("keywords"),
            grants: grants_from_input(input)?,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Publication(p) => Some(p.as_ref().clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title.as_deref().unwrap_or("<untitled>"))?;
        match (self.pubmed_id, &self.pmc_id) {
            (Some(pmid), _) => write!(f, " [PMID {}]", pmid),
            (None, Some(pmc)) => write!(f, " [{}]", pmc),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::GrantAgency;
    use crate::storage::SqliteStore;
    use crate::Error;
    use serde_json::json;

    fn article() -> Publication {
        Publication::new("UniProt: the universal protein knowledgebase", "UniProt Consortium", 1500)
            .with_pubmed_id(33237286)
            .with_pmc_id("PMC7779004")
    }

    #[test]
    fn test_from_input_rules() {
        let input = Input::from_json(json!({
            "publication_title": "A title",
            "pubmed_id": "123",
            "pmc_id": "",
            "authors": ["Smith J", "Doe A"],
            "keywords": ["proteins", "databases"],
            "citation_count": 4,
            "publication_date": "2021-01-05"
        }))
        .unwrap();
        let publication = Publication::from_input(&input).unwrap();
        assert_eq!(publication.title.as_deref(), Some("A title"));
        assert_eq!(publication.pubmed_id, Some(123));
        assert_eq!(publication.pmc_id, None);
        assert_eq!(publication.authors.as_deref(), Some("Smith J; Doe A"));
        assert_eq!(publication.keywords.as_deref(), Some("proteins; databases"));
        assert_eq!(publication.grants, None);
    }

    #[test]
    fn test_write_validates_required_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();

        let mut untitled = Publication {
            title: None,
            ..article()
        };
        assert!(matches!(untitled.write(&session), Err(Error::Validation(_))));
        let mut uncounted = Publication {
            citation_count: None,
            ..article()
        };
        assert!(matches!(uncounted.write(&session), Err(Error::Validation(_))));
        let mut anonymous = Publication {
            authors: Some(String::new()),
            ..article()
        };
        assert!(anonymous.write(&session).is_err());
        assert_eq!(store.count("publication").unwrap(), 0);
    }

    #[test]
    fn test_write_with_grants_and_fetch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();

        let mut publication = article().with_grants(vec![Grant::new("WT-1", GrantAgency::new("Wellcome Trust"))]);
        let id = publication.write(&session).unwrap();
        assert_eq!(publication.clone().write(&session).unwrap(), id);
        assert_eq!(store.count("publication_grant").unwrap(), 1);

        let fetched = Publication::fetch_by_pmc_id(&session, "PMC7779004").unwrap().unwrap();
        assert_eq!(fetched, publication);
        assert_eq!(Publication::fetch_by_pubmed_id(&session, 33237286).unwrap().unwrap().id, Some(id));
        assert!(Publication::fetch_by_id(&session, id + 10).unwrap().is_none());
    }

    #[test]
    fn test_long_keywords_are_offloaded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut publication = article();
        publication.keywords = Some("keyword; ".repeat(400));
        let id = publication.write(&session).unwrap();

        let fetched = Publication::fetch_by_id(&session, id).unwrap().unwrap();
        let token = fetched.keywords.unwrap();
        assert!(token.starts_with("long_text("));
        let text_id = crate::storage::long_text_id(&token).unwrap();
        assert_eq!(
            crate::fetch::fetch_long_text(&session, text_id).unwrap(),
            publication.keywords
        );
    }

    #[test]
    fn test_delete_removes_links() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut publication = article().with_grants(vec![Grant::new("G", GrantAgency::new("NIH"))]);
        publication.write(&session).unwrap();

        assert_eq!(publication.delete(&session).unwrap(), 1);
        assert_eq!(store.count("publication_grant").unwrap(), 0);
        assert_eq!(store.count("grant").unwrap(), 1);
    }

    #[test]
    fn test_delete_cited_publication() {
        use crate::entity::{Accession, MatchedAlias, Resource, ResourceMention, Version};
        use chrono::NaiveDate;

        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut publication = article().with_grants(vec![Grant::new("G", GrantAgency::new("NIH"))]);
        publication.write(&session).unwrap();
        let mut resource = Resource::new("uniprot").with_publications(vec![publication.clone()]);
        resource.write(&session, false).unwrap();

        Accession::new("P12345")
            .with_resource(resource.clone())
            .with_publication(publication.clone())
            .write(&session)
            .unwrap();
        ResourceMention::new(
            Some(publication.clone()),
            Some(resource.clone()),
            Some(Version::new("run", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
            vec![MatchedAlias::new("UniProt", 1, 1.0)],
        )
        .write(&session)
        .unwrap();

        assert_eq!(publication.delete(&session).unwrap(), 1);
        assert_eq!(store.count("publication").unwrap(), 0);
        for table in ["resource_publication", "publication_grant", "accession_publication", "resource_mention"] {
            assert_eq!(store.count(table).unwrap(), 0, "{}", table);
        }
        assert_eq!(store.count("accession").unwrap(), 1);
        assert_eq!(store.count("resource").unwrap(), 1);
    }

    #[test]
    fn test_failed_delete_leaves_links_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut publication = article().with_grants(vec![Grant::new("G", GrantAgency::new("NIH"))]);
        publication.write(&session).unwrap();

        // the row delete fails after the links were removed
        store
            .connection()
            .execute_batch("CREATE TRIGGER keep_publication BEFORE DELETE ON publication BEGIN SELECT RAISE(ABORT, 'kept'); END;")
            .unwrap();
        assert!(publication.delete(&session).is_err());
        assert_eq!(store.count("publication").unwrap(), 1);
        assert_eq!(store.count("publication_grant").unwrap(), 1);
        assert!(store.connection().is_autocommit());
    }
}
