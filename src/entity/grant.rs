//! Grant and GrantAgency - funding of resources and publications
//!
//! Agencies are deduplicated by the BLAKE3 digest of their name. The agency
//! hierarchy is stored as plain ids and resolved lazily; cycles are not detected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{int_field, missing, row_of, Entity, Field, FromInput, Input};
use crate::fetch::{self, FetchOptions};
use crate::storage::{delete_where, upsert, Filters, Session, UpsertOptions};
use crate::{Error, Result};

/// A funding body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantAgency {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub country: Option<String>,
    pub parent_agency_id: Option<i64>,
    pub representative_agency_id: Option<i64>,
}

impl GrantAgency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Hex BLAKE3 digest of the name, the agency's unique key
    pub fn name_hash(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(|name| blake3::hash(name.as_bytes()).to_hex().to_string())
    }

    pub fn write(&mut self, session: &Session<'_>) -> Result<i64> {
        if self.id.is_none() && self.name.is_none() {
            return Err(missing(Self::KIND, "a name or an id"));
        }
        let row = row_of([
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("name_hash", self.name_hash().into()),
            ("country", self.country.clone().into()),
            ("parent_agency_id", self.parent_agency_id.into()),
            ("representative_agency_id", self.representative_agency_id.into()),
        ]);
        let id = upsert(session, "grant_agency", &row, UpsertOptions::offload())?;
        self.id = Some(id);
        Ok(id)
    }

    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        delete_where(session, "grant_agency", &Filters::new().eq("id", id))
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<GrantAgency>> {
        fetch::fetch_grant_agency(session, &Filters::new().eq("id", id), &FetchOptions::default())
            .map(|found| found.into_first())
    }

    pub fn fetch_by_name(session: &Session<'_>, name: &str) -> Result<Option<GrantAgency>> {
        let hash = GrantAgency::new(name).name_hash();
        fetch::fetch_grant_agency(session, &Filters::new().eq("name_hash", hash), &FetchOptions::default())
            .map(|found| found.into_first())
    }

    /// The parent agency, loaded on demand
    pub fn parent(&self, session: &Session<'_>) -> Result<Option<GrantAgency>> {
        match self.parent_agency_id {
            Some(id) => Self::fetch_by_id(session, id),
            None => Ok(None),
        }
    }

    /// The representative agency, loaded on demand
    pub fn representative(&self, session: &Session<'_>) -> Result<Option<GrantAgency>> {
        match self.representative_agency_id {
            Some(id) => Self::fetch_by_id(session, id),
            None => Ok(None),
        }
    }
}

/// Id of a related agency given as an id, a built agency or a nested object
fn agency_ref(input: &Input, id_key: &str, entity_key: &str) -> Result<Option<i64>> {
    if let Some(id) = input.int(id_key) {
        return Ok(Some(id));
    }
    Ok(input.one::<GrantAgency>(entity_key)?.and_then(|a| a.id))
}

impl FromInput for GrantAgency {
    const KIND: &'static str = "grant_agency";

    fn from_input(input: &Input) -> Result<Self> {
        Ok(Self {
            id: int_field(input, &["id", "grant_agency_id"]),
            name: input.text("name"),
            country: input.text("country"),
            parent_agency_id: agency_ref(input, "parent_agency_id", "parent_agency")?,
            representative_agency_id: agency_ref(input, "representative_agency_id", "representative_agency")?,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::GrantAgency(a) => Some(a.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantAgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("<unnamed agency>"))?;
        if let Some(country) = &self.country {
            write!(f, " ({})", country)?;
        }
        Ok(())
    }
}

/// A grant awarded by one agency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: Option<i64>,
    pub ext_grant_id: Option<String>,
    pub grant_agency: GrantAgency,
}

impl Grant {
    pub fn new(ext_grant_id: impl Into<String>, grant_agency: GrantAgency) -> Self {
        Self {
            id: None,
            ext_grant_id: Some(ext_grant_id.into()),
            grant_agency,
        }
    }

    /// Write the agency first, then the grant
    pub fn write(&mut self, session: &Session<'_>) -> Result<i64> {
        let agency_id = match self.grant_agency.id {
            Some(id) if self.grant_agency.name.is_none() => id,
            _ => self.grant_agency.write(session)?,
        };
        let row = row_of([
            ("id", self.id.into()),
            ("ext_grant_id", self.ext_grant_id.clone().into()),
            ("grant_agency_id", agency_id.into()),
        ]);
        let id = upsert(session, "grant", &row, UpsertOptions::default())?;
        self.id = Some(id);
        Ok(id)
    }

    /// Remove the grant's links, then the grant
    pub fn delete(&self, session: &Session<'_>) -> Result<usize> {
        let id = self.id.ok_or_else(|| missing(Self::KIND, "an id to delete"))?;
        session.atomically("grant", |session| {
            delete_where(session, "resource_grant", &Filters::new().eq("grant_id", id))?;
            delete_where(session, "publication_grant", &Filters::new().eq("grant_id", id))?;
            delete_where(session, "grant", &Filters::new().eq("id", id))
        })
    }

    pub fn fetch_by_id(session: &Session<'_>, id: i64) -> Result<Option<Grant>> {
        fetch::fetch_grant(session, &Filters::new().eq("id", id), &FetchOptions::default())
            .map(|found| found.into_first())
    }

    /// Grants with this external id, across agencies
    pub fn fetch_by_ext_id(session: &Session<'_>, ext_grant_id: &str) -> Result<Vec<Grant>> {
        fetch::fetch_grant(session, &Filters::new().eq("ext_grant_id", ext_grant_id), &FetchOptions::default())
            .map(|found| found.into_vec())
    }

    pub fn fetch_by_grant_agency_id(session: &Session<'_>, agency_id: i64) -> Result<Vec<Grant>> {
        fetch::fetch_grant(session, &Filters::new().eq("grant_agency_id", agency_id), &FetchOptions::default())
            .map(|found| found.into_vec())
    }
}

impl FromInput for Grant {
    const KIND: &'static str = "grant";

    fn from_input(input: &Input) -> Result<Self> {
        let grant_agency = match input.get("grant_agency") {
            Some(Field::Raw(Value::String(name))) => GrantAgency::new(name.clone()),
            Some(Field::Raw(Value::Null)) | None => match input.int("grant_agency_id") {
                Some(id) => GrantAgency {
                    id: Some(id),
                    ..GrantAgency::default()
                },
                None => return Err(missing(Self::KIND, "a grant agency")),
            },
            Some(Field::Entity(Entity::GrantAgency(agency))) => agency.clone(),
            Some(Field::Raw(Value::Object(_))) => input
                .one::<GrantAgency>("grant_agency")?
                .unwrap_or_default(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "grant_agency must be a name or a grant agency, got {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            id: input.int("id"),
            ext_grant_id: input.text("ext_grant_id"),
            grant_agency,
        })
    }

    fn from_entity(entity: &Entity) -> Option<Self> {
        match entity {
            Entity::Grant(g) => Some(g.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {}",
            self.ext_grant_id.as_deref().unwrap_or("<no id>"),
            self.grant_agency
        )
    }
}

/// Grants of a resource or publication input.
///
/// Accepts `grants` as built grants or nested objects; `grants` as a list of names
/// together with flat `ext_grant_id` / `grant_agency`; or the comma-separated
/// `ext_grant_ids` and `grant_agencies` zipped pairwise. `None` when no grant data is given.
pub(crate) fn grants_from_input(input: &Input) -> Result<Option<Vec<Grant>>> {
    if let Some(Field::Raw(Value::Array(items))) = input.get("grants") {
        if !items.is_empty() && items.iter().all(Value::is_string) {
            return Ok(Some(vec![Grant::from_input(&input.without("id"))?]));
        }
    }
    if input.get("grants").is_some() {
        return input.many::<Grant>("grants");
    }

    let (Some(ids), Some(agencies)) = (input.text("ext_grant_ids"), input.text("grant_agencies")) else {
        return Ok(None);
    };
    let split = |text: &str| -> Vec<String> {
        text.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    let grants = split(&ids)
        .into_iter()
        .zip(split(&agencies))
        .map(|(ext_id, agency)| Grant::new(ext_id, GrantAgency::new(agency)))
        .collect();
    Ok(Some(grants))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use serde_json::json;

    #[test]
    fn test_name_hash_is_stable() {
        let a = GrantAgency::new("Wellcome Trust");
        let b = GrantAgency::new("Wellcome Trust");
        assert_eq!(a.name_hash(), b.name_hash());
        assert_eq!(a.name_hash().unwrap().len(), 64);
        assert_ne!(a.name_hash(), GrantAgency::new("NIH").name_hash());
        assert_eq!(GrantAgency::default().name_hash(), None);
    }

    #[test]
    fn test_grant_agency_shapes() {
        let by_name = Grant::from_input(&Input::new().with("ext_grant_id", "G1").with("grant_agency", "NIH")).unwrap();
        assert_eq!(by_name.grant_agency.name.as_deref(), Some("NIH"));

        let nested = Input::new()
            .with("ext_grant_id", "G2")
            .with("grant_agency", json!({"name": "ERC", "country": "EU"}));
        assert_eq!(Grant::from_input(&nested).unwrap().grant_agency.country.as_deref(), Some("EU"));

        let built = Input::new()
            .with("ext_grant_id", "G3")
            .with_entity("grant_agency", GrantAgency::new("MRC"));
        assert_eq!(Grant::from_input(&built).unwrap().grant_agency.name.as_deref(), Some("MRC"));

        let bad = Input::new().with("ext_grant_id", "G4").with("grant_agency", 12);
        assert!(matches!(Grant::from_input(&bad), Err(Error::Validation(_))));
        let wrong_entity = Input::new()
            .with("ext_grant_id", "G5")
            .with_entity("grant_agency", crate::entity::Version::default());
        assert!(Grant::from_input(&wrong_entity).is_err());
    }

    #[test]
    fn test_grants_zipped_from_lists() {
        let input = Input::new()
            .with("ext_grant_ids", "G1, G2,G3")
            .with("grant_agencies", "NIH,ERC");
        let grants = grants_from_input(&input).unwrap().unwrap();
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[1].ext_grant_id.as_deref(), Some("G2"));
        assert_eq!(grants[1].grant_agency.name.as_deref(), Some("ERC"));
        assert!(grants_from_input(&Input::new()).unwrap().is_none());
    }

    #[test]
    fn test_grant_write_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();

        let mut first = Grant::new("G-100", GrantAgency::new("Wellcome Trust").with_country("UK"));
        let mut again = Grant::new("G-100", GrantAgency::new("Wellcome Trust").with_country("UK"));
        let id = first.write(&session).unwrap();
        assert_eq!(again.write(&session).unwrap(), id);
        assert_eq!(first.grant_agency.id, again.grant_agency.id);
        assert_eq!(store.count("grant_agency").unwrap(), 1);

        let fetched = Grant::fetch_by_ext_id(&session, "G-100").unwrap();
        assert_eq!(fetched, vec![first.clone()]);
        let by_agency = Grant::fetch_by_grant_agency_id(&session, first.grant_agency.id.unwrap()).unwrap();
        assert_eq!(by_agency.len(), 1);
    }

    #[test]
    fn test_agency_hierarchy_is_lazy() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();

        let mut parent = GrantAgency::new("NIH");
        let parent_id = parent.write(&session).unwrap();
        let mut child = GrantAgency::new("NCI");
        child.parent_agency_id = Some(parent_id);
        child.representative_agency_id = Some(parent_id);
        child.write(&session).unwrap();

        let fetched = GrantAgency::fetch_by_name(&session, "NCI").unwrap().unwrap();
        assert_eq!(fetched.parent(&session).unwrap(), Some(parent.clone()));
        assert_eq!(fetched.representative(&session).unwrap(), Some(parent.clone()));
        assert_eq!(parent.parent(&session).unwrap(), None);
    }

    #[test]
    fn test_agency_ref_from_built_agency() {
        let parent = GrantAgency {
            id: Some(9),
            ..GrantAgency::new("NIH")
        };
        let input = Input::new().with("name", "NCI").with_entity("parent_agency", parent);
        assert_eq!(GrantAgency::from_input(&input).unwrap().parent_agency_id, Some(9));
    }

    #[test]
    fn test_grant_delete_removes_links() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let mut grant = Grant::new("G-7", GrantAgency::new("ERC"));
        grant.write(&session).unwrap();
        let mut resource = crate::entity::Resource::new("erc-db").with_grants(vec![grant.clone()]);
        resource.write(&session, false).unwrap();
        assert_eq!(store.count("resource_grant").unwrap(), 1);

        assert_eq!(grant.delete(&session).unwrap(), 1);
        assert_eq!(store.count("resource_grant").unwrap(), 0);
        assert_eq!(store.count("resource").unwrap(), 1);
        assert!(Grant::default().delete(&session).is_err());
    }
}
