//! Fetch layer - rebuild typed entity graphs from flat rows
//!
//! Each `fetch_<entity>` queries its table, resolves singular sub-entities by their
//! foreign-key id, and (when `expanded`) follows junction tables to batch-load the
//! linked lists. Accessions and resource mentions fold several rows into one entity.

pub mod cache;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::entity::{
    Accession, ConnectionStatus, FromInput, Grant, GrantAgency, Input, MatchedAlias, Publication, Resource,
    ResourceMention, Url, Version,
};
use crate::storage::{select_where, Filters, Row, Select, Session};
use crate::{Error, Result};

pub use cache::FetchCache;

/// Zero, one or several fetched entities
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fetched<T> {
    Empty,
    One(T),
    Many(Vec<T>),
}

impl<T> Fetched<T> {
    pub fn from_vec(mut items: Vec<T>) -> Self {
        match items.len() {
            0 => Fetched::Empty,
            1 => Fetched::One(items.remove(0)),
            _ => Fetched::Many(items),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Fetched::Empty => Vec::new(),
            Fetched::One(item) => vec![item],
            Fetched::Many(items) => items,
        }
    }

    pub fn into_first(self) -> Option<T> {
        self.into_vec().into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Fetched::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            Fetched::Empty => 0,
            Fetched::One(_) => 1,
            Fetched::Many(items) => items.len(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Fetched::Empty => [].iter(),
            Fetched::One(item) => std::slice::from_ref(item).iter(),
            Fetched::Many(items) => items.iter(),
        }
    }
}

/// How far a fetch follows links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Follow junction tables (publications, grants)
    pub expanded: bool,
    /// Overrides the entity's default ordering
    pub order_by: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            expanded: true,
            order_by: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn shallow() -> Self {
        Self {
            expanded: false,
            ..Self::default()
        }
    }

    pub fn ordered_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = columns.into_iter().map(Into::into).collect();
        self
    }
}

fn select_rows(
    session: &Session<'_>,
    table: &str,
    filters: &Filters,
    options: &FetchOptions,
    default_order: &[&str],
) -> Result<Vec<Row>> {
    let order: Vec<String> = if options.order_by.is_empty() {
        default_order.iter().map(|c| c.to_string()).collect()
    } else {
        options.order_by.clone()
    };
    select_where(session, &Select::from(table).filters(filters.clone()).order_by(order))
}

fn row_id(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

/// Ids on the far side of a junction table
fn linked_ids(session: &Session<'_>, junction: &str, owner: &str, owner_id: i64, target: &str) -> Result<Vec<i64>> {
    let rows = select_where(
        session,
        &Select::from(junction)
            .filters(Filters::new().eq(owner, owner_id))
            .order_by([target]),
    )?;
    Ok(rows.iter().filter_map(|r| row_id(r, target)).collect())
}

fn id_filter(ids: &[i64]) -> Filters {
    Filters::new().eq("id", ids.to_vec())
}

// ========== Leaf entities ==========

pub fn fetch_version(session: &Session<'_>, filters: &Filters, options: &FetchOptions) -> Result<Fetched<Version>> {
    let rows = select_rows(session, "version", filters, options, &["id"])?;
    let versions = rows
        .iter()
        .map(|row| Version::from_input(&Input::from_row(row)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Fetched::from_vec(versions))
}

pub fn fetch_grant_agency(
    session: &Session<'_>,
    filters: &Filters,
    options: &FetchOptions,
) -> Result<Fetched<GrantAgency>> {
    let rows = select_rows(session, "grant_agency", filters, options, &["id"])?;
    let agencies = rows
        .iter()
        .map(|row| GrantAgency::from_input(&Input::from_row(row)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Fetched::from_vec(agencies))
}

pub fn fetch_connection_status(
    session: &Session<'_>,
    filters: &Filters,
    options: &FetchOptions,
) -> Result<Fetched<ConnectionStatus>> {
    let rows = select_rows(session, "connection_status", filters, options, &["url_id", "date"])?;
    let statuses = rows
        .iter()
        .map(|row| ConnectionStatus::from_input(&Input::from_row(row)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Fetched::from_vec(statuses))
}

/// Statuses of one URL, latest first, then newest first
pub fn fetch_statuses_of(session: &Session<'_>, url_id: i64) -> Result<Vec<ConnectionStatus>> {
    let options = FetchOptions::default().ordered_by(["is_latest", "date"]);
    let mut statuses = fetch_connection_status(session, &Filters::new().eq("url_id", url_id), &options)?.into_vec();
    statuses.reverse();
    Ok(statuses)
}

pub fn fetch_url(session: &Session<'_>, filters: &Filters, options: &FetchOptions) -> Result<Fetched<Url>> {
    let rows = select_rows(session, "url", filters, options, &["id"])?;
    let mut urls = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut url = Url::from_input(&Input::from_row(row))?;
        if let Some(id) = url.id {
            url.status = fetch_statuses_of(session, id)?;
        }
        urls.push(url);
    }
    Ok(Fetched::from_vec(urls))
}

/// Text stored in `long_text` under `id`
pub fn fetch_long_text(session: &Session<'_>, id: i64) -> Result<Option<String>> {
    let rows = select_where(session, &Select::from("long_text").filters(Filters::new().eq("id", id)))?;
    Ok(rows
        .first()
        .and_then(|row| row.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

// ========== Funding and literature ==========

pub fn fetch_grant(session: &Session<'_>, filters: &Filters, options: &FetchOptions) -> Result<Fetched<Grant>> {
    let mut cache = FetchCache::new();
    let rows = select_rows(session, "grant", filters, options, &["id"])?;
    let mut grants = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut grant = Grant::from_input(&Input::from_row(row))?;
        if let Some(agency_id) = grant.grant_agency.id {
            let agency = cache.get_or_load(FetchCache::key("agency", agency_id), || {
                fetch_grant_agency(session, &Filters::new().eq("id", agency_id), options).map(Fetched::into_first)
            })?;
            if let Some(agency) = agency {
                grant.grant_agency = agency;
            }
        }
        grants.push(grant);
    }
    Ok(Fetched::from_vec(grants))
}

pub fn fetch_publication(
    session: &Session<'_>,
    filters: &Filters,
    options: &FetchOptions,
) -> Result<Fetched<Publication>> {
    let rows = select_rows(session, "publication", filters, options, &["id"])?;
    let mut publications = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut publication = Publication::from_input(&Input::from_row(row))?;
        publication.grants = match (options.expanded, publication.id) {
            (true, Some(id)) => {
                let ids = linked_ids(session, "publication_grant", "publication_id", id, "grant_id")?;
                Some(batch(session, &ids, fetch_grant)?)
            }
            _ => None,
        };
        publications.push(publication);
    }
    Ok(Fetched::from_vec(publications))
}

/// Entities with the given ids, id order; nothing is queried for an empty list
fn batch<T>(
    session: &Session<'_>,
    ids: &[i64],
    fetch: fn(&Session<'_>, &Filters, &FetchOptions) -> Result<Fetched<T>>,
) -> Result<Vec<T>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    fetch(session, &id_filter(ids), &FetchOptions::default()).map(Fetched::into_vec)
}

// ========== Resources ==========

pub fn fetch_resource(session: &Session<'_>, filters: &Filters, options: &FetchOptions) -> Result<Fetched<Resource>> {
    let mut cache = FetchCache::new();
    let rows = select_rows(session, "resource", filters, options, &["id"])?;
    let mut resources = Vec::with_capacity(rows.len());
    for row in &rows {
        resources.push(resource_from_row(session, row, options, &mut cache)?);
    }
    Ok(Fetched::from_vec(resources))
}

fn resource_from_row(
    session: &Session<'_>,
    row: &Row,
    options: &FetchOptions,
    cache: &mut FetchCache,
) -> Result<Resource> {
    let mut resource = Resource::from_input(&Input::from_row(row))?;

    resource.url = match row_id(row, "url_id") {
        Some(url_id) => cache.get_or_load(FetchCache::key("url", url_id), || {
            fetch_url(session, &Filters::new().eq("id", url_id), options).map(Fetched::into_first)
        })?,
        None => None,
    };
    resource.version = match row_id(row, "version_id") {
        Some(version_id) => cache.get_or_load(FetchCache::key("ver", version_id), || {
            fetch_version(session, &Filters::new().eq("id", version_id), options).map(Fetched::into_first)
        })?,
        None => None,
    };

    match (options.expanded, resource.id) {
        (true, Some(id)) => {
            let publication_ids = linked_ids(session, "resource_publication", "resource_id", id, "publication_id")?;
            let grant_ids = linked_ids(session, "resource_grant", "resource_id", id, "grant_id")?;
            resource.publications = Some(batch(session, &publication_ids, fetch_publication)?);
            resource.grants = Some(batch(session, &grant_ids, fetch_grant)?);
        }
        _ => {
            resource.publications = None;
            resource.grants = None;
        }
    }
    Ok(resource)
}

// ========== Aggregated entities ==========

const ACCESSION_PREFIX: &str = "accession_";
const ACCESSION_LINK_PREFIX: &str = "accession_publication_";

/// Accessions grouped from `accession ⋈ accession_publication`, sorted by accession.
///
/// Filters may name columns of either table (e.g. `resource_id`, `publication_id`).
/// Resource and version are loaded once per id; publications are batch-loaded when
/// `expanded`, otherwise listed by id only.
pub fn fetch_accession(session: &Session<'_>, filters: &Filters, options: &FetchOptions) -> Result<Vec<Accession>> {
    let conn = session.conn();
    let accession_columns = session.catalog().column_names(conn, "accession")?;
    let link_columns = session.catalog().column_names(conn, "accession_publication")?;
    let label = |column: &str| -> Option<String> {
        if accession_columns.iter().any(|c| c == column) {
            Some(format!("{}{}", ACCESSION_PREFIX, column))
        } else if link_columns.iter().any(|c| c == column) {
            Some(format!("{}{}", ACCESSION_LINK_PREFIX, column))
        } else {
            None
        }
    };

    let mut joined = Filters::new();
    for (column, value) in filters.iter() {
        let labelled = label(column).ok_or_else(|| Error::UnknownColumn {
            table: "accession".to_string(),
            column: column.to_string(),
        })?;
        joined.push(labelled, value.clone());
    }

    let rows = select_where(
        session,
        &Select::from("accession")
            .join("accession_publication")
            .filters(joined)
            .order_by(["accession_accession", "accession_publication_publication_id"]),
    )?;

    let mut groups: BTreeMap<String, (Row, BTreeSet<i64>)> = BTreeMap::new();
    for row in rows {
        let mut base = Row::new();
        let mut publication_id = None;
        for (key, value) in row {
            // the junction prefix extends the base one, so it is stripped first
            if let Some(column) = key.strip_prefix(ACCESSION_LINK_PREFIX) {
                if column == "publication_id" {
                    publication_id = value.as_i64();
                }
            } else if let Some(column) = key.strip_prefix(ACCESSION_PREFIX) {
                base.insert(column.to_string(), value);
            }
        }
        let Some(name) = base.get("accession").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let group = groups.entry(name).or_insert_with(|| (base, BTreeSet::new()));
        group.1.extend(publication_id);
    }

    let all_ids: Vec<i64> = groups
        .values()
        .flat_map(|(_, ids)| ids.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let publications: HashMap<i64, Publication> = if options.expanded {
        batch(session, &all_ids, fetch_publication)?
            .into_iter()
            .filter_map(|p| p.id.map(|id| (id, p)))
            .collect()
    } else {
        HashMap::new()
    };

    let mut cache = FetchCache::new();
    let mut accessions = Vec::with_capacity(groups.len());
    for (_, (base, ids)) in groups {
        let mut accession = Accession::from_input(&Input::from_row(&base))?;
        accession.resource = match row_id(&base, "resource_id") {
            Some(resource_id) => cache.get_or_load(FetchCache::key("res", resource_id), || {
                fetch_resource(session, &Filters::new().eq("id", resource_id), &FetchOptions::shallow())
                    .map(Fetched::into_first)
            })?,
            None => None,
        };
        accession.version = match row_id(&base, "version_id") {
            Some(version_id) => cache.get_or_load(FetchCache::key("ver", version_id), || {
                fetch_version(session, &Filters::new().eq("id", version_id), options).map(Fetched::into_first)
            })?,
            None => None,
        };
        accession.publications = ids
            .iter()
            .filter_map(|id| {
                if options.expanded {
                    publications.get(id).cloned()
                } else {
                    Some(Publication {
                        id: Some(*id),
                        ..Publication::default()
                    })
                }
            })
            .collect();
        accessions.push(accession);
    }
    Ok(accessions)
}

/// Mentions grouped by (publication, resource, version) in first-seen order.
///
/// Rows come ordered by publication, resource and match count; aliases are listed
/// highest count first. Shared publications, resources and versions load once.
pub fn fetch_resource_mention(
    session: &Session<'_>,
    filters: &Filters,
    options: &FetchOptions,
) -> Result<Vec<ResourceMention>> {
    let rows = select_rows(
        session,
        "resource_mention",
        filters,
        &FetchOptions {
            order_by: Vec::new(),
            ..options.clone()
        },
        &["publication_id", "resource_id", "match_count"],
    )?;

    let mut order: Vec<(i64, i64, i64)> = Vec::new();
    let mut groups: HashMap<(i64, i64, i64), Vec<MatchedAlias>> = HashMap::new();
    for row in &rows {
        let (Some(publication_id), Some(resource_id), Some(version_id)) = (
            row_id(row, "publication_id"),
            row_id(row, "resource_id"),
            row_id(row, "version_id"),
        ) else {
            continue;
        };
        let key = (publication_id, resource_id, version_id);
        let alias = MatchedAlias::from_input(&Input::from_row(row))?;
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(alias);
    }

    let mut cache = FetchCache::new();
    let mut mentions = Vec::with_capacity(order.len());
    for key in order {
        let (publication_id, resource_id, version_id) = key;
        let mut aliases = groups.remove(&key).unwrap_or_default();
        aliases.reverse();

        let publication = cache.get_or_load(FetchCache::key("pub", publication_id), || {
            fetch_publication(session, &Filters::new().eq("id", publication_id), options).map(Fetched::into_first)
        })?;
        let resource = cache.get_or_load(FetchCache::key("res", resource_id), || {
            fetch_resource(session, &Filters::new().eq("id", resource_id), options).map(Fetched::into_first)
        })?;
        let version = cache.get_or_load(FetchCache::key("ver", version_id), || {
            fetch_version(session, &Filters::new().eq("id", version_id), options).map(Fetched::into_first)
        })?;
        mentions.push(ResourceMention::new(publication, resource, version, aliases));
    }
    tracing::debug!("Built {} mentions from {} rows ({} lookups)", mentions.len(), rows.len(), cache.misses());
    Ok(mentions)
}

// ========== Whole-table fetches ==========

pub fn fetch_all_resources(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Resource>> {
    fetch_resource(session, &Filters::new(), options).map(Fetched::into_vec)
}

/// Resources whose URL answered on its latest check
pub fn fetch_all_online_resources(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Resource>> {
    Ok(fetch_all_resources(session, options)?
        .into_iter()
        .filter(Resource::is_online)
        .collect())
}

pub fn fetch_all_urls(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Url>> {
    fetch_url(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_connection_statuses(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<ConnectionStatus>> {
    fetch_connection_status(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_versions(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Version>> {
    fetch_version(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_publications(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Publication>> {
    fetch_publication(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_grants(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Grant>> {
    fetch_grant(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_grant_agencies(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<GrantAgency>> {
    fetch_grant_agency(session, &Filters::new(), options).map(Fetched::into_vec)
}

pub fn fetch_all_accessions(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<Accession>> {
    fetch_accession(session, &Filters::new(), options)
}

pub fn fetch_all_resource_mentions(session: &Session<'_>, options: &FetchOptions) -> Result<Vec<ResourceMention>> {
    fetch_resource_mention(session, &Filters::new(), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ConnectionStatus;
    use crate::storage::SqliteStore;
    use chrono::NaiveDate;

    fn seed_accessions(store: &SqliteStore) {
        store
            .connection()
            .execute_batch(
                r#"
                INSERT INTO version (id, name, date) VALUES (1, 'run', '2024-01-01');
                INSERT INTO resource (id, short_name, version_id, is_latest) VALUES (7, 'uniprot', 1, 1);
                INSERT INTO publication (id, title, pubmed_id, authors, citation_count) VALUES (432, 'First', 432, 'A', 1);
                INSERT INTO publication (id, title, pubmed_id, authors, citation_count) VALUES (789, 'Second', 789, 'B', 2);
                INSERT INTO accession (accession, resource_id, version_id) VALUES ('acc1.123', 7, 1);
                INSERT INTO accession (accession, resource_id, version_id) VALUES ('acc0.999', 7, 1);
                INSERT INTO accession_publication VALUES ('acc1.123', 789);
                INSERT INTO accession_publication VALUES ('acc1.123', 432);
                INSERT INTO accession_publication VALUES ('acc0.999', 432);
                "#,
            )
            .unwrap();
    }

    #[test]
    fn test_fetched_shapes() {
        assert!(Fetched::<i32>::from_vec(vec![]).is_empty());
        assert_eq!(Fetched::from_vec(vec![1]), Fetched::One(1));
        let many = Fetched::from_vec(vec![1, 2, 3]);
        assert_eq!(many.len(), 3);
        assert_eq!(many.iter().copied().sum::<i32>(), 6);
        assert_eq!(many.into_first(), Some(1));
        assert_eq!(serde_json::to_value(Fetched::<i32>::Empty).unwrap(), Value::Null);
    }

    #[test]
    fn test_accession_grouping() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_accessions(&store);
        let session = store.session();

        let accessions = fetch_all_accessions(&session, &FetchOptions::default()).unwrap();
        let names: Vec<&str> = accessions.iter().filter_map(|a| a.accession.as_deref()).collect();
        assert_eq!(names, vec!["acc0.999", "acc1.123"]);

        let grouped = &accessions[1];
        let ids: Vec<Option<i64>> = grouped.publications.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![Some(432), Some(789)]);
        assert_eq!(grouped.publications[1].title.as_deref(), Some("Second"));
        assert_eq!(grouped.resource.as_ref().unwrap().short_name.as_deref(), Some("uniprot"));
        assert_eq!(grouped.version.as_ref().unwrap().date, NaiveDate::from_ymd_opt(2024, 1, 1));

        let citing = fetch_accession(&session, &Filters::new().eq("publication_id", 789), &FetchOptions::shallow()).unwrap();
        assert_eq!(citing.len(), 1);
        assert_eq!(citing[0].publications.len(), 1);
        assert_eq!(citing[0].publications[0].title, None);

        let unknown = fetch_accession(&session, &Filters::new().eq("colour", "red"), &FetchOptions::default());
        assert!(matches!(unknown, Err(Error::UnknownColumn { .. })));
    }

    #[test]
    fn test_mention_grouping_and_cache() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_accessions(&store);
        store
            .connection()
            .execute_batch(
                r#"
                INSERT INTO resource_mention VALUES (432, 7, 1, 'UniProtKB', 1, 1.0);
                INSERT INTO resource_mention VALUES (432, 7, 1, 'UniProt', 2, 0.9);
                INSERT INTO resource_mention VALUES (789, 7, 1, 'uniprot', 5, 0.7);
                "#,
            )
            .unwrap();
        let session = store.session();

        let mentions = fetch_all_resource_mentions(&session, &FetchOptions::shallow()).unwrap();
        assert_eq!(mentions.len(), 2);
        let first = &mentions[0];
        assert_eq!(first.publication.as_ref().unwrap().id, Some(432));
        assert_eq!(first.match_count, 3);
        assert!((first.mean_confidence - 0.95).abs() < 1e-9);
        let aliases: Vec<&str> = first.matched_aliases.iter().map(|a| a.matched_alias.as_str()).collect();
        assert_eq!(aliases, vec!["UniProt", "UniProtKB"]);
        assert_eq!(mentions[1].match_count, 5);
        assert_eq!(mentions[1].resource, first.resource);
    }

    #[test]
    fn test_url_statuses_latest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let at = |text: &str| crate::entity::parse_datetime("date", text).unwrap();

        let mut url = Url::new("https://www.ebi.ac.uk")
            .with_status(ConnectionStatus::at("200", at("2024-01-01 08:00:00"), false))
            .with_status(ConnectionStatus::at("500", at("2024-03-01 08:00:00"), false))
            .with_status(ConnectionStatus::at("200", at("2024-02-01 08:00:00"), true));
        let id = url.write(&session).unwrap();

        let statuses = fetch_statuses_of(&session, id).unwrap();
        let dates: Vec<String> = statuses.iter().map(|s| s.date.format("%m").to_string()).collect();
        assert_eq!(dates, vec!["02", "03", "01"]);
        assert!(statuses[0].is_latest);

        let online = fetch_all_online_resources(&session, &FetchOptions::shallow()).unwrap();
        assert!(online.is_empty());
        Resource::new("ebi").with_url(url).write(&session, false).unwrap();
        let online = fetch_all_online_resources(&session, &FetchOptions::shallow()).unwrap();
        assert_eq!(online.len(), 1);
    }

    #[test]
    fn test_long_text_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute("INSERT INTO long_text (id, text) VALUES (3, 'overflow')", [])
            .unwrap();
        let session = store.session();
        assert_eq!(fetch_long_text(&session, 3).unwrap().as_deref(), Some("overflow"));
        assert_eq!(fetch_long_text(&session, 4).unwrap(), None);
    }
}
