//! Database schema definitions
//!
//! Declared `VARCHAR(n)` lengths are not enforced by SQLite but are read back by
//! the schema catalog to decide when a value must be offloaded to `long_text`.

/// SQL to create the version table
pub const CREATE_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(255),
    date TEXT,
    user VARCHAR(255),
    additional_metadata TEXT,
    UNIQUE(name, date)
)
"#;

/// SQL to create the url table
pub const CREATE_URL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS url (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url VARCHAR(2048),
    url_country VARCHAR(255),
    url_coordinates VARCHAR(255),
    wayback_url VARCHAR(2048),
    UNIQUE(url)
)
"#;

/// SQL to create the connection_status table
/// One row per ping of a URL; `is_latest` marks the most recent attempt
pub const CREATE_CONNECTION_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS connection_status (
    url_id INTEGER NOT NULL REFERENCES url(id),
    date TEXT NOT NULL,
    status VARCHAR(512),
    is_online INTEGER,
    is_latest INTEGER,
    PRIMARY KEY(url_id, date)
)
"#;

/// SQL to create the resource table
pub const CREATE_RESOURCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS resource (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_name VARCHAR(255),
    common_name VARCHAR(255),
    full_name VARCHAR(512),
    url_id INTEGER REFERENCES url(id),
    version_id INTEGER REFERENCES version(id),
    prediction_metadata TEXT,
    is_gcbr INTEGER,
    is_latest INTEGER,
    UNIQUE(short_name, url_id, version_id)
)
"#;

/// SQL to create the publication table
pub const CREATE_PUBLICATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS publication (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title VARCHAR(1024),
    pubmed_id INTEGER,
    pmc_id VARCHAR(32),
    publication_date TEXT,
    authors TEXT,
    affiliation VARCHAR(4096),
    affiliation_countries VARCHAR(1024),
    citation_count INTEGER,
    keywords VARCHAR(2048),
    UNIQUE(pubmed_id, pmc_id)
)
"#;

/// SQL to create the grant_agency table
pub const CREATE_GRANT_AGENCY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS grant_agency (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(512),
    name_hash CHAR(64),
    country VARCHAR(255),
    parent_agency_id INTEGER REFERENCES grant_agency(id),
    representative_agency_id INTEGER REFERENCES grant_agency(id),
    UNIQUE(name_hash)
)
"#;

/// SQL to create the grant table (quoted: `grant` is a keyword)
pub const CREATE_GRANT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS "grant" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ext_grant_id VARCHAR(255),
    grant_agency_id INTEGER REFERENCES grant_agency(id),
    UNIQUE(ext_grant_id, grant_agency_id)
)
"#;

/// SQL to create the accession table (natural key)
pub const CREATE_ACCESSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accession (
    accession VARCHAR(255) NOT NULL PRIMARY KEY,
    resource_id INTEGER REFERENCES resource(id),
    version_id INTEGER REFERENCES version(id),
    url VARCHAR(2048),
    additional_metadata TEXT
)
"#;

/// SQL to create the resource_mention table
/// One row per matched alias; rows sharing (publication, resource, version) form one mention
pub const CREATE_RESOURCE_MENTION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS resource_mention (
    publication_id INTEGER NOT NULL REFERENCES publication(id),
    resource_id INTEGER NOT NULL REFERENCES resource(id),
    version_id INTEGER NOT NULL REFERENCES version(id),
    matched_alias VARCHAR(255) NOT NULL,
    match_count INTEGER,
    mean_confidence REAL,
    PRIMARY KEY(publication_id, resource_id, version_id, matched_alias)
)
"#;

/// SQL to create the long_text overflow table
pub const CREATE_LONG_TEXT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS long_text (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT
)
"#;

/// Junction tables: (name, left column, left table, right column, right table, right key)
const JUNCTIONS: &[(&str, &str, &str, &str, &str, &str)] = &[
    ("resource_publication", "resource_id", "resource", "publication_id", "publication", "id"),
    ("resource_grant", "resource_id", "resource", "grant_id", "grant", "id"),
    ("publication_grant", "publication_id", "publication", "grant_id", "grant", "id"),
];

/// SQL to create the accession_publication junction table
pub const CREATE_ACCESSION_PUBLICATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accession_publication (
    accession VARCHAR(255) NOT NULL REFERENCES accession(accession),
    publication_id INTEGER NOT NULL REFERENCES publication(id),
    PRIMARY KEY(accession, publication_id)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_resource_short_name ON resource(short_name)",
    "CREATE INDEX IF NOT EXISTS idx_connection_status_url ON connection_status(url_id)",
    "CREATE INDEX IF NOT EXISTS idx_publication_pmc ON publication(pmc_id)",
    "CREATE INDEX IF NOT EXISTS idx_accession_resource ON accession(resource_id)",
    "CREATE INDEX IF NOT EXISTS idx_mention_resource ON resource_mention(resource_id)",
];

/// Every table the store manages, in creation order
pub const TABLES: &[&str] = &[
    "version",
    "url",
    "connection_status",
    "resource",
    "publication",
    "grant_agency",
    "grant",
    "accession",
    "resource_mention",
    "long_text",
    "resource_publication",
    "resource_grant",
    "publication_grant",
    "accession_publication",
];

fn junction_statement(
    (name, left, left_table, right, right_table, right_key): (&str, &str, &str, &str, &str, &str),
) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {name} (
    {left} INTEGER NOT NULL REFERENCES {left_table}(id),
    {right} INTEGER NOT NULL REFERENCES "{right_table}"({right_key}),
    PRIMARY KEY({left}, {right})
)"#
    )
}

/// All schema creation statements
pub fn all_schema_statements() -> Vec<String> {
    let mut stmts: Vec<String> = [
        CREATE_VERSION_TABLE,
        CREATE_URL_TABLE,
        CREATE_CONNECTION_STATUS_TABLE,
        CREATE_RESOURCE_TABLE,
        CREATE_PUBLICATION_TABLE,
        CREATE_GRANT_AGENCY_TABLE,
        CREATE_GRANT_TABLE,
        CREATE_ACCESSION_TABLE,
        CREATE_RESOURCE_MENTION_TABLE,
        CREATE_LONG_TEXT_TABLE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    stmts.extend(JUNCTIONS.iter().copied().map(junction_statement));
    stmts.push(CREATE_ACCESSION_PUBLICATION_TABLE.to_string());
    stmts.extend(CREATE_INDEXES.iter().map(|s| s.to_string()));
    stmts
}
