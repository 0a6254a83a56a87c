//! SQLite stand-in for the warehouse, used with `INGEST_BACKEND=local`.
//!
//! Mirrors the BigQuery load semantics the pipeline relies on: the header row
//! names the columns, types are detected from the data and every load replaces
//! the previous contents of the table. Declared column types use the BigQuery
//! names so the generated LookML is the same in both setups. Gzip-compressed
//! sources are inflated before parsing.

use super::warehouse::{LoadRequest, Warehouse, WarehouseError};
use async_trait::async_trait;
use common::model::column::ColumnDescriptor;
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2}| UTC)?$")
        .unwrap()
});
static INVALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct SqliteWarehouse {
    db_path: PathBuf,
    project_id: String,
    dataset_id: String,
}

impl SqliteWarehouse {
    pub fn new(
        db_path: impl Into<PathBuf>,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, WarehouseError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, WarehouseError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || work(&db_path)).await?
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn load_csv(&self, request: &LoadRequest) -> Result<(), WarehouseError> {
        let source = source_path(&request.source_uri)?;
        let table_id = request.table_id.clone();
        self.blocking(move |db_path| load_blocking(db_path, &source, &table_id))
            .await
    }

    async fn table_columns(&self, table_id: &str) -> Result<Vec<ColumnDescriptor>, WarehouseError> {
        let table_id = table_id.to_string();
        self.blocking(move |db_path| {
            let conn = Connection::open(db_path)?;
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(&table_id)))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnDescriptor::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            if columns.is_empty() {
                return Err(WarehouseError::TableNotFound(table_id));
            }
            Ok(columns)
        })
        .await
    }

    async fn drop_table(&self, table_id: &str) -> Result<(), WarehouseError> {
        let table_id = table_id.to_string();
        self.blocking(move |db_path| {
            let conn = Connection::open(db_path)?;
            conn.execute(&format!("DROP TABLE IF EXISTS {}", quote(&table_id)), [])?;
            Ok(())
        })
        .await
    }

    fn qualified_name(&self, table_id: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset_id, table_id)
    }
}

fn source_path(uri: &str) -> Result<PathBuf, WarehouseError> {
    uri.strip_prefix("file://")
        .map(PathBuf::from)
        .ok_or_else(|| WarehouseError::UnsupportedSource(uri.to_string()))
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn load_blocking(db_path: &Path, source: &Path, table_id: &str) -> Result<(), WarehouseError> {
    let raw = std::fs::read(source)?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
        inflated
    } else {
        raw
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes.as_slice());
    let names = column_names(reader.headers()?);
    let rows = reader
        .records()
        .map(|record| record.map(|r| r.iter().map(|cell| cell.to_string()).collect::<Vec<_>>()))
        .collect::<Result<Vec<_>, _>>()?;
    let types: Vec<&'static str> = (0..names.len())
        .map(|idx| detect_type(rows.iter().map(|row| row[idx].as_str())))
        .collect();

    let mut conn = Connection::open(db_path)?;
    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", quote(table_id)), [])?;

    let definition = names
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quote(name), ty))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute(&format!("CREATE TABLE {} ({})", quote(table_id), definition), [])?;

    {
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} VALUES ({})",
            quote(table_id),
            placeholders
        ))?;
        for row in &rows {
            let values = row
                .iter()
                .map(|cell| (!cell.is_empty()).then_some(cell.as_str()));
            insert.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;

    log::info!(
        "Loaded {} rows into local table {} ({} columns)",
        rows.len(),
        table_id,
        names.len()
    );
    Ok(())
}

/// Header cells turned into unique column identifiers.
fn column_names(headers: &csv::StringRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let mut name = INVALID_NAME_CHARS.replace_all(raw.trim(), "_").to_string();
            if name.is_empty() {
                name = format!("string_field_{}", idx);
            } else if name.starts_with(|c: char| c.is_ascii_digit()) {
                name.insert(0, '_');
            }
            let base = name.clone();
            let mut suffix = 1;
            while !seen.insert(name.to_lowercase()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Narrowest BigQuery type name that fits every non-empty value.
fn detect_type<'a>(values: impl Iterator<Item = &'a str>) -> &'static str {
    let mut boolean = true;
    let mut integer = true;
    let mut float = true;
    let mut date = true;
    let mut timestamp = true;
    let mut any = false;

    for value in values.map(str::trim).filter(|v| !v.is_empty()) {
        any = true;
        boolean &= value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false");
        integer &= value.parse::<i64>().is_ok();
        float &= value.parse::<f64>().is_ok();
        date &= DATE_RE.is_match(value);
        timestamp &= TIMESTAMP_RE.is_match(value);
    }

    if !any {
        "STRING"
    } else if boolean {
        "BOOLEAN"
    } else if integer {
        "INTEGER"
    } else if float {
        "FLOAT"
    } else if date {
        "DATE"
    } else if timestamp {
        "TIMESTAMP"
    } else {
        "STRING"
    }
}
