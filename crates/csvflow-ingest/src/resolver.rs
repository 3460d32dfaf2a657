//! Resolvers mapping a logical file name to its load schema and transform unit

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::warehouse::{ColumnSchema, JobLoadMetadata, TransformUnit};

/// Maps a logical file name to warehouse column schema and load options
pub trait SchemaResolver: Send + Sync {
    fn has_schema(&self, name: &str) -> bool;

    fn job_metadata(&self, name: &str) -> Result<JobLoadMetadata>;
}

/// Maps a logical file name to its transform unit
pub trait TransformResolver: Send + Sync {
    fn has_unit(&self, name: &str) -> bool;

    fn unit_for(&self, name: &str) -> TransformUnit;
}

/// Reads `<dir>/<name>.json` schema files
///
/// Both a bare column list and an object with a `fields` array are accepted:
///
/// ```json
/// [{ "name": "store_id", "type": "INTEGER", "mode": "REQUIRED" },
///  { "name": "amount", "type": "FLOAT" }]
/// ```
#[derive(Debug, Clone)]
pub struct JsonSchemaResolver {
    dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Columns(Vec<ColumnSchema>),
    Fields { fields: Vec<ColumnSchema> },
}

impl JsonSchemaResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl SchemaResolver for JsonSchemaResolver {
    fn has_schema(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn job_metadata(&self, name: &str) -> Result<JobLoadMetadata> {
        let path = self.path(name);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read schema {}", path.display()))?;

        let columns = match serde_json::from_str::<SchemaFile>(&content)
            .with_context(|| format!("Invalid schema file {}", path.display()))?
        {
            SchemaFile::Columns(columns) => columns,
            SchemaFile::Fields { fields } => fields,
        };

        if columns.is_empty() {
            anyhow::bail!("Schema {} declares no columns", path.display());
        }

        Ok(JobLoadMetadata::csv(columns))
    }
}

/// Resolves `<dir>/<name>.sql`
#[derive(Debug, Clone)]
pub struct SqlFileResolver {
    dir: PathBuf,
}

impl SqlFileResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TransformResolver for SqlFileResolver {
    fn has_unit(&self, name: &str) -> bool {
        self.unit_for(name).path.is_file()
    }

    fn unit_for(&self, name: &str) -> TransformUnit {
        TransformUnit {
            name: name.to_string(),
            path: self.dir.join(format!("{}.sql", name)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::WriteDisposition;

    #[test]
    fn test_json_schema_column_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sales.json"),
            r#"[{"name": "store_id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "amount", "type": "FLOAT"}]"#,
        )
        .unwrap();

        let resolver = JsonSchemaResolver::new(dir.path());
        assert!(resolver.has_schema("sales"));
        assert!(!resolver.has_schema("customers"));

        let metadata = resolver.job_metadata("sales").unwrap();
        assert_eq!(metadata.schema.len(), 2);
        assert!(metadata.schema[0].is_required());
        assert_eq!(metadata.schema[1].mode, "NULLABLE");
        assert_eq!(metadata.skip_leading_rows, 1);
        assert_eq!(metadata.write_disposition, WriteDisposition::WriteTruncate);
    }

    #[test]
    fn test_json_schema_fields_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("customers.json"),
            r#"{"fields": [{"name": "id", "type": "STRING"}]}"#,
        )
        .unwrap();

        let metadata = JsonSchemaResolver::new(dir.path())
            .job_metadata("customers")
            .unwrap();
        assert_eq!(metadata.schema[0].name, "id");
    }

    #[test]
    fn test_json_schema_rejects_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.json"), "[]").unwrap();

        let resolver = JsonSchemaResolver::new(dir.path());
        assert!(resolver.job_metadata("empty").is_err());
        assert!(resolver.job_metadata("missing").is_err());
    }

    #[test]
    fn test_sql_file_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.sql"), "SELECT 1;").unwrap();

        let resolver = SqlFileResolver::new(dir.path());
        assert!(resolver.has_unit("sales"));
        assert!(!resolver.has_unit("customers"));
        assert_eq!(resolver.unit_for("sales").path, dir.path().join("sales.sql"));
    }
}
