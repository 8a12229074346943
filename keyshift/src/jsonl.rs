use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MigrateError, Result};

/// File layout `{root}/{model}/{model}_{stage}.jsonl`.
#[derive(Debug, Clone)]
pub struct ExportLayout {
    root: PathBuf,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, model: &str) -> PathBuf {
        self.root.join(model)
    }

    pub fn dump_path(&self, model: &str) -> PathBuf {
        self.model_dir(model).join(format!("{model}_dump.jsonl"))
    }

    pub fn transformed_path(&self, model: &str) -> PathBuf {
        self.model_dir(model)
            .join(format!("{model}_transformed.jsonl"))
    }

    pub fn indexes_path(&self, model: &str) -> PathBuf {
        self.model_dir(model).join(format!("{model}_indexes.jsonl"))
    }

    pub fn backup_path(&self, model: &str, at: DateTime<Utc>) -> PathBuf {
        self.model_dir(model)
            .join(format!("{model}_backup_{}.jsonl", at.format("%Y%m%dT%H%M%SZ")))
    }
}

/// Records parsed from a JSONL file. Malformed lines are kept aside so a
/// single bad line never hides the rest of the file.
#[derive(Debug)]
pub struct Lines<T> {
    pub records: Vec<T>,
    pub errors: Vec<MigrateError>,
}

impl<T> Default for Lines<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

pub fn parse_jsonl<T: DeserializeOwned>(path: &Path, content: &str) -> Lines<T> {
    let mut lines = Lines::default();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(line) {
            Ok(record) => lines.records.push(record),
            Err(e) => lines.errors.push(MigrateError::Parse {
                path: path.display().to_string(),
                line: idx + 1,
                message: e.to_string(),
            }),
        }
    }

    lines
}

pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Lines<T>> {
    let content = fs::read_to_string(path).await?;

    Ok(parse_jsonl(path, &content))
}

/// Writes all records, replacing `path` atomically.
pub async fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut content = String::new();
    for record in records {
        content.push_str(&serde_json::to_string(record)?);
        content.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IndexCommand;

    #[test]
    fn malformed_line_is_skipped() {
        let content = concat!(
            r#"{"command":"SADD","key":"k","args":["m"]}"#,
            "\n",
            "{not json\n",
            "\n",
            r#"{"command":"INCRBY","key":"c","args":["1"]}"#,
            "\n"
        );

        let lines = parse_jsonl::<IndexCommand>(Path::new("x.jsonl"), content);

        assert_eq!(lines.records.len(), 2);
        assert_eq!(lines.errors.len(), 1);
        assert!(lines.errors[0].to_string().starts_with("line 2 of `x.jsonl`"));
    }

    #[test]
    fn layout_paths() {
        let layout = ExportLayout::new("exports");

        assert_eq!(
            layout.dump_path("customer"),
            PathBuf::from("exports/customer/customer_dump.jsonl")
        );
        assert_eq!(
            layout.indexes_path("secret"),
            PathBuf::from("exports/secret/secret_indexes.jsonl")
        );
    }
}
