//! Per-dataset column metadata: classification, declared types, flags and missing sentinels.

use std::collections::HashMap;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::error::{Result, SynthError};
use crate::schema::{DataType, Table};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Discrete,
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub var_type: VarType,
    pub data_type: DataType,

    #[serde(default)]
    pub target: bool,

    #[serde(default)]
    pub drop: bool,

    /// Raw field values that stand for "missing" in the source data.
    #[serde(default)]
    pub missing_values: Vec<String>,
}

impl ColumnMeta {
    pub fn is_discrete(&self) -> bool {
        self.var_type == VarType::Discrete
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub columns: Vec<ColumnMeta>,
}

impl DatasetMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Immutable lookup of dataset schemas, loaded once and passed around by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRegistry {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub created_at: Option<String>,

    pub datasets: HashMap<String, DatasetMetadata>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl MetadataRegistry {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!(path = ?path, "Loading metadata registry from file");

        let json = std::fs::read_to_string(path)?;
        let registry: MetadataRegistry = serde_json::from_str(&json)?;
        registry.validate()?;

        debug!(
            version = %registry.version,
            datasets = registry.datasets.len(),
            "Metadata registry loaded"
        );

        Ok(registry)
    }

    pub fn dataset(&self, dataset: &str) -> Result<&DatasetMetadata> {
        self.datasets
            .get(dataset)
            .ok_or_else(|| SynthError::UnknownDataset(dataset.to_string()))
    }

    pub fn column(&self, dataset: &str, name: &str) -> Result<&ColumnMeta> {
        self.dataset(dataset)?
            .column(name)
            .ok_or_else(|| SynthError::invalid_column(name, format!("not described for dataset '{}'", dataset)))
    }

    pub fn data_type(&self, dataset: &str, name: &str) -> Result<DataType> {
        Ok(self.column(dataset, name)?.data_type)
    }

    /// Discrete columns in metadata order, restricted to `table`'s columns when one is given.
    pub fn discrete_columns(&self, dataset: &str, table: Option<&Table>) -> Result<Vec<String>> {
        self.matching(dataset, table, ColumnMeta::is_discrete)
    }

    pub fn continuous_columns(&self, dataset: &str, table: Option<&Table>) -> Result<Vec<String>> {
        self.matching(dataset, table, |c| !c.is_discrete())
    }

    pub fn columns_to_drop(&self, dataset: &str, table: Option<&Table>) -> Result<Vec<String>> {
        self.matching(dataset, table, |c| c.drop)
    }

    pub fn target_column(&self, dataset: &str, table: Option<&Table>) -> Result<Option<String>> {
        let target = self
            .dataset(dataset)?
            .columns
            .iter()
            .find(|c| c.target)
            .map(|c| c.name.clone());

        if let (Some(name), Some(table)) = (&target, table) {
            if !table.contains(name) {
                return Err(SynthError::invalid_column(name, "target column not present in table"));
            }
        }

        Ok(target)
    }

    fn matching<P>(&self, dataset: &str, table: Option<&Table>, predicate: P) -> Result<Vec<String>>
    where
        P: Fn(&ColumnMeta) -> bool,
    {
        let meta = self.dataset(dataset)?;

        if let Some(table) = table {
            if let Some(unknown) = table.column_names().into_iter().find(|n| meta.column(n).is_none()) {
                return Err(SynthError::invalid_column(
                    unknown,
                    format!("table column is not described for dataset '{}'", dataset),
                ));
            }
        }

        Ok(meta
            .columns
            .iter()
            .filter(|c| predicate(*c))
            .filter(|c| table.is_none_or(|t| t.contains(&c.name)))
            .map(|c| c.name.clone())
            .collect())
    }

    /// Checks that no dataset declares more than one target column.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for (name, meta) in &self.datasets {
            let targets: Vec<&str> = meta
                .columns
                .iter()
                .filter(|c| c.target)
                .map(|c| c.name.as_str())
                .collect();

            if targets.len() > 1 {
                errors.push(format!(
                    "dataset '{}' declares {} target columns: {}",
                    name,
                    targets.len(),
                    targets.join(", ")
                ));
            }
        }

        if !errors.is_empty() {
            return Err(SynthError::configuration(format!(
                "Metadata validation failed:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(())
    }
}
