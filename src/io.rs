use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use tracing::{debug, info};
use crate::error::{Result, SynthError};
use crate::metadata::MetadataRegistry;
use crate::preprocess::{coerce_value, Sentinels};
use crate::schema::{Column, Table, Value};

/// Loads a delimited table whose header names columns of `dataset`.
///
/// Fields are trimmed and blank lines skipped. Empty fields and the column's missing-value
/// sentinels become `Null`; everything else is parsed to the declared type.
pub fn read_csv(registry: &MetadataRegistry, dataset: &str, path: &Path) -> Result<Table> {
    info!(path = ?path, dataset, "Reading table");
    read_csv_from(registry, dataset, File::open(path)?)
}

pub fn read_csv_from<R: Read>(registry: &MetadataRegistry, dataset: &str, reader: R) -> Result<Table> {
    let meta = registry.dataset(dataset)?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut schema = Vec::with_capacity(headers.len());
    for name in &headers {
        let column = meta
            .column(name)
            .ok_or_else(|| SynthError::invalid_column(name, format!("not described for dataset '{}'", dataset)))?;
        schema.push((column, Sentinels::new(Some(column))));
    }

    let mut values: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for ((field, (column, sentinels)), cells) in record.iter().zip(&schema).zip(values.iter_mut()) {
            let value = if field.is_empty() || sentinels.matches_field(field) {
                Value::Null
            } else {
                coerce_value(&column.name, &Value::Text(field.to_string()), column.data_type)?
            };
            cells.push(value);
        }
    }

    let table = Table::new(
        headers
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column::new(name, values))
            .collect(),
    )?;

    debug!(rows = table.n_rows(), columns = table.n_cols(), "Table loaded");

    Ok(table)
}

/// Writes a header and one record per row; `Null` cells are left empty.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    info!(path = ?path, rows = table.n_rows(), "Writing table");
    write_csv_to(table, File::create(path)?)
}

pub fn write_csv_to<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);

    writer.write_record(table.column_names())?;
    for row in 0..table.n_rows() {
        writer.write_record(table.row(row).iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;

    Ok(())
}
