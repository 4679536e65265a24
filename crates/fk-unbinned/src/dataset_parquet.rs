//! Parquet / Arrow input for datasets.
//!
//! A dataset is read from one `Float64` column of a Parquet file; an optional
//! `Float64` column supplies per-event weights.

use std::path::Path;

use arrow::array::{Array, AsArray, Float64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::space::Space;
use fk_core::{Error, Result};

/// Default name of the weight column.
pub const WEIGHT_COLUMN: &str = "_weight";

/// Extract `column` (and optionally `weight_column`) from a [`RecordBatch`].
///
/// Rows outside the space limits are dropped when `filter` is set; otherwise they are an error.
pub fn dataset_from_record_batch(
    batch: &RecordBatch,
    space: &Space,
    column: &str,
    weight_column: Option<&str>,
    filter: bool,
) -> Result<Dataset> {
    let values = f64_column(batch, column)?;
    let weights = match weight_column {
        Some(w) => Some(f64_column(batch, w)?),
        None => None,
    };
    if filter {
        Dataset::filtered(space.clone(), values, weights)
    } else {
        Dataset::with_weights(space.clone(), values, weights)
    }
}

/// Read a dataset column from a Parquet file.
pub fn read_dataset_parquet(
    path: &Path,
    space: &Space,
    column: &str,
    weight_column: Option<&str>,
    filter: bool,
) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Validation(format!("failed to open {}: {e}", path.display())))?;
    let builder = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Validation(format!("failed to read Parquet: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| Error::Validation(format!("failed to build Parquet reader: {e}")))?;

    let mut values = Vec::new();
    let mut weights: Option<Vec<f64>> = weight_column.map(|_| Vec::new());
    for batch in reader {
        let batch =
            batch.map_err(|e| Error::Validation(format!("failed to read Parquet batch: {e}")))?;
        values.extend(f64_column(&batch, column)?);
        if let (Some(w), Some(name)) = (weights.as_mut(), weight_column) {
            w.extend(f64_column(&batch, name)?);
        }
    }

    if filter {
        Dataset::filtered(space.clone(), values, weights)
    } else {
        Dataset::with_weights(space.clone(), values, weights)
    }
}

/// Write a dataset as a single-column Parquet file (plus [`WEIGHT_COLUMN`] if weighted).
pub fn write_dataset_parquet(data: &Dataset, path: &Path) -> Result<()> {
    let name = data.space().name();
    let mut fields = vec![Field::new(name, DataType::Float64, false)];
    let mut arrays: Vec<Arc<dyn Array>> = vec![Arc::new(Float64Array::from(data.values().to_vec()))];
    if let Some(w) = data.weights() {
        fields.push(Field::new(WEIGHT_COLUMN, DataType::Float64, false));
        arrays.push(Arc::new(Float64Array::from(w.to_vec())));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))?;

    let file = std::fs::File::create(path)?;
    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| Error::Validation(format!("failed to create Parquet writer: {e}")))?;
    writer.write(&batch).map_err(|e| Error::Validation(format!("failed to write Parquet: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Validation(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

fn f64_column(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::Validation(format!("missing column '{name}' in RecordBatch")))?;
    let arr = batch.column(idx);
    if arr.data_type() != &DataType::Float64 {
        return Err(Error::Validation(format!(
            "column '{name}' has type {:?}, expected Float64",
            arr.data_type()
        )));
    }
    if arr.null_count() > 0 {
        return Err(Error::Validation(format!("column '{name}' contains nulls")));
    }
    Ok(arr.as_primitive::<Float64Type>().values().to_vec())
}
