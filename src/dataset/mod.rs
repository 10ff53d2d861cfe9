//! Causal dataset and preprocessor
//!
//! A [`CausalDataset`] wraps an Arrow `RecordBatch` with the column roles a
//! causal run needs: one treatment column, one or more outcome columns, an
//! optional instrument, and (after preprocessing) the partition of covariates
//! into effect modifiers (`features_x`) and confounders (`features_w`).
//!
//! Preprocessing is pure: it returns a new dataset and never mutates the
//! input. It coerces the treatment column to a dense `0..k` integer domain,
//! delegates categorical expansion to an opaque [`Featurizer`], and appends a
//! uniformly random binary `random` column that is always routed into
//! `features_w`. Several downstream estimator fits are unstable when the
//! confounder set is empty; the injected column guarantees it never is.

mod featurize;
pub mod synthetic;

pub use featurize::{FeaturizedBatch, Featurizer, OneHotFeaturizer};

use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    UInt32Array,
};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;

/// Maximum number of distinct treatment levels accepted by the preprocessor
pub const MAX_TREATMENT_LEVELS: usize = 16;

/// Name of the injected decorrelated noise column
pub const RANDOM_COLUMN: &str = "random";

/// Options for [`CausalDataset::preprocess`].
#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    /// Seed for the injected noise column; `None` draws from entropy
    pub seed: Option<u64>,
    /// Drop the first categorical level during one-hot expansion
    pub drop_first: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            seed: None,
            drop_first: false,
        }
    }
}

/// Dense row-major matrix extracted from a dataset.
#[derive(Debug, Clone)]
pub struct Mat {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl Mat {
    /// Create a matrix from row-major data.
    ///
    /// # Errors
    /// Returns error if `data.len() != rows * cols`.
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ShapeMismatch(format!(
                "expected {rows}x{cols} = {} values, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { data, rows, cols })
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow row `i` as a slice.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Borrow the full row-major buffer.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Copy of the matrix with column `j` replaced by `values`.
    ///
    /// # Errors
    /// Returns error if `values.len() != rows` or `j` is out of bounds.
    pub fn with_column(&self, j: usize, values: &[f64]) -> Result<Self> {
        if j >= self.cols {
            return Err(Error::ShapeMismatch(format!(
                "column {j} out of bounds ({} columns)",
                self.cols
            )));
        }
        if values.len() != self.rows {
            return Err(Error::ShapeMismatch(format!(
                "expected {} values, got {}",
                self.rows,
                values.len()
            )));
        }
        let mut data = self.data.clone();
        for (i, v) in values.iter().enumerate() {
            data[i * self.cols + j] = *v;
        }
        Ok(Self {
            data,
            rows: self.rows,
            cols: self.cols,
        })
    }

    /// Extract column `j`.
    #[must_use]
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.data[i * self.cols + j]).collect()
    }
}

/// Dense design extracted from a preprocessed dataset.
///
/// Estimators consume this instead of raw Arrow arrays: `x` holds the effect
/// modifiers, `xw` the modifiers plus confounders (nuisance fits), `t` the
/// coerced treatment levels, and `y` the first outcome column.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Effect-modifier block (`features_x`)
    pub x: Mat,
    /// Effect modifiers plus confounders (`features_x ∪ features_w`)
    pub xw: Mat,
    /// Treatment level per row, dense `0..k` with 0 = control
    pub t: Vec<i32>,
    /// Observed outcome per row
    pub y: Vec<f64>,
    /// Instrument per row, when the dataset declares one
    pub z: Option<Vec<f64>>,
    /// Number of treatment levels
    pub k: usize,
    /// Column names of the effect-modifier block
    pub x_names: Vec<String>,
}

impl DesignMatrix {
    /// Number of rows.
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.x.rows()
    }
}

/// Tabular dataset for causal inference.
#[derive(Debug, Clone)]
pub struct CausalDataset {
    batch: RecordBatch,
    treatment: String,
    outcomes: Vec<String>,
    instrument: Option<String>,
    features_x: Vec<String>,
    features_w: Vec<String>,
    treatment_levels: usize,
    preprocessed: bool,
}

impl CausalDataset {
    /// Create a dataset from an existing record batch.
    ///
    /// All columns other than `treatment` and `outcomes` are treated as
    /// covariates until [`preprocess`](Self::preprocess) partitions them.
    ///
    /// # Errors
    /// Returns error if a named column is missing or the batch is empty.
    pub fn from_batch(
        batch: RecordBatch,
        treatment: impl Into<String>,
        outcomes: &[&str],
    ) -> Result<Self> {
        let treatment = treatment.into();
        if batch.num_rows() == 0 {
            return Err(Error::InvalidInput("dataset has no rows".to_string()));
        }
        require_column(&batch, &treatment)?;
        for outcome in outcomes {
            require_column(&batch, outcome)?;
        }
        if outcomes.is_empty() {
            return Err(Error::InvalidInput(
                "at least one outcome column is required".to_string(),
            ));
        }
        Ok(Self {
            batch,
            treatment,
            outcomes: outcomes.iter().map(ToString::to_string).collect(),
            instrument: None,
            features_x: Vec::new(),
            features_w: Vec::new(),
            treatment_levels: 0,
            preprocessed: false,
        })
    }

    /// Load a dataset from a Parquet file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or a named
    /// column is missing.
    pub fn load_parquet<P: AsRef<Path>>(
        path: P,
        treatment: impl Into<String>,
        outcomes: &[&str],
    ) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;
        let reader = builder
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
            batches.push(batch);
        }
        if batches.is_empty() {
            return Err(Error::StorageError("Parquet file is empty".to_string()));
        }
        let combined = compute::concat_batches(&batches[0].schema(), &batches)
            .map_err(|e| Error::StorageError(format!("Failed to combine batches: {e}")))?;
        Self::from_batch(combined, treatment, outcomes)
    }

    /// Declare an instrument column (required by IV estimators).
    ///
    /// # Errors
    /// Returns error if the column does not exist.
    pub fn with_instrument(mut self, column: impl Into<String>) -> Result<Self> {
        let column = column.into();
        require_column(&self.batch, &column)?;
        self.instrument = Some(column);
        Ok(self)
    }

    /// Underlying record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Treatment column name.
    #[must_use]
    pub fn treatment(&self) -> &str {
        &self.treatment
    }

    /// Outcome column names.
    #[must_use]
    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Instrument column name, if declared.
    #[must_use]
    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    /// Effect-modifier columns (populated by preprocessing).
    #[must_use]
    pub fn features_x(&self) -> &[String] {
        &self.features_x
    }

    /// Confounder-only columns (populated by preprocessing).
    #[must_use]
    pub fn features_w(&self) -> &[String] {
        &self.features_w
    }

    /// Number of distinct treatment levels (0 until preprocessed).
    #[must_use]
    pub const fn treatment_levels(&self) -> usize {
        self.treatment_levels
    }

    /// Whether the treatment takes more than two values.
    #[must_use]
    pub const fn is_multivalue(&self) -> bool {
        self.treatment_levels > 2
    }

    /// Whether [`preprocess`](Self::preprocess) has run.
    #[must_use]
    pub const fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }

    /// Preprocess with the default [`OneHotFeaturizer`].
    ///
    /// # Errors
    /// See [`preprocess_with`](Self::preprocess_with).
    pub fn preprocess(&self, options: &PreprocessOptions) -> Result<Self> {
        self.preprocess_with(&OneHotFeaturizer::new(), options)
    }

    /// Preprocess into a new dataset: coerce the treatment column to a dense
    /// `0..k` integer domain, featurize covariates, inject the `random`
    /// noise column into `features_w`, and partition the remaining columns
    /// into `features_x` / `features_w`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTreatment`] if the treatment column cannot be
    /// coerced to at most [`MAX_TREATMENT_LEVELS`] integer levels, and
    /// [`Error::InvalidInput`] if a `random` column already exists.
    pub fn preprocess_with(
        &self,
        featurizer: &dyn Featurizer,
        options: &PreprocessOptions,
    ) -> Result<Self> {
        if self.batch.schema().column_with_name(RANDOM_COLUMN).is_some() {
            return Err(Error::InvalidInput(format!(
                "dataset already contains a '{RANDOM_COLUMN}' column"
            )));
        }

        let (t_index, _) = self
            .batch
            .schema()
            .column_with_name(&self.treatment)
            .ok_or_else(|| Error::ColumnNotFound(self.treatment.clone()))?;
        let (coerced, levels) = coerce_treatment(self.batch.column(t_index), &self.treatment)?;

        // Rebuild the batch with the coerced treatment column
        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        let mut fields: Vec<Field> = self
            .batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        columns[t_index] = Arc::new(coerced);
        fields[t_index] = Field::new(&self.treatment, DataType::Int32, false);
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let mut exclude: Vec<String> = vec![self.treatment.clone()];
        exclude.extend(self.outcomes.iter().cloned());
        if let Some(instrument) = &self.instrument {
            exclude.push(instrument.clone());
        }
        let features: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| !exclude.contains(name))
            .collect();

        let featurized = featurizer.featurize(&batch, &features, &exclude, options.drop_first)?;
        if featurized.batch.num_rows() != batch.num_rows() {
            return Err(Error::ShapeMismatch(format!(
                "featurizer changed row count: {} -> {}",
                batch.num_rows(),
                featurized.batch.num_rows()
            )));
        }

        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise: Int32Array = (0..featurized.batch.num_rows())
            .map(|_| Some(rng.gen_range(0..2)))
            .collect();

        let mut fields: Vec<Field> = featurized
            .batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        let mut columns: Vec<ArrayRef> = featurized.batch.columns().to_vec();
        fields.push(Field::new(RANDOM_COLUMN, DataType::Int32, false));
        columns.push(Arc::new(noise));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let mut features_w = vec![RANDOM_COLUMN.to_string()];
        features_w.extend(featurized.confounder_only.iter().cloned());
        let features_x: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| !exclude.contains(name) && !features_w.contains(name))
            .collect();

        Ok(Self {
            batch,
            treatment: self.treatment.clone(),
            outcomes: self.outcomes.clone(),
            instrument: self.instrument.clone(),
            features_x,
            features_w,
            treatment_levels: levels,
            preprocessed: true,
        })
    }

    /// Extract the dense design consumed by estimators and the scorer.
    ///
    /// # Errors
    /// Returns error if the dataset is not preprocessed or a column has a
    /// non-numeric type.
    pub fn to_design(&self) -> Result<DesignMatrix> {
        if !self.preprocessed {
            return Err(Error::InvalidInput(
                "dataset must be preprocessed before design extraction".to_string(),
            ));
        }
        let x = matrix_from_batch(&self.batch, &self.features_x)?;
        let mut xw_names = self.features_x.clone();
        xw_names.extend(self.features_w.iter().cloned());
        let xw = matrix_from_batch(&self.batch, &xw_names)?;

        let t_col = column_by_name(&self.batch, &self.treatment)?;
        let t_ints = t_col
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| Error::InvalidInput("treatment column is not Int32".to_string()))?;
        let t: Vec<i32> = (0..t_ints.len()).map(|i| t_ints.value(i)).collect();

        let y = column_to_f64(&column_by_name(&self.batch, &self.outcomes[0])?, &self.outcomes[0])?;
        let z = match &self.instrument {
            Some(name) => Some(column_to_f64(&column_by_name(&self.batch, name)?, name)?),
            None => None,
        };

        Ok(DesignMatrix {
            x,
            xw,
            t,
            y,
            z,
            k: self.treatment_levels,
            x_names: self.features_x.clone(),
        })
    }

    /// Deterministic shuffled holdout split into (train, validation).
    ///
    /// # Errors
    /// Returns error if the split would leave either side empty.
    pub fn split_holdout(&self, val_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        let n = self.num_rows();
        if n < 2 {
            return Err(Error::InvalidInput(
                "at least two rows are required for a holdout split".to_string(),
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let val_n = ((n as f64) * val_fraction).round() as usize;
        let val_n = val_n.clamp(1, n - 1);

        let mut indices: Vec<u32> = (0..u32::try_from(n).map_err(|_| {
            Error::InvalidInput("dataset exceeds u32 row capacity".to_string())
        })?)
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let val = self.take_rows(&indices[..val_n])?;
        let train = self.take_rows(&indices[val_n..])?;
        Ok((train, val))
    }

    /// New dataset containing the given rows, in the given order.
    ///
    /// # Errors
    /// Returns error if an index is out of bounds.
    pub fn take_rows(&self, indices: &[u32]) -> Result<Self> {
        let index_array = UInt32Array::from(indices.to_vec());
        let columns: Result<Vec<ArrayRef>> = self
            .batch
            .columns()
            .iter()
            .map(|col| compute::take(col.as_ref(), &index_array, None).map_err(Error::from))
            .collect();
        let batch = RecordBatch::try_new(self.batch.schema(), columns?)?;
        Ok(Self {
            batch,
            ..self.clone()
        })
    }

    /// First `n` rows (bounded sample for attribution computation).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.num_rows());
        Self {
            batch: self.batch.slice(0, n),
            ..self.clone()
        }
    }
}

/// Extract named columns from a batch into a dense row-major matrix.
///
/// # Errors
/// Returns error if a column is missing or non-numeric.
pub fn matrix_from_batch(batch: &RecordBatch, names: &[String]) -> Result<Mat> {
    let n = batch.num_rows();
    let p = names.len();
    let mut data = vec![0.0; n * p];
    for (j, name) in names.iter().enumerate() {
        let values = column_to_f64(&column_by_name(batch, name)?, name)?;
        for (i, v) in values.iter().enumerate() {
            data[i * p + j] = *v;
        }
    }
    Mat::new(data, n, p)
}

fn require_column(batch: &RecordBatch, name: &str) -> Result<()> {
    batch
        .schema()
        .column_with_name(name)
        .map(|_| ())
        .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
}

fn column_by_name(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    let (index, _) = batch
        .schema()
        .column_with_name(name)
        .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
    Ok(Arc::clone(batch.column(index)))
}

/// Convert a numeric or boolean column to f64 values.
fn column_to_f64(array: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    let n = array.len();
    if array.null_count() > 0 {
        return Err(Error::InvalidInput(format!(
            "column '{name}' contains nulls"
        )));
    }
    match array.data_type() {
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            Ok((0..n).map(|i| a.value(i)).collect())
        }
        DataType::Float32 => {
            let a = array.as_any().downcast_ref::<Float32Array>().unwrap();
            Ok((0..n).map(|i| f64::from(a.value(i))).collect())
        }
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            Ok((0..n).map(|i| f64::from(a.value(i))).collect())
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            #[allow(clippy::cast_precision_loss)]
            Ok((0..n).map(|i| a.value(i) as f64).collect())
        }
        DataType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            Ok((0..n).map(|i| f64::from(u8::from(a.value(i)))).collect())
        }
        other => Err(Error::InvalidInput(format!(
            "column '{name}' has non-numeric type {other}"
        ))),
    }
}

/// Coerce a treatment column to dense `0..k` integer levels.
///
/// Accepts integer, float (integral values only), and boolean columns.
fn coerce_treatment(array: &ArrayRef, name: &str) -> Result<(Int32Array, usize)> {
    let invalid = |reason: &str| Error::InvalidTreatment {
        column: name.to_string(),
        reason: reason.to_string(),
        max_levels: MAX_TREATMENT_LEVELS,
    };

    if array.null_count() > 0 {
        return Err(invalid("column contains nulls"));
    }

    let raw: Vec<i64> = match array.data_type() {
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            (0..a.len()).map(|i| i64::from(a.value(i))).collect()
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            (0..a.len()).map(|i| a.value(i)).collect()
        }
        DataType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            (0..a.len()).map(|i| i64::from(a.value(i))).collect()
        }
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            let mut values = Vec::with_capacity(a.len());
            for i in 0..a.len() {
                let v = a.value(i);
                if !v.is_finite() || v.fract() != 0.0 {
                    return Err(invalid(&format!("value {v} is not a finite integer")));
                }
                #[allow(clippy::cast_possible_truncation)]
                values.push(v as i64);
            }
            values
        }
        other => {
            return Err(invalid(&format!("unsupported treatment type {other}")));
        }
    };

    let mut levels: Vec<i64> = raw.clone();
    levels.sort_unstable();
    levels.dedup();
    if levels.len() < 2 {
        return Err(invalid("treatment takes fewer than two distinct values"));
    }
    if levels.len() > MAX_TREATMENT_LEVELS {
        return Err(invalid(&format!(
            "treatment takes {} distinct values",
            levels.len()
        )));
    }

    // Re-encode levels densely: smallest observed value becomes control (0)
    let encoded: Int32Array = raw
        .iter()
        .map(|v| {
            #[allow(clippy::cast_possible_truncation)]
            Some(levels.binary_search(v).unwrap_or(0) as i32)
        })
        .collect();
    Ok((encoded, levels.len()))
}
