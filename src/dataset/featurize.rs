//! Featurization boundary
//!
//! The preprocessor treats featurization as opaque: any implementor of
//! [`Featurizer`] may expand or transform covariate columns, as long as the
//! row count is preserved. The default [`OneHotFeaturizer`] expands string and
//! boolean columns into 0/1 indicator columns and passes numeric columns
//! through unchanged.

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Output of a featurization pass.
pub struct FeaturizedBatch {
    /// Transformed batch, same row count as the input
    pub batch: RecordBatch,
    /// Produced columns the featurizer marks as confounder-only
    /// (routed into `features_w`, never into `features_x`)
    pub confounder_only: Vec<String>,
}

/// Opaque featurization boundary consumed by the preprocessor.
///
/// Contract: the returned batch has the same row count as the input, columns
/// listed in `exclude` are passed through unchanged, and columns listed in
/// `features` may be replaced by any number of derived columns.
pub trait Featurizer {
    /// Transform the feature columns of `batch`.
    ///
    /// # Arguments
    /// * `batch` - Input batch
    /// * `features` - Columns eligible for transformation
    /// * `exclude` - Columns that must pass through untouched
    /// * `drop_first` - Drop the first categorical level of each expansion
    ///
    /// # Errors
    /// Returns error if a feature column has an unsupported data type.
    fn featurize(
        &self,
        batch: &RecordBatch,
        features: &[String],
        exclude: &[String],
        drop_first: bool,
    ) -> Result<FeaturizedBatch>;
}

/// Default featurizer: one-hot expansion of categorical columns.
///
/// - Utf8 columns expand to one Int32 indicator column per distinct value,
///   named `{column}_{value}`, in lexicographic value order
/// - Boolean columns become a single 0/1 Int32 column under the same name
/// - Numeric columns pass through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct OneHotFeaturizer;

impl OneHotFeaturizer {
    /// Create a new one-hot featurizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Featurizer for OneHotFeaturizer {
    fn featurize(
        &self,
        batch: &RecordBatch,
        features: &[String],
        exclude: &[String],
        drop_first: bool,
    ) -> Result<FeaturizedBatch> {
        let mut fields: Vec<Field> = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();

        for (i, field) in batch.schema().fields().iter().enumerate() {
            let name = field.name().clone();
            let column = batch.column(i);

            let is_feature =
                features.contains(&name) && !exclude.contains(&name);
            if !is_feature {
                fields.push(field.as_ref().clone());
                columns.push(Arc::clone(column));
                continue;
            }

            match field.data_type() {
                DataType::Utf8 => {
                    let strings = column
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| {
                            Error::InvalidInput(format!("column '{name}' is not a string array"))
                        })?;
                    let levels: BTreeSet<&str> = (0..strings.len())
                        .filter(|&row| !strings.is_null(row))
                        .map(|row| strings.value(row))
                        .collect();
                    let skip = usize::from(drop_first);
                    for level in levels.iter().skip(skip) {
                        let indicator: Int32Array = (0..strings.len())
                            .map(|row| {
                                if strings.is_null(row) {
                                    Some(0)
                                } else {
                                    Some(i32::from(strings.value(row) == *level))
                                }
                            })
                            .collect();
                        fields.push(Field::new(
                            format!("{name}_{level}"),
                            DataType::Int32,
                            false,
                        ));
                        columns.push(Arc::new(indicator));
                    }
                }
                DataType::Boolean => {
                    let bools = column
                        .as_any()
                        .downcast_ref::<BooleanArray>()
                        .ok_or_else(|| {
                            Error::InvalidInput(format!("column '{name}' is not a boolean array"))
                        })?;
                    let indicator: Int32Array = (0..bools.len())
                        .map(|row| {
                            if bools.is_null(row) {
                                Some(0)
                            } else {
                                Some(i32::from(bools.value(row)))
                            }
                        })
                        .collect();
                    fields.push(Field::new(name, DataType::Int32, false));
                    columns.push(Arc::new(indicator));
                }
                DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float16
                | DataType::Float32
                | DataType::Float64 => {
                    fields.push(field.as_ref().clone());
                    columns.push(Arc::clone(column));
                }
                other => {
                    return Err(Error::InvalidInput(format!(
                        "column '{name}' has unsupported feature type {other}"
                    )));
                }
            }
        }

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema, columns)?;
        Ok(FeaturizedBatch {
            batch,
            confounder_only: Vec::new(),
        })
    }
}
