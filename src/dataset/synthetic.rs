//! Seeded synthetic datasets for tests and benches
//!
//! These generators replace remote dataset loaders: each produces a raw
//! (unpreprocessed) [`CausalDataset`] with the conventional column layout
//! `treatment`, `y_factual`, and covariates `x1..xk`, from a fixed seed so
//! repeated runs see identical data.

use super::CausalDataset;
use crate::Result;
use arrow::array::{Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Zero-mean noise from the sum of three uniforms (roughly bell-shaped).
fn noise(rng: &mut StdRng) -> f64 {
    (rng.gen::<f64>() + rng.gen::<f64>() + rng.gen::<f64>()) - 1.5
}

fn covariate_fields(covariates: usize) -> Vec<Field> {
    (1..=covariates)
        .map(|i| Field::new(format!("x{i}"), DataType::Float64, false))
        .collect()
}

/// Binary-treatment dataset with a heterogeneous linear effect.
///
/// Treatment assignment depends on `x1` (confounded), the true effect is
/// `1 + 0.5 * x1`.
///
/// # Errors
/// Returns error if `rows == 0` or `covariates == 0`.
pub fn synth_linear(rows: usize, covariates: usize, seed: u64) -> Result<CausalDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<Vec<f64>> = (0..covariates)
        .map(|_| (0..rows).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
        .collect();

    let mut treatment = Vec::with_capacity(rows);
    let mut outcome = Vec::with_capacity(rows);
    for i in 0..rows {
        let propensity = 1.0 / (1.0 + (-x[0][i]).exp());
        let t = i32::from(rng.gen::<f64>() < propensity);
        let tau = 0.5f64.mul_add(x[0][i], 1.0);
        let baseline: f64 = x.iter().map(|col| 0.3 * col[i]).sum();
        treatment.push(t);
        outcome.push(tau.mul_add(f64::from(t), baseline) + 0.1 * noise(&mut rng));
    }

    let mut fields = vec![
        Field::new("treatment", DataType::Int32, false),
        Field::new("y_factual", DataType::Float64, false),
    ];
    fields.extend(covariate_fields(covariates));
    let mut columns: Vec<arrow::array::ArrayRef> = vec![
        Arc::new(Int32Array::from(treatment)),
        Arc::new(Float64Array::from(outcome)),
    ];
    for col in x {
        columns.push(Arc::new(Float64Array::from(col)));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    CausalDataset::from_batch(batch, "treatment", &["y_factual"])
}

/// Like [`synth_linear`] with an additional 3-level categorical covariate.
///
/// # Errors
/// Returns error if `rows == 0`.
pub fn synth_with_categories(rows: usize, seed: u64) -> Result<CausalDataset> {
    let base = synth_linear(rows, 4, seed)?;
    let mut rng = StdRng::seed_from_u64(seed ^ 0x9e37_79b9);
    let groups = ["north", "south", "west"];
    let group: StringArray = (0..rows)
        .map(|_| Some(groups[rng.gen_range(0..groups.len())]))
        .collect();

    let batch = base.batch();
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns = batch.columns().to_vec();
    fields.push(Field::new("group", DataType::Utf8, false));
    columns.push(Arc::new(group));
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    CausalDataset::from_batch(batch, "treatment", &["y_factual"])
}

/// Multi-valued treatment dataset with per-level constant effects.
///
/// Level `k` shifts the outcome by `k` relative to control.
///
/// # Errors
/// Returns error if `levels < 2` or `rows == 0`.
pub fn synth_multi_treatment(rows: usize, levels: usize, seed: u64) -> Result<CausalDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let covariates = 3;
    let x: Vec<Vec<f64>> = (0..covariates)
        .map(|_| (0..rows).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
        .collect();

    let mut treatment = Vec::with_capacity(rows);
    let mut outcome = Vec::with_capacity(rows);
    for i in 0..rows {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let t = rng.gen_range(0..levels) as i32;
        let baseline: f64 = x.iter().map(|col| 0.4 * col[i]).sum();
        outcome.push(baseline + f64::from(t) + 0.1 * noise(&mut rng));
        treatment.push(t);
    }

    let mut fields = vec![
        Field::new("treatment", DataType::Int32, false),
        Field::new("y_factual", DataType::Float64, false),
    ];
    fields.extend(covariate_fields(covariates));
    let mut columns: Vec<arrow::array::ArrayRef> = vec![
        Arc::new(Int32Array::from(treatment)),
        Arc::new(Float64Array::from(outcome)),
    ];
    for col in x {
        columns.push(Arc::new(Float64Array::from(col)));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    CausalDataset::from_batch(batch, "treatment", &["y_factual"])
}

/// Instrumented dataset: binary instrument `z` drives treatment uptake,
/// constant true effect of 2.0, unobserved confounding between treatment and
/// outcome.
///
/// # Errors
/// Returns error if `rows == 0`.
pub fn synth_iv(rows: usize, seed: u64) -> Result<CausalDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let covariates = 3;
    let x: Vec<Vec<f64>> = (0..covariates)
        .map(|_| (0..rows).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
        .collect();

    let mut z = Vec::with_capacity(rows);
    let mut treatment = Vec::with_capacity(rows);
    let mut outcome = Vec::with_capacity(rows);
    for i in 0..rows {
        let instrument = i32::from(rng.gen::<f64>() < 0.5);
        let hidden = noise(&mut rng);
        // Instrument shifts uptake probability from 0.2 to 0.8
        let uptake = 0.6f64.mul_add(f64::from(instrument), 0.2) + 0.05 * hidden;
        let t = i32::from(rng.gen::<f64>() < uptake);
        let baseline: f64 = x.iter().map(|col| 0.3 * col[i]).sum();
        z.push(instrument);
        treatment.push(t);
        outcome.push(2.0f64.mul_add(f64::from(t), baseline) + 0.5 * hidden);
    }

    let mut fields = vec![
        Field::new("treatment", DataType::Int32, false),
        Field::new("y_factual", DataType::Float64, false),
        Field::new("z", DataType::Int32, false),
    ];
    fields.extend(covariate_fields(covariates));
    let mut columns: Vec<arrow::array::ArrayRef> = vec![
        Arc::new(Int32Array::from(treatment)),
        Arc::new(Float64Array::from(outcome)),
        Arc::new(Int32Array::from(z)),
    ];
    for col in x {
        columns.push(Arc::new(Float64Array::from(col)));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    CausalDataset::from_batch(batch, "treatment", &["y_factual"])?.with_instrument("z")
}
