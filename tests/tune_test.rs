//! End-to-end tuning runs over synthetic datasets

use arrow::array::{Array, Float64Array};
use arrow::record_batch::RecordBatch;
use causa::dataset::synthetic::{
    synth_iv, synth_linear, synth_multi_treatment, synth_with_categories,
};
use causa::registry::{ConfigKind, TreatmentSupport};
use causa::{
    resolve, AttributionPolicy, Budget, CausalDataset, CausalTuner, Error, EstimatorDescriptor,
    Explanation, Identification, Pattern, PreprocessOptions, Registry, TrialStatus,
};
use std::time::Duration;

// Per-trial events are visible under RUST_LOG, e.g. RUST_LOG=causa=debug
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn preprocessed(data: CausalDataset, seed: u64) -> CausalDataset {
    init_tracing();
    data.preprocess(&PreprocessOptions {
        seed: Some(seed),
        drop_first: false,
    })
    .unwrap()
}

#[test]
fn test_end_to_end_binary_backdoor() {
    let data = preprocessed(synth_linear(500, 5, 11).unwrap(), 11);
    let tuner = CausalTuner::builder().seed(11).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();

    // One entry per resolved candidate
    let registry = Registry::standard();
    let candidates = resolve(
        &registry,
        Identification::Backdoor,
        &Pattern::All,
        data.num_rows(),
        false,
        data.is_multivalue(),
    )
    .unwrap();
    assert!(!candidates.is_empty());
    assert_eq!(run.trials().len(), candidates.len());

    // Exactly one best, and it is a success
    let best = run.best().unwrap();
    assert_eq!(best.status(), TrialStatus::Success);
    assert_eq!(run.best_id(), Some(best.estimator_id()));

    // The winner estimates effects on a held-out 10-row sample
    let sample = data.head(10);
    let effects = run.effect(sample.batch()).unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].len(), 10);
    assert!(effects[0].iter().all(|v| v.is_finite()));
}

#[test]
fn test_one_broken_candidate_never_aborts_the_run() {
    let mut descriptors = vec![EstimatorDescriptor::new(
        "backdoor.DoesNotExist",
        Identification::Backdoor,
        TreatmentSupport::Any,
        1,
        false,
        ConfigKind::Plain,
    )];
    descriptors.extend(Registry::standard().descriptors().iter().cloned());
    let registry = Registry::new(descriptors);

    let data = preprocessed(synth_linear(400, 4, 5).unwrap(), 5);
    let tuner = CausalTuner::builder().registry(registry.clone()).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, true)
        .unwrap();

    let candidates = resolve(
        &registry,
        Identification::Backdoor,
        &Pattern::All,
        data.num_rows(),
        true,
        false,
    )
    .unwrap();
    assert_eq!(run.trials().len(), candidates.len());

    let broken = run.get("backdoor.DoesNotExist").unwrap();
    assert_eq!(broken.status(), TrialStatus::Failed);
    assert!(broken.failure().unwrap().contains("no built-in estimator"));

    // The best is picked from the survivors
    let best = run.best().unwrap();
    assert_ne!(best.estimator_id(), "backdoor.DoesNotExist");
}

#[test]
fn test_multi_valued_treatment_run() {
    let data = preprocessed(synth_multi_treatment(600, 3, 7).unwrap(), 7);
    assert!(data.is_multivalue());

    let tuner = CausalTuner::builder().seed(7).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    for trial in run.trials() {
        let descriptor = Registry::standard()
            .get(trial.estimator_id())
            .unwrap()
            .clone();
        assert!(descriptor.supports_treatment(true));
    }

    // Two non-control levels, one effect vector each
    let effects = run.effect(data.head(10).batch()).unwrap();
    assert_eq!(effects.len(), 2);
    assert!(effects.iter().all(|level| level.len() == 10));
}

#[test]
fn test_iv_run_recovers_confounded_effect() {
    let data = preprocessed(synth_iv(2000, 13).unwrap(), 13);
    let tuner = CausalTuner::builder().seed(13).build().unwrap();
    let run = tuner
        .run(&data, Identification::Iv, &Pattern::All, false)
        .unwrap();
    assert_eq!(run.best_id(), Some("iv.TwoStageLeastSquares"));

    let effects = run.effect(data.head(5).batch()).unwrap();
    // True effect is 2.0; naive difference-in-means is biased upward
    assert!((effects[0][0] - 2.0).abs() < 0.6, "effect = {}", effects[0][0]);
}

#[test]
fn test_categorical_covariates_run_end_to_end() {
    let data = synth_with_categories(500, 19)
        .unwrap()
        .preprocess(&PreprocessOptions {
            seed: Some(19),
            drop_first: true,
        })
        .unwrap();
    // One-hot expansion of "group" landed in the effect modifiers, minus the
    // dropped first level
    let group_levels: Vec<&String> = data
        .features_x()
        .iter()
        .filter(|n| n.starts_with("group_"))
        .collect();
    assert_eq!(group_levels.len(), 2);

    let tuner = CausalTuner::builder().seed(19).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    assert!(run.best().is_ok());
}

#[test]
fn test_empty_selection_surfaces_before_any_fitting() {
    let registry = Registry::new(vec![EstimatorDescriptor::new(
        "backdoor.Dummy",
        Identification::Backdoor,
        TreatmentSupport::Any,
        1,
        false,
        ConfigKind::Plain,
    )]);
    let data = preprocessed(synth_linear(100, 3, 1).unwrap(), 1);
    let tuner = CausalTuner::builder().registry(registry).build().unwrap();
    let err = tuner
        .run(&data, Identification::Iv, &Pattern::All, false)
        .unwrap_err();
    assert!(matches!(err, Error::EmptySelection(_)));
}

#[test]
fn test_exhausted_total_budget_still_enumerates_every_candidate() {
    let data = preprocessed(synth_linear(400, 4, 3).unwrap(), 3);
    let tuner = CausalTuner::builder()
        .budget(Budget::unlimited().with_total(Duration::ZERO))
        .build()
        .unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    assert!(!run.trials().is_empty());
    for trial in run.trials() {
        assert_eq!(trial.status(), TrialStatus::Failed);
        assert!(trial.failure().unwrap().contains("budget exceeded"));
    }
    assert!(matches!(
        run.best(),
        Err(Error::NoSuccessfulTrial { .. })
    ));
}

#[test]
fn test_non_finite_outcome_never_crowns_a_winner() {
    // One NaN outcome poisons every fit; no NaN score may be selected
    let raw = synth_linear(200, 3, 31).unwrap();
    let batch = raw.batch();
    let schema = batch.schema();
    let y_index = schema.index_of("y_factual").unwrap();
    let y = batch
        .column(y_index)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    let mut values: Vec<f64> = y.values().to_vec();
    values[0] = f64::NAN;
    let mut columns = batch.columns().to_vec();
    columns[y_index] = std::sync::Arc::new(Float64Array::from(values));
    let batch = RecordBatch::try_new(schema, columns).unwrap();

    let data = preprocessed(
        CausalDataset::from_batch(batch, "treatment", &["y_factual"]).unwrap(),
        31,
    );
    let tuner = CausalTuner::builder().seed(31).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    assert!(run.best_id().is_none());
    assert!(matches!(run.best(), Err(Error::NoSuccessfulTrial { .. })));
}

#[test]
fn test_rescoring_the_winner_is_idempotent() {
    let data = preprocessed(synth_linear(500, 4, 17).unwrap(), 17);
    let tuner = CausalTuner::builder().seed(17).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    let a = run.score_dataset(&data).unwrap();
    let b = run.score_dataset(&data).unwrap();
    assert!((a - b).abs() < 1e-12);
}

#[test]
fn test_explain_winner_on_bounded_sample() {
    let data = preprocessed(synth_linear(500, 5, 23).unwrap(), 23);
    let tuner = CausalTuner::builder().seed(23).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();

    // Empty exclusion list: every family gets attributions
    let policy = AttributionPolicy::default().with_exclusions(Vec::new());
    let explanation = run.explain(data.head(10).batch(), &policy).unwrap();
    let Explanation::Attributions { names, values } = explanation else {
        panic!("expected attributions");
    };
    assert_eq!(names.len(), data.features_x().len());
    assert_eq!(values.len(), names.len());
    assert!(values.iter().all(|v| v.is_finite() && *v >= 0.0));
}

#[test]
fn test_run_diagnostics_serialize() {
    let data = preprocessed(synth_linear(300, 3, 29).unwrap(), 29);
    let tuner = CausalTuner::builder().seed(29).build().unwrap();
    let run = tuner
        .run(&data, Identification::Backdoor, &Pattern::All, false)
        .unwrap();
    let json = run.to_json();
    assert_eq!(json["best"], serde_json::json!(run.best_id()));
    assert_eq!(
        json["trials"].as_array().unwrap().len(),
        run.trials().len()
    );
}
