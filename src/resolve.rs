//! Pattern resolver
//!
//! Expands a user-supplied selection pattern against a [`Registry`] into the
//! concrete ordered candidate list for one tuning run. Filtering order:
//! identification strategy, treatment cardinality, minimum row count, then the
//! experimental flag. Output order always matches registry declaration order,
//! so identical inputs resolve to identical candidate lists.

use crate::registry::{EstimatorDescriptor, Identification, Registry};
use crate::{Error, Result};
use tracing::debug;

/// Estimator selection pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Every applicable estimator
    All,
    /// Explicit identifiers or case-sensitive name substrings
    Names(Vec<String>),
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        if value == "all" {
            Self::All
        } else {
            Self::Names(vec![value.to_string()])
        }
    }
}

impl From<&[&str]> for Pattern {
    fn from(value: &[&str]) -> Self {
        Self::Names(value.iter().map(ToString::to_string).collect())
    }
}

/// Resolve a selection pattern into an ordered list of descriptors.
///
/// # Arguments
/// * `registry` - Catalog to resolve against
/// * `identification` - Required identification strategy
/// * `pattern` - `Pattern::All` or explicit names/substrings
/// * `data_rows` - Row count of the dataset the run will fit on
/// * `include_experimental` - Keep descriptors flagged experimental
/// * `multivalue` - Dataset treatment takes more than two values
///
/// # Errors
/// Returns [`Error::EmptySelection`] when no descriptor survives filtering.
/// This is a legitimate outcome (e.g. requesting IV estimators against a
/// registry with no IV-capable entries), not a systemic failure.
pub fn resolve<'a>(
    registry: &'a Registry,
    identification: Identification,
    pattern: &Pattern,
    data_rows: usize,
    include_experimental: bool,
    multivalue: bool,
) -> Result<Vec<&'a EstimatorDescriptor>> {
    let survivors: Vec<&EstimatorDescriptor> = registry
        .descriptors()
        .iter()
        .filter(|d| d.matches_identification(identification))
        .filter(|d| d.supports_treatment(multivalue))
        .filter(|d| d.supports_rows(data_rows))
        .filter(|d| include_experimental || !d.experimental())
        .filter(|d| match pattern {
            Pattern::All => true,
            Pattern::Names(names) => names
                .iter()
                .any(|name| d.id() == name || d.id().contains(name.as_str())),
        })
        .collect();

    debug!(
        requested = ?identification,
        data_rows,
        multivalue,
        resolved = survivors.len(),
        "resolved estimator pattern"
    );

    if survivors.is_empty() {
        return Err(Error::EmptySelection(format!(
            "no estimator matches {pattern:?} for {identification:?} on {data_rows} rows (multivalue: {multivalue})"
        )));
    }
    Ok(survivors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConfigKind, TreatmentSupport};

    fn ids(descriptors: &[&EstimatorDescriptor]) -> Vec<String> {
        descriptors.iter().map(|d| d.id().to_string()).collect()
    }

    #[test]
    fn test_resolve_all_backdoor() {
        let registry = Registry::standard();
        let resolved = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::All,
            10_000,
            false,
            false,
        )
        .unwrap();
        let ids = ids(&resolved);
        assert!(ids.contains(&"backdoor.SLearner".to_string()));
        assert!(ids.contains(&"backdoor.XLearner".to_string()));
        // experimental excluded, iv excluded
        assert!(!ids.contains(&"backdoor.RLearner".to_string()));
        assert!(!ids.contains(&"iv.TwoStageLeastSquares".to_string()));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let registry = Registry::standard();
        let run = || {
            ids(&resolve(
                &registry,
                Identification::Backdoor,
                &Pattern::All,
                500,
                true,
                false,
            )
            .unwrap())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_min_rows_excludes_large_estimators() {
        let registry = Registry::standard();
        let resolved = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::All,
            10,
            true,
            false,
        )
        .unwrap();
        for d in resolved {
            assert!(d.min_rows() <= 10, "{} requires {} rows", d.id(), d.min_rows());
        }
    }

    #[test]
    fn test_multivalue_filtering() {
        let registry = Registry::standard();
        let resolved = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::All,
            10_000,
            true,
            true,
        )
        .unwrap();
        for d in &resolved {
            assert!(d.supports_treatment(true), "{} is binary-only", d.id());
        }
        assert!(!ids(&resolved).contains(&"backdoor.XLearner".to_string()));
    }

    #[test]
    fn test_multivalue_only_excluded_for_binary() {
        let registry = Registry::new(vec![
            EstimatorDescriptor::new(
                "backdoor.OrdinalOnly",
                Identification::Backdoor,
                TreatmentSupport::MultiOnly,
                1,
                false,
                ConfigKind::Plain,
            ),
            EstimatorDescriptor::new(
                "backdoor.Dummy",
                Identification::Backdoor,
                TreatmentSupport::Any,
                1,
                false,
                ConfigKind::Plain,
            ),
        ]);
        let resolved = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::All,
            100,
            false,
            false,
        )
        .unwrap();
        assert_eq!(ids(&resolved), vec!["backdoor.Dummy"]);
    }

    #[test]
    fn test_substring_pattern() {
        let registry = Registry::standard();
        let resolved = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::Names(vec!["SLearner".to_string()]),
            1000,
            false,
            false,
        )
        .unwrap();
        assert_eq!(ids(&resolved), vec!["backdoor.SLearner"]);
    }

    #[test]
    fn test_pattern_match_is_case_sensitive() {
        let registry = Registry::standard();
        let err = resolve(
            &registry,
            Identification::Backdoor,
            &Pattern::Names(vec!["slearner".to_string()]),
            1000,
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptySelection(_)));
    }

    #[test]
    fn test_empty_selection_for_missing_iv() {
        let registry = Registry::new(vec![EstimatorDescriptor::new(
            "backdoor.Dummy",
            Identification::Backdoor,
            TreatmentSupport::Any,
            1,
            false,
            ConfigKind::Plain,
        )]);
        let err = resolve(
            &registry,
            Identification::Iv,
            &Pattern::All,
            1000,
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptySelection(_)));
    }
}
