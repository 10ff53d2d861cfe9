//! Estimator registry
//!
//! A [`Registry`] is an immutable catalog of estimator descriptors built once
//! and shared by reference, an explicit value object rather than process-wide
//! mutable state. Declaration order is significant: pattern resolution and
//! tie-breaking both follow it, which keeps repeated runs reproducible.

use serde::{Deserialize, Serialize};

/// Identification strategy an estimator requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identification {
    /// Backdoor adjustment over observed confounders
    Backdoor,
    /// Instrumental variable
    Iv,
    /// Applicable under either strategy
    General,
}

impl Identification {
    /// Parse a strategy hint ("backdoor", "iv", "general").
    #[must_use]
    pub fn parse(hint: &str) -> Option<Self> {
        match hint {
            "backdoor" => Some(Self::Backdoor),
            "iv" => Some(Self::Iv),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Treatment cardinality an estimator supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentSupport {
    /// Binary treatment only
    BinaryOnly,
    /// Multi-valued treatment only
    MultiOnly,
    /// Binary or multi-valued
    Any,
}

/// Which injected configuration the estimator consumes.
///
/// Tagged per descriptor so the tuner never branches on estimator names when
/// wiring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigKind {
    /// No injected configuration beyond fit options
    Plain,
    /// Consumes the injected propensity model
    WithPropensity,
}

/// One entry in the registry: an instantiable estimator family and its
/// applicability conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorDescriptor {
    id: String,
    identification: Identification,
    treatment_support: TreatmentSupport,
    min_rows: usize,
    experimental: bool,
    config: ConfigKind,
}

impl EstimatorDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        identification: Identification,
        treatment_support: TreatmentSupport,
        min_rows: usize,
        experimental: bool,
        config: ConfigKind,
    ) -> Self {
        Self {
            id: id.into(),
            identification,
            treatment_support,
            min_rows,
            experimental,
            config,
        }
    }

    /// Identifier string, e.g. `backdoor.SLearner`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Required identification strategy.
    #[must_use]
    pub const fn identification(&self) -> Identification {
        self.identification
    }

    /// Supported treatment cardinality.
    #[must_use]
    pub const fn treatment_support(&self) -> TreatmentSupport {
        self.treatment_support
    }

    /// Minimum dataset size below which the estimator is excluded.
    #[must_use]
    pub const fn min_rows(&self) -> usize {
        self.min_rows
    }

    /// Whether the estimator is experimental.
    #[must_use]
    pub const fn experimental(&self) -> bool {
        self.experimental
    }

    /// Configuration slots this estimator consumes.
    #[must_use]
    pub const fn config(&self) -> ConfigKind {
        self.config
    }

    /// Whether this descriptor matches the requested identification strategy.
    /// `General` descriptors match every strategy.
    #[must_use]
    pub fn matches_identification(&self, requested: Identification) -> bool {
        self.identification == requested || self.identification == Identification::General
    }

    /// Whether this descriptor supports the dataset's treatment cardinality.
    #[must_use]
    pub const fn supports_treatment(&self, multivalue: bool) -> bool {
        match self.treatment_support {
            TreatmentSupport::Any => true,
            TreatmentSupport::BinaryOnly => !multivalue,
            TreatmentSupport::MultiOnly => multivalue,
        }
    }

    /// Whether this descriptor survives on a dataset of `data_rows` rows.
    #[must_use]
    pub const fn supports_rows(&self, data_rows: usize) -> bool {
        data_rows >= self.min_rows
    }
}

/// Immutable catalog of estimator descriptors in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    descriptors: Vec<EstimatorDescriptor>,
}

impl Registry {
    /// Build a registry from explicit descriptors, preserving order.
    #[must_use]
    pub fn new(descriptors: Vec<EstimatorDescriptor>) -> Self {
        Self { descriptors }
    }

    /// The standard catalog of built-in estimator families.
    #[must_use]
    pub fn standard() -> Self {
        use ConfigKind::{Plain, WithPropensity};
        use Identification::{Backdoor, Iv};
        use TreatmentSupport::{Any, BinaryOnly};

        Self::new(vec![
            EstimatorDescriptor::new("backdoor.Dummy", Backdoor, Any, 1, false, Plain),
            EstimatorDescriptor::new("backdoor.SLearner", Backdoor, Any, 20, false, Plain),
            EstimatorDescriptor::new("backdoor.TLearner", Backdoor, Any, 50, false, Plain),
            EstimatorDescriptor::new(
                "backdoor.TransformedOutcome",
                Backdoor,
                BinaryOnly,
                100,
                false,
                WithPropensity,
            ),
            EstimatorDescriptor::new(
                "backdoor.XLearner",
                Backdoor,
                BinaryOnly,
                1000,
                false,
                WithPropensity,
            ),
            EstimatorDescriptor::new(
                "backdoor.RLearner",
                Backdoor,
                BinaryOnly,
                200,
                true,
                WithPropensity,
            ),
            EstimatorDescriptor::new(
                "iv.TwoStageLeastSquares",
                Iv,
                BinaryOnly,
                100,
                false,
                Plain,
            ),
        ])
    }

    /// All descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[EstimatorDescriptor] {
        &self.descriptors
    }

    /// Look up a descriptor by exact identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&EstimatorDescriptor> {
        self.descriptors.iter().find(|d| d.id() == id)
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
