//! HaloError: Unified error type for mega-halos public APIs
//!
//! Every fallible operation in the pipeline returns this type. Failures raised
//! inside a pipeline stage are wrapped in [`HaloError::Stage`] by the engine so
//! the caller can tell which stage (and which threshold) tripped.

use std::fmt;
use thiserror::Error;

/// The pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Domain,
    Binning,
    SpatialLinking,
    Refinement,
    HaloBuilding,
    TemporalLinking,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Domain => "domain construction",
            Stage::Binning => "cell binning",
            Stage::SpatialLinking => "spatial linking",
            Stage::Refinement => "phase-space refinement",
            Stage::HaloBuilding => "halo hierarchy building",
            Stage::TemporalLinking => "temporal linking",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Unified error type for halo-finding operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HaloError {
    /// A configuration value (or derived geometry) is outside its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A required parameter was not present in the configuration store.
    #[error("A required parameter was not set ({0})")]
    MissingParameter(String),
    /// A parameter exists but holds a value of the wrong type.
    #[error("Parameter `{key}` could not be read as {expected}")]
    ParameterType { key: String, expected: &'static str },
    /// None of the flagged species contributed any particles.
    #[error(
        "The total number of eligible particles is 0: check the Particles/part_type_* flags"
    )]
    NoEligibleParticles,
    /// Per-particle arrays of one species disagree in length.
    #[error("{species} `{field}` has {found} entries, expected {expected}")]
    ArrayLengthMismatch {
        species: String,
        field: &'static str,
        expected: usize,
        found: usize,
    },
    /// The worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    /// The snapshot loader collaborator failed.
    #[error("Snapshot loader error: {0}")]
    Loader(String),
    /// The output sink collaborator failed.
    #[error("Output sink error: {0}")]
    Sink(String),
    /// A structural invariant was violated.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    /// A failure annotated with the stage it came from.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<HaloError>,
    },
}

impl HaloError {
    /// Wraps `self` with the stage it was raised in. Already-annotated errors
    /// keep their innermost stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ HaloError::Stage { .. } => e,
            other => HaloError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was raised in, if annotated.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            HaloError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Extension for attaching a [`Stage`] to a `Result`.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, HaloError>;
}

impl<T> StageContext<T> for Result<T, HaloError> {
    fn stage(self, stage: Stage) -> Result<T, HaloError> {
        self.map_err(|e| e.in_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_context_is_reported() {
        let r: Result<(), HaloError> = Err(HaloError::NoEligibleParticles);
        let e = r.stage(Stage::Domain).unwrap_err();
        assert_eq!(e.stage(), Some(Stage::Domain));
        assert!(e.to_string().starts_with("domain construction failed"));
    }

    #[test]
    fn innermost_stage_wins() {
        let e = HaloError::MissingParameter("Halos/x".into())
            .in_stage(Stage::Binning)
            .in_stage(Stage::Output);
        assert_eq!(e.stage(), Some(Stage::Binning));
    }
}
