#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

//! Flowgrid engine: pull-based dataflow pipelines, stratified validation and toroidal classifier ensembles.

/// Error type shared by every component.
#[path = "../error.rs"]
pub mod error;

/// Instances, data sets and the attribute model seam.
#[path = "../dataset.rs"]
pub mod dataset;

/// Learner capability and reference learners.
#[path = "../classifier.rs"]
pub mod classifier;

/// Typed learner templates.
#[path = "../registry.rs"]
pub mod registry;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Port-wired transformation graph.
#[path = "../dataflow/main.rs"]
pub mod dataflow;

/// Folds, confusion matrices and the validator.
#[path = "../resampling/main.rs"]
pub mod resampling;

/// Toroidal classifier grid.
#[path = "../ensemble/main.rs"]
pub mod ensemble;

/// TOML engine configuration.
#[path = "../config.rs"]
pub mod config;

/// High-level orchestration entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use classifier::{CentroidClassifier, Classifier, PriorClassifier};
pub use config::{EngineConfig, GridSettings, LayoutKind, TelemetrySettings, ValidationSettings};
pub use dataflow::{NodeId, NodeState, Payload, Phase, Pipeline, PortRef, Transform};
pub use dataset::{AttributeModel, DataSet, Instance, NumericSchema};
pub use ensemble::{CellId, ClassifierNode, Grid, NeighborTopology, TemplateLayout, TopologyKind, TrainOutcome};
pub use error::{ErrorKind, FlowError, FlowResult};
pub use registry::{ClassifierKind, ClassifierRegistry};
pub use resampling::{ConfusionMatrix, PipelineHarness, SplitStrategy, ValidationReport, Validator};
pub use runtime::{FlowgridRuntime, GridRun, GridSummary};
pub use telemetry::{EngineTelemetry, EngineTelemetryBuilder};
