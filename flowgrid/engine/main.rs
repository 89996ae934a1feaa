//! Runtime tying the classifier registry, configuration and telemetry together.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

use crate::{
    classifier::Classifier,
    config::{EngineConfig, LayoutKind},
    dataset::{AttributeModel, DataSet},
    ensemble::{Grid, RoundReport, TemplateLayout},
    error::{FlowError, FlowResult},
    registry::ClassifierRegistry,
    resampling::{ConfusionMatrix, PipelineHarness, ValidationReport, Validator},
    telemetry::{self, EngineTelemetry},
};

/// Grid after its configured rounds.
#[derive(Debug)]
pub struct GridRun {
    /// Trained grid.
    pub grid: Grid,
    /// One report per round.
    pub rounds: Vec<RoundReport>,
    /// Neighborhood votes of every instance at the cell it was dealt to.
    pub confusion: ConfusionMatrix,
}

impl GridRun {
    /// Serializable digest.
    #[must_use]
    pub fn summary(&self) -> GridSummary {
        GridSummary {
            width: self.grid.width(),
            height: self.grid.height(),
            degree: self.grid.topology().degree(),
            rounds: self.rounds.clone(),
            vote_error: self.confusion.error_rate(),
        }
    }
}

/// Serializable digest of a grid run.
#[derive(Debug, Clone, Serialize)]
pub struct GridSummary {
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
    /// Neighbors per cell.
    pub degree: usize,
    /// Per-round reports.
    pub rounds: Vec<RoundReport>,
    /// Error of the neighborhood votes.
    pub vote_error: f64,
}

/// Top-level entry point for validation and grid runs.
#[derive(Debug)]
pub struct FlowgridRuntime {
    registry: ClassifierRegistry,
    config: EngineConfig,
    telemetry: Option<EngineTelemetry>,
}

impl FlowgridRuntime {
    /// Runtime with the built-in learners sharing `schema`.
    #[must_use]
    pub fn new(config: EngineConfig, schema: Arc<dyn AttributeModel>) -> Self {
        Self::with_registry(config, ClassifierRegistry::with_defaults(schema))
    }

    /// Runtime over an existing registry.
    #[must_use]
    pub const fn with_registry(config: EngineConfig, registry: ClassifierRegistry) -> Self {
        Self {
            registry,
            config,
            telemetry: None,
        }
    }

    /// Builds the runtime and the sinks named in `[telemetry]`.
    pub fn from_config(config: EngineConfig, schema: Arc<dyn AttributeModel>) -> anyhow::Result<Self> {
        let settings = &config.telemetry;
        let telemetry = if settings.log_path.is_some() || settings.event_log.is_some() {
            let mut builder = EngineTelemetry::builder(settings.module.clone());
            if let Some(path) = &settings.log_path {
                builder = builder.log_path(path);
            }
            if let Some(path) = &settings.event_log {
                let publisher = FileEventPublisher::new(path)
                    .with_context(|| format!("opening event log {}", path.display()))?;
                builder = builder.event_publisher(Arc::new(publisher));
            }
            Some(builder.build().context("building engine telemetry")?)
        } else {
            None
        };
        let runtime = Self::new(config, schema);
        Ok(match telemetry {
            Some(telemetry) => runtime.with_telemetry(telemetry),
            None => runtime,
        })
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Learner templates.
    #[must_use]
    pub const fn registry(&self) -> &ClassifierRegistry {
        &self.registry
    }

    /// Fresh pipeline for the configured learner.
    pub fn harness(&self) -> FlowResult<PipelineHarness> {
        let settings = &self.config.validation;
        let template = self.registry.template(settings.classifier_kind()?)?;
        PipelineHarness::for_classifier(template, settings.normalize)
    }

    fn validator(&self) -> FlowResult<Validator> {
        let settings = &self.config.validation;
        let validator = Validator::new(settings.split_strategy()?).with_seed(settings.seed);
        Ok(match &self.telemetry {
            Some(telemetry) => validator.with_telemetry(telemetry.clone()),
            None => validator,
        })
    }

    /// Validates the configured learner on `data`, one fold after another.
    pub fn validate(&self, data: &DataSet) -> FlowResult<ValidationReport> {
        let mut validator = self.validator()?;
        let mut harness = self.harness()?;
        validator.test(data, &mut harness).cloned()
    }

    /// Validates with folds spread over tokio blocking workers.
    pub async fn validate_concurrent(&self, data: Arc<DataSet>) -> FlowResult<ValidationReport> {
        let settings = &self.config.validation;
        let template = self.registry.template(settings.classifier_kind()?)?;
        let normalize = settings.normalize;
        let mut validator = self.validator()?;
        let report = validator
            .test_concurrent(data, move || {
                PipelineHarness::for_classifier(template.boxed_clone(), normalize)
            })
            .await?;
        Ok(report.clone())
    }

    /// Builds the configured grid for `num_classes` classes.
    pub fn build_grid(&self, num_classes: usize) -> FlowResult<Grid> {
        let settings = &self.config.grid;
        let layout = match settings.layout_kind()? {
            LayoutKind::Uniform => {
                TemplateLayout::Uniform(self.registry.template(settings.classifier.parse()?)?)
            }
            LayoutKind::ByRow => TemplateLayout::ByRow(self.band_templates()?),
            LayoutKind::ByColumn => TemplateLayout::ByColumn(self.band_templates()?),
        };
        Grid::new(
            settings.width,
            settings.height,
            num_classes,
            &layout,
            settings.topology()?,
            self.telemetry.clone(),
        )
    }

    fn band_templates(&self) -> FlowResult<Vec<Box<dyn Classifier>>> {
        self.config
            .grid
            .template_kinds()?
            .into_iter()
            .map(|kind| self.registry.template(kind))
            .collect()
    }

    /// Deals `data` over a fresh grid, runs the configured rounds and scores
    /// every instance by neighborhood vote at its home cell.
    pub fn run_grid(&self, data: &DataSet) -> FlowResult<GridRun> {
        if data.is_empty() {
            return Err(FlowError::insufficient_data("grid run needs at least one instance"));
        }
        let settings = &self.config.grid;
        let grid = self.build_grid(data.num_classes())?;
        grid.distribute(data)?;
        let rounds = (0..settings.rounds)
            .map(|_| grid.run_round(settings.select))
            .collect::<FlowResult<Vec<_>>>()?;

        let cells: Vec<_> = grid.cells().collect();
        let mut confusion = ConfusionMatrix::new(data.num_classes());
        for (idx, inst) in data.iter().enumerate() {
            let (predicted, _) = grid.neighborhood_vote(cells[idx % cells.len()], inst)?;
            confusion.record(inst.label, predicted)?;
        }
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "grid.run_completed",
            json!({
                "rounds": rounds.len(),
                "vote_error": confusion.error_rate(),
            }),
        );
        Ok(GridRun {
            grid,
            rounds,
            confusion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, dataset::NumericSchema, error::ErrorKind};
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    fn runtime(raw: &str) -> FlowgridRuntime {
        FlowgridRuntime::new(
            EngineConfig::from_toml_str(raw).unwrap(),
            Arc::new(NumericSchema::new(2)),
        )
    }

    #[test]
    fn validates_configured_learner() {
        let runtime = runtime("[validation]\nparams = [4.0]\nseed = 3");
        let data = DataSet::synthetic(80, 2, 2, 1);
        let report = runtime.validate(&data).unwrap();
        assert_eq!(report.folds.len(), 4);
        assert_eq!(report.seed, 3);
        assert_eq!(report.confusion.total(), 80);
        assert!(report.classification_error < 0.25);
    }

    #[test]
    fn concurrent_validation_agrees() {
        let runtime = runtime("[validation]\nparams = [5.0]");
        let data = Arc::new(DataSet::synthetic(50, 2, 2, 4));
        let sequential = runtime.validate(&data).unwrap();
        let tokio_rt = tokio::runtime::Runtime::new().unwrap();
        let concurrent = tokio_rt
            .block_on(runtime.validate_concurrent(Arc::clone(&data)))
            .unwrap();
        assert_eq!(sequential.confusion, concurrent.confusion);
        assert!((sequential.classification_error - concurrent.classification_error).abs() < 1e-12);
    }

    #[test]
    fn runs_grid_rounds() {
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = EngineTelemetry::builder("runtime")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let runtime = runtime("[grid]\nwidth = 3\nheight = 3\nrounds = 2\nselect = 3").with_telemetry(telemetry);
        let run = runtime.run_grid(&DataSet::synthetic(90, 2, 2, 6)).unwrap();
        assert_eq!(run.rounds.len(), 2);
        assert_eq!(run.confusion.total(), 90);
        assert_eq!(bus.events_of("flowgrid.grid.round_completed").len(), 2);
        let summary = run.summary();
        assert_eq!(summary.degree, 4);
        assert!(summary.vote_error < 0.25);
    }

    #[test]
    fn banded_grids_use_each_template() {
        let runtime = runtime(
            "[grid]\nwidth = 4\nheight = 2\ntemplate_layout = \"by-column\"\ntemplates = [\"prior\", \"centroid\"]",
        );
        let grid = runtime.build_grid(2).unwrap();
        let left = grid.node(grid.cell_at(0, 0)).unwrap().active().name().to_string();
        let right = grid.node(grid.cell_at(3, 1)).unwrap().active().name().to_string();
        assert_eq!((left.as_str(), right.as_str()), ("prior", "centroid"));
    }

    #[test]
    fn multi_class_grid_runs_are_rejected() {
        let err = runtime("[grid]\nwidth = 3\nheight = 3")
            .run_grid(&DataSet::synthetic(30, 3, 2, 8))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn empty_data_is_insufficient() {
        let err = runtime("").run_grid(&DataSet::new(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn file_sinks_come_from_config() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.validation.params = vec![2.0];
        config.telemetry.log_path = Some(dir.path().join("engine.log"));
        config.telemetry.event_log = Some(dir.path().join("events.jsonl"));
        let runtime = FlowgridRuntime::from_config(config, Arc::new(NumericSchema::new(2))).unwrap();
        runtime.validate(&DataSet::synthetic(20, 2, 2, 2)).unwrap();
        let logs = std::fs::read_to_string(dir.path().join("engine.log")).unwrap();
        assert!(logs.contains("validation.completed"));
        let events = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(events.lines().count(), 3);
    }
}
