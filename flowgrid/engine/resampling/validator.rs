use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use super::{
    confusion::ConfusionMatrix,
    folds::{build_folds, Fold},
    strategy::{SplitStrategy, DEFAULT_SEED},
};
use crate::{
    classifier::Classifier,
    dataflow::{ClassifierTransform, Normalizer, Payload, Phase, Pipeline, PortRef},
    dataset::DataSet,
    error::{FlowError, FlowResult},
    telemetry::{self, EngineTelemetry},
};

/// A pipeline plus the ports a validator feeds and reads.
#[derive(Debug)]
pub struct PipelineHarness {
    /// Graph under test.
    pub pipeline: Pipeline,
    /// Input port receiving train and test batches.
    pub entry: PortRef,
    /// Output port yielding `Trained` then `Predictions`.
    pub exit: PortRef,
}

impl PipelineHarness {
    /// Wraps an already wired pipeline.
    #[must_use]
    pub const fn new(pipeline: Pipeline, entry: PortRef, exit: PortRef) -> Self {
        Self {
            pipeline,
            entry,
            exit,
        }
    }

    /// `[Normalizer ->] ClassifierTransform`, initialized and ready to validate.
    pub fn for_classifier(classifier: Box<dyn Classifier>, normalize: bool) -> FlowResult<Self> {
        let mut pipeline = Pipeline::new();
        let learner = pipeline.add_node(ClassifierTransform::new(classifier));
        let entry = if normalize {
            let scaler = pipeline.add_node(Normalizer::new());
            pipeline.register_consumer(scaler, 0, learner, 0)?;
            scaler
        } else {
            learner
        };
        pipeline.init_all()?;
        Ok(Self::new(
            pipeline,
            PortRef::new(entry, 0),
            PortRef::new(learner, 0),
        ))
    }
}

/// Result of one fold, produced independently of other folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldOutcome {
    /// Fold position.
    pub index: usize,
    /// Training instances used.
    pub train_size: usize,
    /// Fold-local confusion counts.
    pub matrix: ConfusionMatrix,
}

impl FoldOutcome {
    /// Fold-local error rate.
    #[must_use]
    pub fn error(&self) -> f64 {
        self.matrix.error_rate()
    }
}

/// Per-fold line of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldSummary {
    /// Fold position.
    pub index: usize,
    /// Training instances.
    pub train_size: usize,
    /// Test instances.
    pub test_size: u64,
    /// Misclassified test instances.
    pub mismatches: u64,
    /// `mismatches / test_size`.
    pub error: f64,
}

/// Aggregated result of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Strategy used.
    pub strategy: SplitStrategy,
    /// Seed the folds were built with.
    pub seed: u64,
    /// One entry per fold, in fold order.
    pub folds: Vec<FoldSummary>,
    /// Counts over every test instance of every fold.
    pub confusion: ConfusionMatrix,
    /// `mismatches / total test instances`.
    pub classification_error: f64,
}

impl ValidationReport {
    /// Renders a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[validation] strategy={} folds={} tested={} error={:.4}",
            self.strategy.kind(),
            self.folds.len(),
            self.confusion.total(),
            self.classification_error
        )
    }
}

/// Drives a pipeline through the train/test cycle of every fold.
#[derive(Debug)]
pub struct Validator {
    strategy: SplitStrategy,
    seed: u64,
    telemetry: Option<EngineTelemetry>,
    report: Option<ValidationReport>,
}

impl Validator {
    /// Builds a validator from a strategy name and its parameters.
    pub fn create(strategy: &str, params: &[f64]) -> FlowResult<Self> {
        Ok(Self::new(SplitStrategy::parse(strategy, params)?))
    }

    /// Builds a validator from a validated strategy.
    #[must_use]
    pub const fn new(strategy: SplitStrategy) -> Self {
        Self {
            strategy,
            seed: DEFAULT_SEED,
            telemetry: None,
            report: None,
        }
    }

    /// Overrides the partitioning seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> SplitStrategy {
        self.strategy
    }

    /// Configured seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Folds this validator would evaluate on `data`.
    pub fn folds(&self, data: &DataSet) -> FlowResult<Vec<Fold>> {
        build_folds(data, self.strategy, self.seed)
    }

    /// Runs every fold through one reused pipeline.
    pub fn test(&mut self, data: &DataSet, harness: &mut PipelineHarness) -> FlowResult<&ValidationReport> {
        let folds = self.folds(data)?;
        self.log_start(data, folds.len(), false);
        let mut outcomes = Vec::with_capacity(folds.len());
        for fold in &folds {
            let outcome = evaluate_fold(harness, fold, data)?;
            self.log_fold(&outcome);
            outcomes.push(outcome);
        }
        self.finish(data, outcomes)
    }

    /// Runs folds on blocking tokio workers, one fresh pipeline per fold.
    ///
    /// Must be awaited inside a tokio runtime. Fold-local matrices are merged
    /// after every worker has finished.
    pub async fn test_concurrent<F>(&mut self, data: Arc<DataSet>, factory: F) -> FlowResult<&ValidationReport>
    where
        F: Fn() -> FlowResult<PipelineHarness> + Send + Sync + 'static,
    {
        let folds = self.folds(&data)?;
        self.log_start(&data, folds.len(), true);
        let factory = Arc::new(factory);
        let workers = folds.into_iter().map(|fold| {
            let data = Arc::clone(&data);
            let factory = Arc::clone(&factory);
            tokio::task::spawn_blocking(move || {
                let mut harness = (*factory)()?;
                evaluate_fold(&mut harness, &fold, &data)
            })
        });
        let mut outcomes = Vec::new();
        let mut failure = None;
        for joined in join_all(workers).await {
            let result = joined
                .map_err(|err| FlowError::training(format!("fold worker failed: {err}")).with_source(err))
                .and_then(|outcome| outcome);
            match result {
                Ok(outcome) => {
                    self.log_fold(&outcome);
                    outcomes.push(outcome);
                }
                Err(err) if failure.is_none() => failure = Some(err),
                Err(_) => {}
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        outcomes.sort_by_key(|outcome| outcome.index);
        self.finish(&data, outcomes)
    }

    /// Aggregated matrix of the last completed run.
    #[must_use]
    pub fn confusion_matrix(&self) -> Option<&ConfusionMatrix> {
        self.report.as_ref().map(|report| &report.confusion)
    }

    /// Classification error of the last completed run.
    #[must_use]
    pub fn classification_error(&self) -> Option<f64> {
        self.report.as_ref().map(|report| report.classification_error)
    }

    /// Full report of the last completed run.
    #[must_use]
    pub const fn report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    fn log_start(&self, data: &DataSet, folds: usize, concurrent: bool) {
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "validation.started",
            json!({
                "strategy": self.strategy.kind().to_string(),
                "folds": folds,
                "instances": data.len(),
                "seed": self.seed,
                "concurrent": concurrent,
            }),
        );
    }

    fn log_fold(&self, outcome: &FoldOutcome) {
        let payload = json!({
            "fold": outcome.index,
            "train_size": outcome.train_size,
            "test_size": outcome.matrix.total(),
            "error": outcome.error(),
        });
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "validation.fold_completed",
            payload.clone(),
        );
        telemetry::event(
            self.telemetry.as_ref(),
            "flowgrid.validation.fold_completed",
            payload,
        );
    }

    fn finish(&mut self, data: &DataSet, outcomes: Vec<FoldOutcome>) -> FlowResult<&ValidationReport> {
        let mut confusion = ConfusionMatrix::new(data.num_classes());
        let mut folds = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            confusion.merge(&outcome.matrix)?;
            folds.push(FoldSummary {
                index: outcome.index,
                train_size: outcome.train_size,
                test_size: outcome.matrix.total(),
                mismatches: outcome.matrix.mismatches(),
                error: outcome.error(),
            });
        }
        let report = ValidationReport {
            strategy: self.strategy,
            seed: self.seed,
            folds,
            classification_error: confusion.error_rate(),
            confusion,
        };
        let payload = json!({
            "folds": report.folds.len(),
            "tested": report.confusion.total(),
            "error": report.classification_error,
        });
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "validation.completed",
            payload.clone(),
        );
        telemetry::event(self.telemetry.as_ref(), "flowgrid.validation.completed", payload);
        Ok(self.report.insert(report))
    }
}

/// Trains on the fold's train set, then scores its test set, through the harness ports.
pub fn evaluate_fold(harness: &mut PipelineHarness, fold: &Fold, data: &DataSet) -> FlowResult<FoldOutcome> {
    let (train, test) = fold.materialize(data);
    let train_size = train.len();
    let test = Arc::new(test);
    let PipelineHarness {
        pipeline,
        entry,
        exit,
    } = harness;

    pipeline.set_supplier_data(entry.node, entry.index, Payload::batch(Phase::Train, train))?;
    match pipeline.get_consumer_data(exit.node, exit.index)? {
        Payload::Trained { .. } => {}
        other => {
            return Err(FlowError::config(format!(
                "exit port {exit} returned {} for a train batch",
                other.kind_name()
            )))
        }
    }

    pipeline.set_supplier_data(
        entry.node,
        entry.index,
        Payload::batch(Phase::Test, Arc::clone(&test)),
    )?;
    let predictions = match pipeline.get_consumer_data(exit.node, exit.index)? {
        Payload::Predictions(predictions) if predictions.len() == test.len() => predictions,
        Payload::Predictions(predictions) => {
            return Err(FlowError::config(format!(
                "exit port {exit} returned {} predictions for {} test instances",
                predictions.len(),
                test.len()
            )))
        }
        other => {
            return Err(FlowError::config(format!(
                "exit port {exit} returned {} for a test batch",
                other.kind_name()
            )))
        }
    };

    let mut matrix = ConfusionMatrix::new(data.num_classes());
    for (inst, predicted) in test.iter().zip(predictions) {
        matrix.record(inst.label, predicted)?;
    }
    Ok(FoldOutcome {
        index: fold.index,
        train_size,
        matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::{CentroidClassifier, PriorClassifier},
        dataflow::{Arity, Transform},
        dataset::{Instance, NumericSchema},
        error::ErrorKind,
    };
    use shared_logging::MemoryLogger;

    fn centroid_harness() -> FlowResult<PipelineHarness> {
        PipelineHarness::for_classifier(
            Box::new(CentroidClassifier::new(Arc::new(NumericSchema::new(2)))),
            true,
        )
    }

    #[test]
    fn cross_validation_counts_every_instance_once() {
        let data = DataSet::synthetic(60, 3, 2, 5);
        let mut validator = Validator::create("cross-validation", &[5.0]).unwrap();
        let mut harness = centroid_harness().unwrap();
        let report = validator.test(&data, &mut harness).unwrap();
        assert_eq!(report.folds.len(), 5);
        assert_eq!(report.confusion.total(), 60);
        let counts = data.class_counts();
        for (class, count) in counts.iter().enumerate() {
            assert_eq!(report.confusion.row_total(class), *count as u64);
        }
        let expected = report.confusion.mismatches() as f64 / 60.0;
        assert!((report.classification_error - expected).abs() < 1e-12);
        assert_eq!(validator.classification_error(), Some(expected));
    }

    #[test]
    fn separable_blobs_score_well() {
        let data = DataSet::synthetic(80, 2, 3, 2);
        let mut validator = Validator::create("CrossValidation", &[4.0]).unwrap();
        let mut harness = centroid_harness_3d().unwrap();
        validator.test(&data, &mut harness).unwrap();
        assert!(validator.classification_error().unwrap() < 0.2);
    }

    fn centroid_harness_3d() -> FlowResult<PipelineHarness> {
        PipelineHarness::for_classifier(
            Box::new(CentroidClassifier::new(Arc::new(NumericSchema::new(3)))),
            false,
        )
    }

    #[test]
    fn fixed_ratio_runs_one_fold() {
        let data = DataSet::synthetic(20, 2, 2, 8);
        let mut validator = Validator::create("fixed-ratio", &[0.75]).unwrap();
        let mut harness = PipelineHarness::for_classifier(Box::new(PriorClassifier::new()), false).unwrap();
        let report = validator.test(&data, &mut harness).unwrap();
        assert_eq!(report.folds.len(), 1);
        assert_eq!(report.folds[0].train_size, 16);
        assert_eq!(report.confusion.total(), 4);
    }

    #[test]
    fn insufficient_data_surfaces_before_any_fold() {
        let data = DataSet::synthetic(6, 2, 2, 8);
        let mut validator = Validator::create("cross-validation", &[4.0]).unwrap();
        let mut harness = centroid_harness().unwrap();
        let err = validator.test(&data, &mut harness).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert!(validator.report().is_none());
    }

    /// Echoes batches back, so the exit never yields predictions.
    struct Echo;

    impl Transform for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn arity(&self) -> Arity {
            Arity::new(1, 1)
        }
        fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
            Ok(vec![inputs[0].clone()])
        }
    }

    #[test]
    fn misbehaving_pipeline_is_a_config_error() {
        let mut pipeline = Pipeline::new();
        let echo = pipeline.add_node(Echo);
        pipeline.init_all().unwrap();
        let mut harness = PipelineHarness::new(pipeline, PortRef::new(echo, 0), PortRef::new(echo, 0));
        let mut validator = Validator::create("cross-validation", &[2.0]).unwrap();
        let err = validator
            .test(&DataSet::synthetic(8, 2, 1, 1), &mut harness)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn telemetry_logs_each_fold() {
        let sink = Arc::new(MemoryLogger::new());
        let telemetry = EngineTelemetry::builder("validator")
            .log_sink(sink.clone())
            .build()
            .unwrap();
        let mut validator = Validator::create("cross-validation", &[3.0])
            .unwrap()
            .with_telemetry(telemetry);
        let mut harness = centroid_harness().unwrap();
        validator
            .test(&DataSet::synthetic(30, 2, 2, 3), &mut harness)
            .unwrap();
        assert_eq!(sink.count("validation.fold_completed"), 3);
        assert_eq!(sink.count("validation.completed"), 1);
    }

    /// Prior learner whose shared counter makes every training after the first fail.
    #[derive(Clone)]
    struct FirstFoldOnly {
        inner: PriorClassifier,
        trainings: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Classifier for FirstFoldOnly {
        fn name(&self) -> &str {
            "first_fold_only"
        }
        fn train(&mut self, data: &DataSet) -> FlowResult<()> {
            if self.trainings.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                return Err(FlowError::training("learner refuses a second fold"));
            }
            self.inner.train(data)
        }
        fn distribution(&self, instance: &Instance) -> FlowResult<Vec<f64>> {
            self.inner.distribution(instance)
        }
        fn boxed_clone(&self) -> Box<dyn Classifier> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn finished_folds_are_logged_before_a_later_fold_fails() {
        let sink = Arc::new(MemoryLogger::new());
        let telemetry = EngineTelemetry::builder("validator")
            .log_sink(sink.clone())
            .build()
            .unwrap();
        let learner = FirstFoldOnly {
            inner: PriorClassifier::new(),
            trainings: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        };
        let mut harness = PipelineHarness::for_classifier(Box::new(learner), false).unwrap();
        let mut validator = Validator::create("cross-validation", &[3.0])
            .unwrap()
            .with_telemetry(telemetry);
        let err = validator
            .test(&DataSet::synthetic(30, 2, 2, 3), &mut harness)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Training);
        assert_eq!(sink.count("validation.fold_completed"), 1);
        assert_eq!(sink.count("validation.completed"), 0);
        assert!(validator.report().is_none());
    }

    #[test]
    fn concurrent_run_matches_sequential_run() {
        let data = Arc::new(DataSet::synthetic(45, 3, 2, 12));
        let mut sequential = Validator::create("cross-validation", &[3.0]).unwrap();
        let mut harness = centroid_harness().unwrap();
        let expected = sequential.test(&data, &mut harness).unwrap().confusion.clone();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut concurrent = Validator::create("cross-validation", &[3.0]).unwrap();
        let report = runtime
            .block_on(concurrent.test_concurrent(Arc::clone(&data), centroid_harness))
            .unwrap();
        assert_eq!(report.confusion, expected);
        let indices: Vec<usize> = report.folds.iter().map(|fold| fold.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
