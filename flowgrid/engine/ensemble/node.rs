use std::mem;

use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    classifier::{predict, Classifier},
    dataset::{DataSet, Instance},
    error::{FlowError, FlowResult},
    resampling::ConfusionMatrix,
    telemetry::{self, EngineTelemetry},
};

/// Result of a guarded retraining attempt.
#[derive(Debug)]
pub enum TrainOutcome {
    /// The freshly trained shadow became active.
    Swapped,
    /// Training failed; the previous active classifier is still in place.
    Retained(FlowError),
}

impl TrainOutcome {
    /// Whether the active classifier changed.
    #[must_use]
    pub const fn swapped(&self) -> bool {
        matches!(self, Self::Swapped)
    }
}

/// One grid cell: a learner pair plus the instances it trains on.
#[derive(Debug)]
pub struct ClassifierNode {
    active: Box<dyn Classifier>,
    shadow: Box<dyn Classifier>,
    assigned: DataSet,
    selected: DataSet,
    received: DataSet,
    telemetry: Option<EngineTelemetry>,
}

impl ClassifierNode {
    /// Seeds both learner slots from `template`.
    #[must_use]
    pub fn new(template: Box<dyn Classifier>, num_classes: usize) -> Self {
        let shadow = template.boxed_clone();
        Self {
            active: template,
            shadow,
            assigned: DataSet::new(num_classes),
            selected: DataSet::new(num_classes),
            received: DataSet::new(num_classes),
            telemetry: None,
        }
    }

    /// Attaches telemetry used for retraining warnings.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Option<EngineTelemetry>) -> Self {
        self.set_telemetry(telemetry);
        self
    }

    /// Replaces the telemetry handle.
    pub fn set_telemetry(&mut self, telemetry: Option<EngineTelemetry>) {
        self.telemetry = telemetry;
    }

    /// Learner currently answering queries.
    #[must_use]
    pub fn active(&self) -> &dyn Classifier {
        self.active.as_ref()
    }

    /// Replaces the node's own training instances.
    pub fn assign(&mut self, data: DataSet) {
        self.assigned = data;
    }

    /// Node's own training instances.
    #[must_use]
    pub const fn assigned(&self) -> &DataSet {
        &self.assigned
    }

    /// Instances chosen by the last `select`.
    #[must_use]
    pub const fn selected(&self) -> &DataSet {
        &self.selected
    }

    /// Instances delivered by neighbors.
    #[must_use]
    pub const fn received(&self) -> &DataSet {
        &self.received
    }

    /// Replaces the neighbor deliveries.
    pub fn set_received(&mut self, data: DataSet) {
        self.received = data;
    }

    /// Keeps the `count` heaviest assigned instances as the last selection.
    ///
    /// Equal weights keep assignment order.
    pub fn select(&mut self, count: usize) -> &DataSet {
        let mut order: Vec<usize> = (0..self.assigned.len()).collect();
        let instances = self.assigned.instances();
        order.sort_by(|&a, &b| instances[b].weight.total_cmp(&instances[a].weight));
        order.truncate(count);
        order.sort_unstable();
        self.selected = self.assigned.subset(&order);
        &self.selected
    }

    /// Assigned instances followed by received ones.
    pub fn training_data(&self) -> FlowResult<DataSet> {
        let mut data = self.assigned.clone();
        data.extend_from(&self.received)?;
        Ok(data)
    }

    /// Retrains the active learner; on error the previous model is kept.
    pub fn train(&mut self) -> FlowResult<()> {
        let data = self.training_data()?;
        let mut candidate = self.active.boxed_clone();
        candidate.train(&data)?;
        self.active = candidate;
        Ok(())
    }

    /// Trains the shadow learner and promotes it only on success.
    ///
    /// The demoted learner becomes the next shadow. Failures are logged at
    /// `WARN` and handed back rather than propagated.
    pub fn train_safe(&mut self) -> TrainOutcome {
        let attempt = self
            .training_data()
            .and_then(|data| self.shadow.train(&data));
        match attempt {
            Ok(()) => {
                mem::swap(&mut self.active, &mut self.shadow);
                TrainOutcome::Swapped
            }
            Err(err) => {
                telemetry::log(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "grid.train_safe_retained",
                    json!({
                        "classifier": self.active.name(),
                        "error": err.to_string(),
                    }),
                );
                TrainOutcome::Retained(err)
            }
        }
    }

    /// Largest posterior the active learner assigns to `instance`.
    pub fn classify(&self, instance: &Instance) -> FlowResult<f64> {
        predict(self.active.as_ref(), instance).map(|(_, confidence)| confidence)
    }

    /// Scores `test` with the active learner.
    pub fn test_confusion(&self, test: &DataSet) -> FlowResult<ConfusionMatrix> {
        let mut matrix = ConfusionMatrix::new(test.num_classes());
        for inst in test {
            let (predicted, _) = predict(self.active.as_ref(), inst)?;
            matrix.record(inst.label, predicted)?;
        }
        Ok(matrix)
    }

    /// Reweights `data` with the active learner's confidences.
    pub fn reweight(&self, data: &mut DataSet) -> FlowResult<()> {
        reweight_with(self.active.as_ref(), data)
    }

    /// Reweights the node's own assigned instances.
    pub fn reweight_assigned(&mut self) -> FlowResult<()> {
        reweight_with(self.active.as_ref(), &mut self.assigned)
    }
}

/// Two-class confidence reweighting.
///
/// Each weight is multiplied by the larger class confidence, then every weight
/// is scaled by `before / after` so the total mass is unchanged. Nothing is
/// written unless the whole set could be reweighted.
pub fn reweight_with(classifier: &dyn Classifier, data: &mut DataSet) -> FlowResult<()> {
    let before = data.total_weight();
    let mut weights = Vec::with_capacity(data.len());
    for inst in data.iter() {
        let distribution = classifier.distribution(inst)?;
        let [first, second] = distribution[..] else {
            return Err(FlowError::config(format!(
                "reweighting is defined for two classes, {} returned {}",
                classifier.name(),
                distribution.len()
            )));
        };
        weights.push(inst.weight * first.max(second));
    }
    if before == 0.0 {
        return Ok(());
    }
    let after: f64 = weights.iter().sum();
    if !(after.is_finite() && after > 0.0) {
        return Err(FlowError::training(format!(
            "reweighting by {} collapses mass {before} to {after}",
            classifier.name()
        )));
    }
    let scale = before / after;
    for (inst, weight) in data.instances_mut().iter_mut().zip(weights) {
        inst.weight = weight * scale;
    }
    Ok(())
}
