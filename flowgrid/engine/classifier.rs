use std::{fmt, sync::Arc};

use crate::{
    dataset::{AttributeModel, DataSet, Instance},
    error::{FlowError, FlowResult},
};

/// Black-box learner capability used by pipeline nodes and grid cells.
///
/// `train` must rebuild the model from scratch; a failed call may leave the
/// receiver in any state, so callers that need atomicity train a copy.
pub trait Classifier: Send + Sync {
    /// Short learner name used in logs.
    fn name(&self) -> &str;
    /// Builds the model from weighted instances.
    fn train(&mut self, data: &DataSet) -> FlowResult<()>;
    /// Posterior probability per class.
    fn distribution(&self, instance: &Instance) -> FlowResult<Vec<f64>>;
    /// Clones the learner behind a fresh box.
    fn boxed_clone(&self) -> Box<dyn Classifier>;
}

impl Clone for Box<dyn Classifier> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

impl fmt::Debug for dyn Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("name", &self.name())
            .finish()
    }
}

/// Index and value of the largest entry; ties resolve to the lowest index.
#[must_use]
pub fn argmax(distribution: &[f64]) -> Option<(usize, f64)> {
    distribution
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (idx, value)| match best {
            Some((_, top)) if top >= value => best,
            _ => Some((idx, value)),
        })
}

/// Predicted class and its confidence.
pub fn predict(classifier: &dyn Classifier, instance: &Instance) -> FlowResult<(usize, f64)> {
    let distribution = classifier.distribution(instance)?;
    argmax(&distribution).ok_or_else(|| {
        FlowError::training(format!("{} returned an empty distribution", classifier.name()))
    })
}

/// Weighted nearest-centroid learner; posteriors are a softmax over negative distances.
#[derive(Clone)]
pub struct CentroidClassifier {
    schema: Arc<dyn AttributeModel>,
    centroids: Vec<Option<Instance>>,
}

impl CentroidClassifier {
    /// Untrained learner measuring distance with `schema`.
    #[must_use]
    pub fn new(schema: Arc<dyn AttributeModel>) -> Self {
        Self {
            schema,
            centroids: Vec::new(),
        }
    }
}

impl fmt::Debug for CentroidClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentroidClassifier")
            .field("centroids", &self.centroids)
            .finish_non_exhaustive()
    }
}

impl Classifier for CentroidClassifier {
    fn name(&self) -> &str {
        "centroid"
    }

    fn train(&mut self, data: &DataSet) -> FlowResult<()> {
        let total = data.total_weight();
        if data.is_empty() || total <= 0.0 {
            return Err(FlowError::training(
                "centroid learner needs instances with positive weight",
            ));
        }
        let width = data.attribute_count();
        let mut sums = vec![vec![0.0; width]; data.num_classes()];
        let mut mass = vec![0.0; data.num_classes()];
        for inst in data {
            for (acc, value) in sums[inst.label].iter_mut().zip(&inst.values) {
                *acc += inst.weight * value;
            }
            mass[inst.label] += inst.weight;
        }
        self.centroids = sums
            .into_iter()
            .zip(mass)
            .enumerate()
            .map(|(label, (sum, weight))| {
                (weight > 0.0).then(|| {
                    let values = sum.into_iter().map(|v| v / weight).collect();
                    Instance::new(values, label)
                })
            })
            .collect();
        Ok(())
    }

    fn distribution(&self, instance: &Instance) -> FlowResult<Vec<f64>> {
        if self.centroids.is_empty() {
            return Err(FlowError::not_ready("centroid learner has not been trained"));
        }
        let distances: Vec<Option<f64>> = self
            .centroids
            .iter()
            .map(|centroid| {
                centroid
                    .as_ref()
                    .map(|c| self.schema.distance(instance, c))
            })
            .collect();
        let nearest = distances
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let scores: Vec<f64> = distances
            .iter()
            .map(|d| d.map_or(0.0, |d| (nearest - d).exp()))
            .collect();
        let norm: f64 = scores.iter().sum();
        Ok(scores.into_iter().map(|s| s / norm).collect())
    }

    fn boxed_clone(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

/// Learner that ignores attributes and predicts weighted class frequencies.
#[derive(Debug, Clone, Default)]
pub struct PriorClassifier {
    priors: Vec<f64>,
}

impl PriorClassifier {
    /// Untrained learner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for PriorClassifier {
    fn name(&self) -> &str {
        "prior"
    }

    fn train(&mut self, data: &DataSet) -> FlowResult<()> {
        let total = data.total_weight();
        if total <= 0.0 {
            return Err(FlowError::training(
                "prior learner needs instances with positive weight",
            ));
        }
        let mut priors = vec![0.0; data.num_classes()];
        for inst in data {
            priors[inst.label] += inst.weight / total;
        }
        self.priors = priors;
        Ok(())
    }

    fn distribution(&self, _instance: &Instance) -> FlowResult<Vec<f64>> {
        if self.priors.is_empty() {
            return Err(FlowError::not_ready("prior learner has not been trained"));
        }
        Ok(self.priors.clone())
    }

    fn boxed_clone(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}
