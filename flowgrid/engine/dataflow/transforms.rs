use std::sync::Arc;

use super::{
    node::Transform,
    port::{Arity, Payload, Phase},
};
use crate::{
    classifier::{predict, Classifier},
    dataset::DataSet,
    error::{FlowError, FlowResult},
};

fn expect_batch<'a>(name: &str, payload: &'a Payload) -> FlowResult<(Phase, &'a Arc<DataSet>)> {
    match payload {
        Payload::Batch { phase, data } => Ok((*phase, data)),
        other => Err(FlowError::config(format!(
            "{name} expects a batch, got {}",
            other.kind_name()
        ))),
    }
}

/// Hosts a learner: trains on `Train` batches, predicts on `Test` batches.
#[derive(Debug)]
pub struct ClassifierTransform {
    classifier: Box<dyn Classifier>,
    trained: bool,
}

impl ClassifierTransform {
    /// Wraps an untrained learner.
    #[must_use]
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self {
            classifier,
            trained: false,
        }
    }
}

impl Transform for ClassifierTransform {
    fn name(&self) -> &str {
        self.classifier.name()
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
        let (phase, data) = expect_batch(self.classifier.name(), &inputs[0])?;
        match phase {
            Phase::Train => {
                let mut candidate = self.classifier.boxed_clone();
                candidate.train(data)?;
                self.classifier = candidate;
                self.trained = true;
                Ok(vec![Payload::Trained {
                    instances: data.len(),
                }])
            }
            Phase::Test => {
                if !self.trained {
                    return Err(FlowError::not_ready(format!(
                        "{} received a test batch before training",
                        self.classifier.name()
                    )));
                }
                let predictions = data
                    .iter()
                    .map(|inst| predict(self.classifier.as_ref(), inst).map(|(label, _)| label))
                    .collect::<FlowResult<Vec<_>>>()?;
                Ok(vec![Payload::Predictions(predictions)])
            }
        }
    }
}

/// Min-max scaler fitted on `Train` batches and applied to both phases.
///
/// Attributes that are constant in the train batch map to 0.
#[derive(Debug, Default)]
pub struct Normalizer {
    ranges: Option<Vec<(f64, f64)>>,
}

impl Normalizer {
    /// Unfitted scaler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fit(data: &DataSet) -> Vec<(f64, f64)> {
        let mut ranges = vec![(f64::INFINITY, f64::NEG_INFINITY); data.attribute_count()];
        for inst in data {
            for ((lo, hi), value) in ranges.iter_mut().zip(&inst.values) {
                *lo = lo.min(*value);
                *hi = hi.max(*value);
            }
        }
        ranges
    }

    fn apply(ranges: &[(f64, f64)], data: &DataSet) -> FlowResult<DataSet> {
        if data.attribute_count() != ranges.len() && !data.is_empty() {
            return Err(FlowError::config(format!(
                "normalizer fitted on {} attributes, batch has {}",
                ranges.len(),
                data.attribute_count()
            )));
        }
        let mut scaled = data.clone();
        for inst in scaled.instances_mut() {
            for (value, (lo, hi)) in inst.values.iter_mut().zip(ranges) {
                let span = hi - lo;
                *value = if span > 0.0 { (*value - lo) / span } else { 0.0 };
            }
        }
        Ok(scaled)
    }
}

impl Transform for Normalizer {
    fn name(&self) -> &str {
        "normalizer"
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
        let (phase, data) = expect_batch("normalizer", &inputs[0])?;
        if phase == Phase::Train {
            self.ranges = Some(Self::fit(data));
        }
        let ranges = self.ranges.as_deref().ok_or_else(|| {
            FlowError::not_ready("normalizer received a test batch before fitting")
        })?;
        let scaled = Self::apply(ranges, data)?;
        Ok(vec![Payload::batch(phase, scaled)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::PriorClassifier,
        dataflow::Pipeline,
        dataset::Instance,
        error::ErrorKind,
    };

    fn tiny() -> DataSet {
        DataSet::from_instances(
            2,
            vec![
                Instance::new(vec![0.0, 5.0], 0),
                Instance::new(vec![10.0, 5.0], 1),
                Instance::new(vec![5.0, 5.0], 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn normalizer_scales_with_train_ranges() {
        let mut pipeline = Pipeline::new();
        let scale = pipeline.add_node(Normalizer::new());
        pipeline.init_all().unwrap();
        let err = {
            pipeline
                .set_supplier_data(scale, 0, Payload::batch(Phase::Test, tiny()))
                .unwrap();
            pipeline.get_consumer_data(scale, 0).unwrap_err()
        };
        assert_eq!(err.kind(), ErrorKind::NotReady);

        pipeline
            .set_supplier_data(scale, 0, Payload::batch(Phase::Train, tiny()))
            .unwrap();
        let Payload::Batch { data, .. } = pipeline.get_consumer_data(scale, 0).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(data.instances()[1].values, vec![1.0, 0.0]);
        assert_eq!(data.instances()[2].values, vec![0.5, 0.0]);
    }

    #[test]
    fn classifier_node_trains_then_predicts() {
        let mut pipeline = Pipeline::new();
        let learner = pipeline.add_node(ClassifierTransform::new(Box::new(PriorClassifier::new())));
        pipeline.init_all().unwrap();
        pipeline
            .set_supplier_data(learner, 0, Payload::batch(Phase::Train, tiny()))
            .unwrap();
        assert_eq!(
            pipeline.get_consumer_data(learner, 0).unwrap(),
            Payload::Trained { instances: 3 }
        );
        pipeline
            .set_supplier_data(learner, 0, Payload::batch(Phase::Test, tiny()))
            .unwrap();
        assert_eq!(
            pipeline.get_consumer_data(learner, 0).unwrap(),
            Payload::Predictions(vec![1, 1, 1])
        );
    }

    #[test]
    fn classifier_node_rejects_non_batches() {
        let mut node = ClassifierTransform::new(Box::new(PriorClassifier::new()));
        let err = node.compute(&[Payload::Number(1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = node
            .compute(&[Payload::batch(Phase::Test, tiny())])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }
}
