use std::cmp::Ordering;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// One labelled, weighted example.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    /// Attribute values in schema order.
    pub values: Vec<f64>,
    /// Class index in `0..num_classes`.
    pub label: usize,
    /// Non-negative weight.
    pub weight: f64,
}

impl Instance {
    /// Creates an instance with unit weight.
    #[must_use]
    pub fn new(values: Vec<f64>, label: usize) -> Self {
        Self {
            values,
            label,
            weight: 1.0,
        }
    }

    /// Replaces the weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Ordered collection of instances sharing a class count and attribute width.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSet {
    num_classes: usize,
    instances: Vec<Instance>,
}

impl DataSet {
    /// Creates an empty data set.
    #[must_use]
    pub const fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            instances: Vec::new(),
        }
    }

    /// Builds a data set, validating every instance.
    pub fn from_instances(num_classes: usize, instances: Vec<Instance>) -> FlowResult<Self> {
        let mut dataset = Self::new(num_classes);
        dataset.instances.reserve(instances.len());
        for instance in instances {
            dataset.push(instance)?;
        }
        Ok(dataset)
    }

    /// Generates a deterministic blob per class, centred at `2 * class` on every axis.
    #[must_use]
    pub fn synthetic(count: usize, num_classes: usize, dims: usize, seed: u64) -> Self {
        let num_classes = num_classes.max(1);
        let mut rng = SmallRng::seed_from_u64(seed);
        let instances = (0..count)
            .map(|idx| {
                let label = idx % num_classes;
                let centre = 2.0 * label as f64;
                let values = (0..dims)
                    .map(|_| centre + rng.gen_range(-1.0..1.0))
                    .collect();
                Instance::new(values, label)
            })
            .collect();
        Self {
            num_classes,
            instances,
        }
    }

    /// Appends an instance after checking label, weight and width.
    pub fn push(&mut self, instance: Instance) -> FlowResult<()> {
        if instance.label >= self.num_classes {
            return Err(FlowError::config(format!(
                "label {} outside 0..{}",
                instance.label, self.num_classes
            )));
        }
        if !instance.weight.is_finite() || instance.weight < 0.0 {
            return Err(FlowError::config(format!(
                "instance weight must be finite and >= 0, got {}",
                instance.weight
            )));
        }
        if let Some(first) = self.instances.first() {
            if first.values.len() != instance.values.len() {
                return Err(FlowError::config(format!(
                    "instance has {} attributes, data set has {}",
                    instance.values.len(),
                    first.values.len()
                )));
            }
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Number of classes labels may refer to.
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the set holds no instance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Attribute width (0 when empty).
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.instances.first().map_or(0, |inst| inst.values.len())
    }

    /// Read-only view of the instances.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Mutable view; callers must keep weights finite and non-negative.
    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    /// Iterates the instances in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Instance> {
        self.instances.iter()
    }

    /// Sum of instance weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.instances.iter().map(|inst| inst.weight).sum()
    }

    /// Instance count per class.
    #[must_use]
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];
        for inst in &self.instances {
            counts[inst.label] += 1;
        }
        counts
    }

    /// Positions of each class's instances, in data set order.
    #[must_use]
    pub fn indices_by_class(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.num_classes];
        for (idx, inst) in self.instances.iter().enumerate() {
            groups[inst.label].push(idx);
        }
        groups
    }

    /// Copies the instances at `indices`, in the given order.
    ///
    /// Indices past the end are skipped.
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            num_classes: self.num_classes,
            instances: indices
                .iter()
                .filter_map(|&idx| self.instances.get(idx).cloned())
                .collect(),
        }
    }

    /// Appends copies of another set's instances.
    pub fn extend_from(&mut self, other: &Self) -> FlowResult<()> {
        for inst in other.iter() {
            self.push(inst.clone())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a DataSet {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

/// Type of a single attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttributeKind {
    /// Real valued.
    Numeric,
    /// Category encoded as an integral value.
    Nominal,
}

/// Attribute typing and metrics consumed by learners.
///
/// The pipeline and validator never look inside; only classifiers do.
pub trait AttributeModel: Send + Sync {
    /// Number of attributes per instance.
    fn attribute_count(&self) -> usize;
    /// Whether the attribute takes part in distance computations.
    fn is_active(&self, index: usize) -> bool;
    /// Attribute type.
    fn kind(&self, index: usize) -> AttributeKind;
    /// Dissimilarity between two instances.
    fn distance(&self, a: &Instance, b: &Instance) -> f64;
    /// Ordering of two instances along one attribute.
    fn order(&self, index: usize, a: &Instance, b: &Instance) -> Ordering;
}

/// All-numeric schema with euclidean distance over active attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericSchema {
    active: Vec<bool>,
}

impl NumericSchema {
    /// Schema with `count` active attributes.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            active: vec![true; count],
        }
    }

    /// Excludes one attribute from distance computations.
    #[must_use]
    pub fn deactivate(mut self, index: usize) -> Self {
        if let Some(flag) = self.active.get_mut(index) {
            *flag = false;
        }
        self
    }
}

impl AttributeModel for NumericSchema {
    fn attribute_count(&self) -> usize {
        self.active.len()
    }

    fn is_active(&self, index: usize) -> bool {
        self.active.get(index).copied().unwrap_or(false)
    }

    fn kind(&self, _index: usize) -> AttributeKind {
        AttributeKind::Numeric
    }

    fn distance(&self, a: &Instance, b: &Instance) -> f64 {
        a.values
            .iter()
            .zip(&b.values)
            .enumerate()
            .filter(|(idx, _)| self.is_active(*idx))
            .map(|(_, (x, y))| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn order(&self, index: usize, a: &Instance, b: &Instance) -> Ordering {
        match (a.values.get(index), b.values.get(index)) {
            (Some(x), Some(y)) => x.total_cmp(y),
            _ => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn push_rejects_bad_instances() {
        let mut data = DataSet::new(2);
        data.push(Instance::new(vec![1.0, 2.0], 1)).unwrap();
        let label = data.push(Instance::new(vec![1.0, 2.0], 2)).unwrap_err();
        assert_eq!(label.kind(), ErrorKind::Config);
        let width = data.push(Instance::new(vec![1.0], 0)).unwrap_err();
        assert_eq!(width.kind(), ErrorKind::Config);
        let weight = data
            .push(Instance::new(vec![0.0, 0.0], 0).with_weight(-1.0))
            .unwrap_err();
        assert_eq!(weight.kind(), ErrorKind::Config);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn synthetic_is_deterministic_and_balanced() {
        let a = DataSet::synthetic(30, 3, 2, 7);
        let b = DataSet::synthetic(30, 3, 2, 7);
        assert_eq!(a, b);
        assert_eq!(a.class_counts(), vec![10, 10, 10]);
        assert_eq!(a.attribute_count(), 2);
        assert!((a.total_weight() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn subset_and_grouping() {
        let data = DataSet::synthetic(6, 2, 1, 1);
        let groups = data.indices_by_class();
        assert_eq!(groups[0], vec![0, 2, 4]);
        let odd = data.subset(&groups[1]);
        assert!(odd.iter().all(|inst| inst.label == 1));
        assert_eq!(data.subset(&[0, 99]).len(), 1);
    }

    #[test]
    fn schema_distance_skips_inactive_attributes() {
        let schema = NumericSchema::new(2).deactivate(1);
        let a = Instance::new(vec![0.0, 100.0], 0);
        let b = Instance::new(vec![3.0, -100.0], 0);
        assert!((schema.distance(&a, &b) - 3.0).abs() < 1e-12);
        assert_eq!(schema.order(0, &a, &b), Ordering::Less);
        assert!(!schema.is_active(5));
    }
}
