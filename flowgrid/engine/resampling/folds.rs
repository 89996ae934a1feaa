use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use super::strategy::SplitStrategy;
use crate::{
    dataset::DataSet,
    error::{FlowError, FlowResult},
};

/// One train/test partition, stored as sorted positions into the source data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Position of the fold in its run.
    pub index: usize,
    /// Training positions.
    pub train: Vec<usize>,
    /// Test positions.
    pub test: Vec<usize>,
}

impl Fold {
    /// Copies out the (train, test) instance sets.
    #[must_use]
    pub fn materialize(&self, data: &DataSet) -> (DataSet, DataSet) {
        (data.subset(&self.train), data.subset(&self.test))
    }
}

/// Builds the folds a strategy prescribes.
pub fn build_folds(data: &DataSet, strategy: SplitStrategy, seed: u64) -> FlowResult<Vec<Fold>> {
    match strategy {
        SplitStrategy::CrossValidation { folds } => stratified_folds(data, folds, seed),
        SplitStrategy::FixedRatio { train_fraction } => {
            fixed_ratio_split(data, train_fraction, seed).map(|fold| vec![fold])
        }
    }
}

/// Class groups with each group shuffled by one RNG, walked in class order.
fn shuffled_groups(data: &DataSet, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut groups = data.indices_by_class();
    for group in &mut groups {
        group.shuffle(&mut rng);
    }
    groups
}

/// Stratified k-fold partitioning.
///
/// Classes are laid end to end and dealt round-robin, so every class
/// contributes `floor(n_c / k)` or `ceil(n_c / k)` instances to each fold.
pub fn stratified_folds(data: &DataSet, folds: usize, seed: u64) -> FlowResult<Vec<Fold>> {
    if folds < 2 {
        return Err(FlowError::config(format!(
            "cross-validation needs at least 2 folds, got {folds}"
        )));
    }
    if data.is_empty() {
        return Err(FlowError::insufficient_data("cannot partition an empty data set"));
    }
    for (class, count) in data.class_counts().into_iter().enumerate() {
        if count > 0 && count < folds {
            return Err(FlowError::insufficient_data(format!(
                "class {class} has {count} instances, fewer than {folds} folds"
            )));
        }
    }

    let mut fold_of = vec![0; data.len()];
    let dealt = shuffled_groups(data, seed).into_iter().flatten();
    for (position, idx) in dealt.enumerate() {
        fold_of[idx] = position % folds;
    }
    Ok((0..folds)
        .map(|index| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..data.len()).partition(|&idx| fold_of[idx] == index);
            Fold { index, train, test }
        })
        .collect())
}

/// Single stratified split keeping `round(train_fraction * n_c)` of each class for training.
pub fn fixed_ratio_split(data: &DataSet, train_fraction: f64, seed: u64) -> FlowResult<Fold> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(FlowError::config(format!(
            "train fraction must lie in (0, 1), got {train_fraction}"
        )));
    }
    let mut train = Vec::new();
    let mut test = Vec::new();
    for group in shuffled_groups(data, seed) {
        let cut = ((group.len() as f64) * train_fraction).round() as usize;
        let (head, tail) = group.split_at(cut.min(group.len()));
        train.extend_from_slice(head);
        test.extend_from_slice(tail);
    }
    if train.is_empty() || test.is_empty() {
        return Err(FlowError::insufficient_data(format!(
            "fixed ratio {train_fraction} leaves {} train and {} test instances",
            train.len(),
            test.len()
        )));
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok(Fold {
        index: 0,
        train,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::Instance, error::ErrorKind};

    fn uneven() -> DataSet {
        // 17 of class 0, 9 of class 1, 5 of class 2.
        let instances = (0..31)
            .map(|i| {
                let label = if i < 17 {
                    0
                } else if i < 26 {
                    1
                } else {
                    2
                };
                Instance::new(vec![f64::from(i)], label)
            })
            .collect();
        DataSet::from_instances(3, instances).unwrap()
    }

    fn class_count(data: &DataSet, positions: &[usize], class: usize) -> usize {
        positions
            .iter()
            .filter(|&&idx| data.instances()[idx].label == class)
            .count()
    }

    #[test]
    fn folds_partition_the_data_set() {
        let data = uneven();
        let folds = stratified_folds(&data, 5, 1).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0usize; data.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), data.len());
            for &idx in &fold.test {
                seen[idx] += 1;
                assert!(!fold.train.contains(&idx));
            }
        }
        assert!(seen.iter().all(|&hits| hits == 1));
    }

    #[test]
    fn folds_are_stratified_within_one() {
        let data = uneven();
        let folds = stratified_folds(&data, 5, 9).unwrap();
        for class in 0..3 {
            let counts: Vec<usize> = folds
                .iter()
                .map(|fold| class_count(&data, &fold.test, class))
                .collect();
            let max = counts.iter().max().unwrap();
            let min = counts.iter().min().unwrap();
            assert!(max - min <= 1, "class {class}: {counts:?}");
        }
    }

    #[test]
    fn same_seed_same_folds() {
        let data = uneven();
        assert_eq!(
            stratified_folds(&data, 4, 3).unwrap(),
            stratified_folds(&data, 4, 3).unwrap()
        );
    }

    #[test]
    fn too_few_instances_per_class() {
        let data = uneven();
        let err = stratified_folds(&data, 6, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        let err = stratified_folds(&DataSet::new(2), 2, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn absent_classes_do_not_block_partitioning() {
        let data = DataSet::synthetic(10, 2, 1, 4);
        let widened = DataSet::from_instances(3, data.instances().to_vec()).unwrap();
        assert_eq!(stratified_folds(&widened, 5, 1).unwrap().len(), 5);
    }

    #[test]
    fn fixed_ratio_keeps_class_proportions() {
        let data = uneven();
        let fold = fixed_ratio_split(&data, 0.6, 1).unwrap();
        assert_eq!(class_count(&data, &fold.train, 0), 10);
        assert_eq!(class_count(&data, &fold.train, 1), 5);
        assert_eq!(class_count(&data, &fold.train, 2), 3);
        assert_eq!(fold.train.len() + fold.test.len(), data.len());
        let (train, test) = fold.materialize(&data);
        assert_eq!(train.len(), 18);
        assert_eq!(test.len(), 13);
    }

    #[test]
    fn fixed_ratio_needs_both_sides() {
        let data = DataSet::from_instances(1, vec![Instance::new(vec![0.0], 0)]).unwrap();
        let err = fixed_ratio_split(&data, 0.5, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }
}
