//! Toroidal ensemble grid: classifier nodes, neighbor topologies, exchange rounds.

/// Grid construction, wraparound addressing and rounds.
pub mod grid;
/// Classifier cells with guarded retraining.
pub mod node;
/// Neighbor offset shapes.
pub mod topology;

pub use grid::{CellId, Grid, RoundReport, TemplateLayout};
pub use node::{reweight_with, ClassifierNode, TrainOutcome};
pub use topology::{NeighborTopology, TopologyKind, MAX_CUSTOM_OFFSET};
