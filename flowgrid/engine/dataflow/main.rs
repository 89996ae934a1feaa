//! Pull-based dataflow graph: typed ports, explicit wiring, lifecycle states.

/// Graph arena and evaluation.
pub mod graph;
/// Transform trait and node states.
pub mod node;
/// Port addressing and payload types.
pub mod port;
/// Built-in transforms.
pub mod transforms;

pub use graph::Pipeline;
pub use node::{NodeState, Transform};
pub use port::{Arity, Direction, NodeId, Payload, Phase, Port, PortRef};
pub use transforms::{ClassifierTransform, Normalizer};
