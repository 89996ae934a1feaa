use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::dataset::DataSet;

/// Handle of a node inside a [`super::Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in its pipeline.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Side of a node a port sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Supplier side; receives values.
    Input,
    /// Consumer side; hands out values.
    Output,
}

/// Address of one port: the node plus the port index on the relevant side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node.
    pub node: NodeId,
    /// Port index.
    pub index: usize,
}

impl PortRef {
    /// Builds a port address.
    #[must_use]
    pub const fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// One wiring slot of a node.
///
/// `peer` is mutual: an output whose peer is `B:q` means input `q` of `B`
/// has this output as its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Owning node.
    pub node: NodeId,
    /// Index on its side.
    pub index: usize,
    /// Input or output.
    pub direction: Direction,
    /// Connected port on the other node, if wired.
    pub peer: Option<PortRef>,
}

impl Port {
    pub(crate) const fn unwired(node: NodeId, index: usize, direction: Direction) -> Self {
        Self {
            node,
            index,
            direction,
            peer: None,
        }
    }
}

/// Fixed number of inputs and outputs of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arity {
    /// Input port count.
    pub inputs: usize,
    /// Output port count.
    pub outputs: usize,
}

impl Arity {
    /// Builds an arity.
    #[must_use]
    pub const fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }
}

/// Whether a batch is meant for fitting or for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Fit state from the batch.
    Train,
    /// Apply fitted state to the batch.
    Test,
}

/// Typed value travelling between ports.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A data set tagged with the phase it belongs to.
    Batch {
        /// Train or test.
        phase: Phase,
        /// Shared, read-only instances.
        data: Arc<DataSet>,
    },
    /// Predicted class per instance of a test batch.
    Predictions(Vec<usize>),
    /// Acknowledgement that a train batch was consumed.
    Trained {
        /// Number of instances trained on.
        instances: usize,
    },
    /// Scalar result.
    Number(f64),
}

impl Payload {
    /// Wraps a data set as a batch.
    #[must_use]
    pub fn batch(phase: Phase, data: impl Into<Arc<DataSet>>) -> Self {
        Self::Batch {
            phase,
            data: data.into(),
        }
    }

    /// Short variant name for messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "batch",
            Self::Predictions(_) => "predictions",
            Self::Trained { .. } => "trained",
            Self::Number(_) => "number",
        }
    }
}
