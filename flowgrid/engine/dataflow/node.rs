use serde::{Deserialize, Serialize};

use super::port::{Arity, Direction, NodeId, Payload, Port, PortRef};
use crate::error::FlowResult;

/// Computation hosted by a pipeline node.
pub trait Transform: Send {
    /// Name used in errors and logs.
    fn name(&self) -> &str;
    /// Port counts; must not change over the transform's lifetime.
    fn arity(&self) -> Arity;
    /// One-time setup run by [`super::Pipeline::init`].
    fn init(&mut self) -> FlowResult<()> {
        Ok(())
    }
    /// Produces one value per output from one value per input.
    fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>>;
}

/// Wiring state of a node. Initialization is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// No port has ever been wired.
    Unconfigured,
    /// Part of the graph.
    Wired,
    /// Detached by `isolate`; wiring saved for `clear`.
    Isolated,
}

pub(crate) struct NodeSlot {
    pub(crate) transform: Box<dyn Transform>,
    pub(crate) inputs: Vec<Port>,
    pub(crate) outputs: Vec<Port>,
    pub(crate) injected: Vec<Option<Payload>>,
    pub(crate) cache: Vec<Option<Payload>>,
    pub(crate) saved: Vec<(Direction, usize, PortRef)>,
    pub(crate) state: NodeState,
    pub(crate) initialized: bool,
}

impl NodeSlot {
    pub(crate) fn new(id: NodeId, transform: Box<dyn Transform>) -> Self {
        let arity = transform.arity();
        Self {
            transform,
            inputs: (0..arity.inputs)
                .map(|idx| Port::unwired(id, idx, Direction::Input))
                .collect(),
            outputs: (0..arity.outputs)
                .map(|idx| Port::unwired(id, idx, Direction::Output))
                .collect(),
            injected: vec![None; arity.inputs],
            cache: vec![None; arity.outputs],
            saved: Vec::new(),
            state: NodeState::Unconfigured,
            initialized: false,
        }
    }

    pub(crate) fn ports(&self, direction: Direction) -> &[Port] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    pub(crate) fn ports_mut(&mut self, direction: Direction) -> &mut [Port] {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }

    pub(crate) fn has_wiring(&self) -> bool {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .any(|port| port.peer.is_some())
    }

    pub(crate) fn name(&self) -> &str {
        self.transform.name()
    }
}
