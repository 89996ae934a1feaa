use std::collections::HashSet;

use serde_json::json;
use shared_logging::LogLevel;

use super::{
    node::{NodeSlot, NodeState, Transform},
    port::{Arity, Direction, NodeId, Payload, Port, PortRef},
};
use crate::{
    error::{FlowError, FlowResult},
    telemetry::{self, EngineTelemetry},
};

/// Arena of transformation nodes connected port to port.
///
/// Evaluation is pull-based: [`Pipeline::get_consumer_data`] computes a node
/// only when one of its outputs is requested and not cached, pulling inputs
/// from wired producers or from values injected with
/// [`Pipeline::set_supplier_data`].
#[derive(Default)]
pub struct Pipeline {
    nodes: Vec<NodeSlot>,
    telemetry: Option<EngineTelemetry>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(NodeSlot::name).collect();
        f.debug_struct("Pipeline").field("nodes", &names).finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches telemetry for compute logs.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Adds a node; its arity is fixed from here on.
    pub fn add_node(&mut self, transform: impl Transform + 'static) -> NodeId {
        self.add_boxed(Box::new(transform))
    }

    /// Adds an already boxed node.
    pub fn add_boxed(&mut self, transform: Box<dyn Transform>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeSlot::new(id, transform));
        id
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pipeline has no node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wiring state of a node.
    pub fn state(&self, node: NodeId) -> FlowResult<NodeState> {
        Ok(self.slot(node)?.state)
    }

    /// Whether `init` has run for a node.
    pub fn is_initialized(&self, node: NodeId) -> FlowResult<bool> {
        Ok(self.slot(node)?.initialized)
    }

    /// Declared port counts of a node.
    pub fn arity(&self, node: NodeId) -> FlowResult<Arity> {
        let slot = self.slot(node)?;
        Ok(Arity::new(slot.inputs.len(), slot.outputs.len()))
    }

    /// Current state of one port.
    pub fn port(&self, node: NodeId, direction: Direction, index: usize) -> FlowResult<Port> {
        let slot = self.slot(node)?;
        slot.ports(direction).get(index).copied().ok_or_else(|| {
            FlowError::wiring(format!(
                "{} ({node}) has no {direction:?} port {index}",
                slot.name()
            ))
        })
    }

    /// Wires input `input` of `node` to output `output` of `producer`.
    pub fn register_supplier(
        &mut self,
        node: NodeId,
        input: usize,
        producer: NodeId,
        output: usize,
    ) -> FlowResult<()> {
        self.connect(PortRef::new(producer, output), PortRef::new(node, input))
    }

    /// Wires output `output` of `node` to input `input` of `consumer`.
    pub fn register_consumer(
        &mut self,
        node: NodeId,
        output: usize,
        consumer: NodeId,
        input: usize,
    ) -> FlowResult<()> {
        self.connect(PortRef::new(node, output), PortRef::new(consumer, input))
    }

    fn connect(&mut self, from: PortRef, to: PortRef) -> FlowResult<()> {
        let source = self.port(from.node, Direction::Output, from.index)?;
        let target = self.port(to.node, Direction::Input, to.index)?;
        for id in [from.node, to.node] {
            if self.slot(id)?.state == NodeState::Isolated {
                return Err(FlowError::wiring(format!(
                    "{id} is isolated; call clear before wiring it"
                )));
            }
        }
        if let Some(peer) = source.peer {
            return Err(FlowError::wiring(format!(
                "output {from} is already wired to {peer}"
            )));
        }
        if let Some(peer) = target.peer {
            return Err(FlowError::wiring(format!(
                "input {to} is already wired to {peer}"
            )));
        }
        self.nodes[from.node.0].outputs[from.index].peer = Some(to);
        self.nodes[to.node.0].inputs[to.index].peer = Some(from);
        for id in [from.node, to.node] {
            self.nodes[id.0].state = NodeState::Wired;
        }
        self.invalidate_from(to.node);
        Ok(())
    }

    /// Detaches every wired port of `node`, remembering the wiring for [`Pipeline::clear`].
    ///
    /// Arity, configuration and the init flag are kept. Isolating an isolated
    /// node is a no-op.
    pub fn isolate(&mut self, node: NodeId) -> FlowResult<()> {
        if self.slot(node)?.state == NodeState::Isolated {
            return Ok(());
        }
        self.invalidate_from(node);
        let mut saved = Vec::new();
        for direction in [Direction::Input, Direction::Output] {
            for port in self.nodes[node.0].ports_mut(direction) {
                if let Some(peer) = port.peer.take() {
                    saved.push((direction, port.index, peer));
                }
            }
        }
        for (direction, _, peer) in &saved {
            let opposite = opposite(*direction);
            self.nodes[peer.node.0].ports_mut(opposite)[peer.index].peer = None;
        }
        let peers: Vec<NodeId> = saved.iter().map(|(_, _, peer)| peer.node).collect();
        let slot = &mut self.nodes[node.0];
        slot.saved = saved;
        slot.state = NodeState::Isolated;
        for id in peers {
            self.settle_state(id);
        }
        Ok(())
    }

    /// Injects a value into an input port.
    ///
    /// The value takes precedence over a wired producer until the node is
    /// cleared. Caches of the node and everything downstream are dropped.
    pub fn set_supplier_data(&mut self, node: NodeId, input: usize, value: Payload) -> FlowResult<()> {
        self.port(node, Direction::Input, input)?;
        self.nodes[node.0].injected[input] = Some(value);
        self.invalidate_from(node);
        Ok(())
    }

    /// Restores wiring removed by [`Pipeline::isolate`] and drops cached and injected values.
    ///
    /// Fails with a wiring error, leaving the node isolated, when a saved peer
    /// port has been wired elsewhere or its node is isolated.
    pub fn clear(&mut self, node: NodeId) -> FlowResult<()> {
        self.slot(node)?;
        if self.nodes[node.0].state == NodeState::Isolated {
            let saved = self.nodes[node.0].saved.clone();
            for (direction, _, peer) in &saved {
                let peer_slot = &self.nodes[peer.node.0];
                let taken = peer_slot.ports(opposite(*direction))[peer.index].peer;
                if peer.node != node && peer_slot.state == NodeState::Isolated {
                    return Err(FlowError::wiring(format!(
                        "cannot restore wiring to isolated {}",
                        peer.node
                    )));
                }
                if taken.is_some() && peer.node != node {
                    return Err(FlowError::wiring(format!(
                        "cannot restore wiring: {peer} was wired elsewhere"
                    )));
                }
            }
            for (direction, index, peer) in &saved {
                let own = PortRef::new(node, *index);
                self.nodes[node.0].ports_mut(*direction)[*index].peer = Some(*peer);
                self.nodes[peer.node.0].ports_mut(opposite(*direction))[peer.index].peer = Some(own);
            }
            let peers: Vec<NodeId> = saved.iter().map(|(_, _, peer)| peer.node).collect();
            let slot = &mut self.nodes[node.0];
            slot.saved.clear();
            slot.state = NodeState::Unconfigured;
            for id in peers.into_iter().chain([node]) {
                self.settle_state(id);
            }
        }
        self.nodes[node.0].injected.iter_mut().for_each(|v| *v = None);
        self.invalidate_from(node);
        Ok(())
    }

    /// Runs the node's one-time setup. Later calls are no-ops.
    pub fn init(&mut self, node: NodeId) -> FlowResult<()> {
        let slot = self.slot_mut(node)?;
        if !slot.initialized {
            slot.transform.init()?;
            slot.initialized = true;
        }
        Ok(())
    }

    /// Initializes every node.
    pub fn init_all(&mut self) -> FlowResult<()> {
        (0..self.nodes.len()).try_for_each(|idx| self.init(NodeId(idx)))
    }

    /// Returns output `output` of `node`, computing it and its inputs on demand.
    pub fn get_consumer_data(&mut self, node: NodeId, output: usize) -> FlowResult<Payload> {
        let mut chain = Vec::new();
        self.pull(node, output, &mut chain)
    }

    fn pull(&mut self, node: NodeId, output: usize, chain: &mut Vec<NodeId>) -> FlowResult<Payload> {
        self.port(node, Direction::Output, output)?;
        let slot = &self.nodes[node.0];
        if !slot.initialized {
            return Err(FlowError::not_ready(format!(
                "{} ({node}) pulled before init",
                slot.name()
            )));
        }
        if let Some(cached) = &slot.cache[output] {
            return Ok(cached.clone());
        }
        if chain.contains(&node) {
            let path: Vec<String> = chain.iter().map(ToString::to_string).collect();
            return Err(FlowError::cycle(format!(
                "pull re-entered {node} via {}",
                path.join(" -> ")
            )));
        }
        chain.push(node);

        let input_count = slot.inputs.len();
        let mut inputs = Vec::with_capacity(input_count);
        for index in 0..input_count {
            let slot = &self.nodes[node.0];
            let injected = slot.injected[index].clone();
            let peer = slot.inputs[index].peer;
            let value = match (injected, peer) {
                (Some(value), _) => value,
                (None, Some(peer)) => self.pull(peer.node, peer.index, chain)?,
                (None, None) => {
                    return Err(FlowError::not_ready(format!(
                        "input {index} of {} ({node}) has neither a producer nor a value",
                        slot.name()
                    )))
                }
            };
            inputs.push(value);
        }

        let slot = &mut self.nodes[node.0];
        let outputs = slot.transform.compute(&inputs)?;
        if outputs.len() != slot.outputs.len() {
            return Err(FlowError::wiring(format!(
                "{} produced {} outputs but declares {}",
                slot.name(),
                outputs.len(),
                slot.outputs.len()
            )));
        }
        let value = outputs[output].clone();
        let kinds: Vec<&str> = outputs.iter().map(Payload::kind_name).collect();
        slot.cache = outputs.into_iter().map(Some).collect();
        chain.pop();
        telemetry::log(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "pipeline.node_computed",
            json!({ "node": node.index(), "name": self.nodes[node.0].name(), "outputs": kinds }),
        );
        Ok(value)
    }

    /// Drops cached outputs of `start` and every node reachable downstream.
    fn invalidate_from(&mut self, start: NodeId) {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let slot = &mut self.nodes[id.0];
            slot.cache.iter_mut().for_each(|v| *v = None);
            stack.extend(slot.outputs.iter().filter_map(|port| port.peer.map(|p| p.node)));
        }
    }

    fn slot(&self, node: NodeId) -> FlowResult<&NodeSlot> {
        self.nodes
            .get(node.0)
            .ok_or_else(|| FlowError::wiring(format!("unknown {node}")))
    }

    /// Derives `Wired` or `Unconfigured` from the ports of a node that is not isolated.
    fn settle_state(&mut self, id: NodeId) {
        let slot = &mut self.nodes[id.0];
        if slot.state != NodeState::Isolated {
            slot.state = if slot.has_wiring() {
                NodeState::Wired
            } else {
                NodeState::Unconfigured
            };
        }
    }

    fn slot_mut(&mut self, node: NodeId) -> FlowResult<&mut NodeSlot> {
        self.nodes
            .get_mut(node.0)
            .ok_or_else(|| FlowError::wiring(format!("unknown {node}")))
    }
}

const fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Input => Direction::Output,
        Direction::Output => Direction::Input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Adds a constant to a number; 1 input, 1 output.
    struct AddConst(f64);

    impl Transform for AddConst {
        fn name(&self) -> &str {
            "add_const"
        }
        fn arity(&self) -> Arity {
            Arity::new(1, 1)
        }
        fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
            match inputs[0] {
                Payload::Number(x) => Ok(vec![Payload::Number(x + self.0)]),
                ref other => Err(FlowError::config(format!("unexpected {}", other.kind_name()))),
            }
        }
    }

    /// Emits a fixed number; counts how often it ran.
    struct Source {
        value: f64,
        runs: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Transform for Source {
        fn name(&self) -> &str {
            "source"
        }
        fn arity(&self) -> Arity {
            Arity::new(0, 1)
        }
        fn compute(&mut self, _inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![Payload::Number(self.value)])
        }
    }

    /// Sums two numbers.
    struct Sum;

    impl Transform for Sum {
        fn name(&self) -> &str {
            "sum"
        }
        fn arity(&self) -> Arity {
            Arity::new(2, 1)
        }
        fn compute(&mut self, inputs: &[Payload]) -> FlowResult<Vec<Payload>> {
            let total = inputs
                .iter()
                .map(|p| match p {
                    Payload::Number(x) => *x,
                    _ => 0.0,
                })
                .sum();
            Ok(vec![Payload::Number(total)])
        }
    }

    fn counter() -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0))
    }

    fn chain() -> (Pipeline, NodeId, NodeId) {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_node(Source {
            value: 1.0,
            runs: counter(),
        });
        let add = pipeline.add_node(AddConst(10.0));
        pipeline.register_supplier(add, 0, source, 0).unwrap();
        pipeline.init_all().unwrap();
        (pipeline, source, add)
    }

    #[test]
    fn wiring_is_symmetric_and_updates_state() {
        let (pipeline, source, add) = chain();
        let out = pipeline.port(source, Direction::Output, 0).unwrap();
        let inp = pipeline.port(add, Direction::Input, 0).unwrap();
        assert_eq!(out.peer, Some(PortRef::new(add, 0)));
        assert_eq!(inp.peer, Some(PortRef::new(source, 0)));
        assert_eq!(pipeline.state(add).unwrap(), NodeState::Wired);
    }

    #[test]
    fn wiring_rejects_bad_indices_and_double_wiring() {
        let (mut pipeline, source, add) = chain();
        let other = pipeline.add_node(AddConst(0.0));
        assert_eq!(pipeline.state(other).unwrap(), NodeState::Unconfigured);
        let err = pipeline.register_supplier(add, 1, source, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        let err = pipeline.register_consumer(source, 0, other, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        let err = pipeline.register_supplier(add, 0, other, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        let err = pipeline
            .register_supplier(NodeId(42), 0, source, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        assert_eq!(pipeline.state(other).unwrap(), NodeState::Unconfigured);
    }

    #[test]
    fn pull_computes_and_caches() {
        let runs = counter();
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_node(Source {
            value: 2.0,
            runs: runs.clone(),
        });
        let add = pipeline.add_node(AddConst(3.0));
        pipeline.register_consumer(source, 0, add, 0).unwrap();
        pipeline.init_all().unwrap();
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(5.0));
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(5.0));
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn pull_before_init_is_not_ready() {
        let mut pipeline = Pipeline::new();
        let add = pipeline.add_node(AddConst(1.0));
        pipeline.set_supplier_data(add, 0, Payload::Number(1.0)).unwrap();
        let err = pipeline.get_consumer_data(add, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
        pipeline.init(add).unwrap();
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(2.0));
    }

    #[test]
    fn missing_input_is_not_ready() {
        let mut pipeline = Pipeline::new();
        let sum = pipeline.add_node(Sum);
        pipeline.init_all().unwrap();
        pipeline.set_supplier_data(sum, 0, Payload::Number(1.0)).unwrap();
        let err = pipeline.get_consumer_data(sum, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn cycles_are_detected_at_pull_time() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add_node(AddConst(1.0));
        let b = pipeline.add_node(AddConst(1.0));
        pipeline.register_supplier(b, 0, a, 0).unwrap();
        pipeline.register_supplier(a, 0, b, 0).unwrap();
        pipeline.init_all().unwrap();
        let err = pipeline.get_consumer_data(b, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
    }

    #[test]
    fn isolated_node_is_a_pure_function() {
        let (mut pipeline, source, add) = chain();
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(11.0));
        pipeline.isolate(add).unwrap();
        assert_eq!(pipeline.state(add).unwrap(), NodeState::Isolated);
        assert_eq!(pipeline.port(source, Direction::Output, 0).unwrap().peer, None);
        pipeline.set_supplier_data(add, 0, Payload::Number(5.0)).unwrap();
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(15.0));

        let mut standalone = Pipeline::new();
        let lone = standalone.add_node(AddConst(10.0));
        standalone.init_all().unwrap();
        standalone.isolate(lone).unwrap();
        standalone.set_supplier_data(lone, 0, Payload::Number(5.0)).unwrap();
        assert_eq!(
            standalone.get_consumer_data(lone, 0).unwrap(),
            Payload::Number(15.0)
        );
    }

    #[test]
    fn clear_restores_wiring() {
        let (mut pipeline, source, add) = chain();
        pipeline.isolate(add).unwrap();
        let err = pipeline.register_supplier(add, 0, source, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        pipeline.set_supplier_data(add, 0, Payload::Number(0.0)).unwrap();
        pipeline.clear(add).unwrap();
        assert_eq!(pipeline.state(add).unwrap(), NodeState::Wired);
        assert_eq!(
            pipeline.port(source, Direction::Output, 0).unwrap().peer,
            Some(PortRef::new(add, 0))
        );
        assert_eq!(pipeline.get_consumer_data(add, 0).unwrap(), Payload::Number(11.0));
    }

    #[test]
    fn isolation_updates_peer_states() {
        let (mut pipeline, source, add) = chain();
        let tail = pipeline.add_node(AddConst(1.0));
        pipeline.register_supplier(tail, 0, add, 0).unwrap();
        pipeline.init(tail).unwrap();
        pipeline.isolate(add).unwrap();
        assert_eq!(pipeline.state(source).unwrap(), NodeState::Unconfigured);
        assert_eq!(pipeline.state(tail).unwrap(), NodeState::Unconfigured);

        pipeline.clear(add).unwrap();
        for id in [source, add, tail] {
            assert_eq!(pipeline.state(id).unwrap(), NodeState::Wired);
        }
        assert_eq!(pipeline.get_consumer_data(tail, 0).unwrap(), Payload::Number(12.0));
    }

    #[test]
    fn clear_fails_when_peer_was_rewired() {
        let (mut pipeline, source, add) = chain();
        pipeline.isolate(add).unwrap();
        let thief = pipeline.add_node(AddConst(0.0));
        pipeline.register_supplier(thief, 0, source, 0).unwrap();
        let err = pipeline.clear(add).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
        assert_eq!(pipeline.state(add).unwrap(), NodeState::Isolated);
    }

    #[test]
    fn injection_invalidates_downstream_caches() {
        let mut pipeline = Pipeline::new();
        let first = pipeline.add_node(AddConst(1.0));
        let second = pipeline.add_node(AddConst(1.0));
        pipeline.register_supplier(second, 0, first, 0).unwrap();
        pipeline.init_all().unwrap();
        pipeline.set_supplier_data(first, 0, Payload::Number(0.0)).unwrap();
        assert_eq!(pipeline.get_consumer_data(second, 0).unwrap(), Payload::Number(2.0));
        pipeline.set_supplier_data(first, 0, Payload::Number(10.0)).unwrap();
        assert_eq!(pipeline.get_consumer_data(second, 0).unwrap(), Payload::Number(12.0));
    }

    #[test]
    fn output_out_of_range_is_wiring_error() {
        let (mut pipeline, _, add) = chain();
        let err = pipeline.get_consumer_data(add, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Wiring);
    }
}
