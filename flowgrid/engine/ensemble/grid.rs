use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use super::{
    node::{ClassifierNode, TrainOutcome},
    topology::NeighborTopology,
};
use crate::{
    classifier::{argmax, Classifier},
    dataset::{DataSet, Instance},
    error::{FlowError, FlowResult},
    telemetry::{self, EngineTelemetry},
};

/// How classifier templates are spread over the cells.
#[derive(Debug, Clone)]
pub enum TemplateLayout {
    /// Every cell starts from the same template.
    Uniform(Box<dyn Classifier>),
    /// Rows are split into contiguous bands, one template per band.
    ByRow(Vec<Box<dyn Classifier>>),
    /// Columns are split into contiguous bands, one template per band.
    ByColumn(Vec<Box<dyn Classifier>>),
}

impl TemplateLayout {
    fn check(&self, width: usize, height: usize) -> FlowResult<()> {
        let (templates, span, axis) = match self {
            Self::Uniform(_) => return Ok(()),
            Self::ByRow(templates) => (templates.len(), height, "rows"),
            Self::ByColumn(templates) => (templates.len(), width, "columns"),
        };
        if templates == 0 || templates > span {
            return Err(FlowError::config(format!(
                "{templates} templates cannot be banded over {span} {axis}"
            )));
        }
        Ok(())
    }

    fn template_for(&self, x: usize, y: usize, width: usize, height: usize) -> &dyn Classifier {
        match self {
            Self::Uniform(template) => template.as_ref(),
            Self::ByRow(templates) => templates[y * templates.len() / height].as_ref(),
            Self::ByColumn(templates) => templates[x * templates.len() / width].as_ref(),
        }
    }
}

/// Stable handle to one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(usize);

impl CellId {
    /// Row-major position in the grid.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Summary of one `run_round`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    /// Cells whose retrained learner was promoted.
    pub swapped: usize,
    /// One message per cell that kept its previous learner.
    pub retained: Vec<String>,
    /// Total weight over every assigned set after reweighting.
    pub total_mass: f64,
}

/// Torus of classifier nodes with a fixed neighborhood shape.
///
/// Positions and topology never change after construction, so neighbor
/// queries need no locking; each node has its own mutex.
#[derive(Debug)]
pub struct Grid {
    width: usize,
    height: usize,
    num_classes: usize,
    topology: NeighborTopology,
    cells: Vec<Mutex<ClassifierNode>>,
    positions: Vec<(usize, usize)>,
    telemetry: Option<EngineTelemetry>,
}

impl Grid {
    /// Builds one node per cell, seeded from the layout's templates.
    pub fn new(
        width: usize,
        height: usize,
        num_classes: usize,
        layout: &TemplateLayout,
        topology: NeighborTopology,
        telemetry: Option<EngineTelemetry>,
    ) -> FlowResult<Self> {
        if width == 0 || height == 0 {
            return Err(FlowError::config(format!("grid must not be empty, got {width}x{height}")));
        }
        if i64::try_from(width).is_err() || i64::try_from(height).is_err() {
            return Err(FlowError::config(format!("grid {width}x{height} is too large")));
        }
        layout.check(width, height)?;

        let mut cells = Vec::with_capacity(width * height);
        let mut positions = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let template = layout.template_for(x, y, width, height).boxed_clone();
                let node = ClassifierNode::new(template, num_classes).with_telemetry(telemetry.clone());
                cells.push(Mutex::new(node));
                positions.push((x, y));
            }
        }
        let grid = Self {
            width,
            height,
            num_classes,
            topology,
            cells,
            positions,
            telemetry,
        };
        if grid.has_aliasing() {
            telemetry::log(
                grid.telemetry.as_ref(),
                LogLevel::Warn,
                "grid.neighbor_aliasing",
                json!({
                    "width": width,
                    "height": height,
                    "max_offset": grid.topology.max_offset(),
                }),
            );
        }
        telemetry::log(
            grid.telemetry.as_ref(),
            LogLevel::Info,
            "grid.created",
            json!({
                "width": width,
                "height": height,
                "degree": grid.topology.degree(),
            }),
        );
        Ok(grid)
    }

    /// Columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Neighborhood shape.
    #[must_use]
    pub const fn topology(&self) -> &NeighborTopology {
        &self.topology
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false for a constructed grid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> {
        (0..self.cells.len()).map(CellId)
    }

    /// Cell at a coordinate, wrapping both axes onto the torus.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cell_at(&self, x: i64, y: i64) -> CellId {
        // Dimensions were checked to fit in i64 at construction.
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.rem_euclid(self.height as i64) as usize;
        CellId(y * self.width + x)
    }

    /// Position of a cell.
    pub fn position(&self, cell: CellId) -> FlowResult<(usize, usize)> {
        self.positions
            .get(cell.0)
            .copied()
            .ok_or_else(|| FlowError::config(format!("{cell} is outside a {}x{} grid", self.width, self.height)))
    }

    /// Neighbors of `cell` in topology order; small grids may repeat a cell.
    #[allow(clippy::cast_possible_wrap)]
    pub fn neighbors(&self, cell: CellId) -> FlowResult<Vec<CellId>> {
        let (x, y) = self.position(cell)?;
        let (width, height) = (self.width as i64, self.height as i64);
        // Offsets are reduced first so the sum stays below twice the span.
        Ok(self
            .topology
            .offsets()
            .iter()
            .map(|&(dx, dy)| self.cell_at(x as i64 + dx.rem_euclid(width), y as i64 + dy.rem_euclid(height)))
            .collect())
    }

    /// Whether some axis is too short for every offset to reach a distinct cell.
    #[must_use]
    pub fn has_aliasing(&self) -> bool {
        let reach = |pick: fn(&(i64, i64)) -> i64| {
            self.topology
                .offsets()
                .iter()
                .map(|offset| pick(offset).unsigned_abs())
                .max()
                .unwrap_or(0)
        };
        let aliased = |span: usize, reach: u64| reach > 0 && (span as u64) <= reach.saturating_mul(2);
        aliased(self.width, reach(|o| o.0)) || aliased(self.height, reach(|o| o.1))
    }

    /// Locks one node.
    pub fn node(&self, cell: CellId) -> FlowResult<MutexGuard<'_, ClassifierNode>> {
        self.cells
            .get(cell.0)
            .map(|node| node.lock())
            .ok_or_else(|| FlowError::config(format!("{cell} is outside a {}x{} grid", self.width, self.height)))
    }

    /// Deals `data` round-robin over the cells, replacing their assigned sets.
    pub fn distribute(&self, data: &DataSet) -> FlowResult<()> {
        if data.num_classes() != self.num_classes {
            return Err(FlowError::config(format!(
                "grid expects {} classes, data set has {}",
                self.num_classes,
                data.num_classes()
            )));
        }
        let mut shares = vec![Vec::new(); self.cells.len()];
        for idx in 0..data.len() {
            shares[idx % self.cells.len()].push(idx);
        }
        for (cell, share) in self.cells.iter().zip(shares) {
            cell.lock().assign(data.subset(&share));
        }
        Ok(())
    }

    /// One exchange round.
    ///
    /// Every node selects its `select` heaviest instances and receives its
    /// neighbors' selections; every node then retrains safely and, when the
    /// retrained learner was promoted, reweights its assigned set.
    ///
    /// Reweighting is only defined for two classes, so any other grid is
    /// rejected before a node is touched.
    pub fn run_round(&self, select: usize) -> FlowResult<RoundReport> {
        if self.num_classes != 2 {
            return Err(FlowError::config(format!(
                "exchange rounds reweight two classes, grid has {}",
                self.num_classes
            )));
        }
        let selections: Vec<DataSet> = self
            .cells
            .iter()
            .map(|cell| cell.lock().select(select).clone())
            .collect();
        for cell in self.cells() {
            let mut received = DataSet::new(self.num_classes);
            for neighbor in self.neighbors(cell)? {
                received.extend_from(&selections[neighbor.0])?;
            }
            self.cells[cell.0].lock().set_received(received);
        }

        let mut report = RoundReport {
            swapped: 0,
            retained: Vec::new(),
            total_mass: 0.0,
        };
        for cell in self.cells() {
            let mut node = self.cells[cell.0].lock();
            match node.train_safe() {
                TrainOutcome::Swapped => {
                    report.swapped += 1;
                    node.reweight_assigned()?;
                }
                TrainOutcome::Retained(err) => report.retained.push(format!("{cell}: {err}")),
            }
            report.total_mass += node.assigned().total_weight();
        }

        let payload = json!({
            "cells": self.cells.len(),
            "swapped": report.swapped,
            "retained": report.retained.len(),
            "total_mass": report.total_mass,
        });
        telemetry::log(self.telemetry.as_ref(), LogLevel::Info, "grid.round_completed", payload.clone());
        telemetry::event(self.telemetry.as_ref(), "flowgrid.grid.round_completed", payload);
        Ok(report)
    }

    /// Averages the distributions of `cell` and its neighbors.
    ///
    /// Returns the winning class and its averaged posterior.
    pub fn neighborhood_vote(&self, cell: CellId, instance: &Instance) -> FlowResult<(usize, f64)> {
        let mut voters = vec![cell];
        voters.extend(self.neighbors(cell)?);
        let mut total = vec![0.0; self.num_classes];
        for voter in &voters {
            let distribution = self.node(*voter)?.active().distribution(instance)?;
            if distribution.len() != total.len() {
                return Err(FlowError::config(format!(
                    "{voter} returned {} posteriors for {} classes",
                    distribution.len(),
                    total.len()
                )));
            }
            for (sum, p) in total.iter_mut().zip(distribution) {
                *sum += p;
            }
        }
        let votes = voters.len() as f64;
        let averaged: Vec<f64> = total.into_iter().map(|sum| sum / votes).collect();
        argmax(&averaged).ok_or_else(|| FlowError::config("cannot vote over zero classes"))
    }
}
