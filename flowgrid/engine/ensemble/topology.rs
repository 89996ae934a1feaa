use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

const ORTHOGONAL: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const ORTHOGONAL_FAR: [(i64, i64); 4] = [(-2, 0), (2, 0), (0, -2), (0, 2)];
const DIAGONAL: [(i64, i64); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Largest reach a custom offset may have along either axis.
pub const MAX_CUSTOM_OFFSET: u64 = (1 << 32) - 1;

/// Predefined neighborhood shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyKind {
    /// Left, right, up, down.
    Orthogonal4,
    /// Orthogonal plus the cells two steps away along each axis.
    ExtendedOrthogonal8,
    /// Orthogonal plus the four diagonals.
    Diagonal8,
    /// Extended orthogonal plus the four diagonals.
    Combined12,
}

impl TopologyKind {
    /// Every predefined kind.
    pub const ALL: [Self; 4] = [
        Self::Orthogonal4,
        Self::ExtendedOrthogonal8,
        Self::Diagonal8,
        Self::Combined12,
    ];
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Orthogonal4 => "orthogonal4",
            Self::ExtendedOrthogonal8 => "extended-orthogonal8",
            Self::Diagonal8 => "diagonal8",
            Self::Combined12 => "combined12",
        };
        f.write_str(name)
    }
}

impl FromStr for TopologyKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(*c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "orthogonal4" | "orthogonal" => Ok(Self::Orthogonal4),
            "extendedorthogonal8" | "extendedorthogonal" => Ok(Self::ExtendedOrthogonal8),
            "diagonal8" | "diagonal" => Ok(Self::Diagonal8),
            "combined12" | "combined" => Ok(Self::Combined12),
            _ => Err(FlowError::config(format!("unknown neighbor topology `{s}`"))),
        }
    }
}

/// Ordered list of signed (dx, dy) neighbor offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborTopology {
    offsets: Vec<(i64, i64)>,
}

impl NeighborTopology {
    /// One of the predefined shapes.
    #[must_use]
    pub fn predefined(kind: TopologyKind) -> Self {
        let offsets = match kind {
            TopologyKind::Orthogonal4 => ORTHOGONAL.to_vec(),
            TopologyKind::ExtendedOrthogonal8 => [ORTHOGONAL, ORTHOGONAL_FAR].concat(),
            TopologyKind::Diagonal8 => [ORTHOGONAL, DIAGONAL].concat(),
            TopologyKind::Combined12 => [ORTHOGONAL, ORTHOGONAL_FAR, DIAGONAL].concat(),
        };
        Self { offsets }
    }

    /// Arbitrary offsets; must be non-empty and must not contain `(0, 0)`.
    pub fn custom(offsets: Vec<(i64, i64)>) -> FlowResult<Self> {
        if offsets.is_empty() {
            return Err(FlowError::config("a neighbor topology needs at least one offset"));
        }
        if offsets.contains(&(0, 0)) {
            return Err(FlowError::config("offset (0, 0) would make a cell its own neighbor"));
        }
        if let Some(&(dx, dy)) = offsets
            .iter()
            .find(|(dx, dy)| dx.unsigned_abs().max(dy.unsigned_abs()) > MAX_CUSTOM_OFFSET)
        {
            return Err(FlowError::config(format!(
                "offset ({dx}, {dy}) exceeds the largest supported reach {MAX_CUSTOM_OFFSET}"
            )));
        }
        Ok(Self { offsets })
    }

    /// Offsets in neighbor order.
    #[must_use]
    pub fn offsets(&self) -> &[(i64, i64)] {
        &self.offsets
    }

    /// Number of neighbors per cell, duplicates included.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.offsets.len()
    }

    /// Largest absolute offset along either axis.
    #[must_use]
    pub fn max_offset(&self) -> u64 {
        self.offsets
            .iter()
            .map(|(dx, dy)| dx.unsigned_abs().max(dy.unsigned_abs()))
            .max()
            .unwrap_or(0)
    }
}

impl From<TopologyKind> for NeighborTopology {
    fn from(kind: TopologyKind) -> Self {
        Self::predefined(kind)
    }
}
