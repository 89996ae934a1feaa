use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    ensemble::{NeighborTopology, TopologyKind},
    error::{FlowError, FlowResult},
    registry::ClassifierKind,
    resampling::{SplitStrategy, DEFAULT_SEED},
};

/// Engine settings read from a TOML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `[validation]` table.
    #[serde(default)]
    pub validation: ValidationSettings,
    /// `[grid]` table.
    #[serde(default)]
    pub grid: GridSettings,
    /// `[telemetry]` table.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl EngineConfig {
    /// Loads and checks a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let mut config =
            Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.telemetry.resolve_relative(&base);
        Ok(config)
    }

    /// Parses and checks a TOML document; missing tables take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("decoding engine config")?;
        config.check()?;
        Ok(config)
    }

    /// Validates every string-typed setting.
    pub fn check(&self) -> FlowResult<()> {
        self.validation.split_strategy()?;
        self.validation.classifier_kind()?;
        self.grid.topology()?;
        self.grid.layout_kind()?;
        self.grid.template_kinds()?;
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(FlowError::config(format!(
                "grid must not be empty, got {}x{}",
                self.grid.width, self.grid.height
            )));
        }
        Ok(())
    }
}

/// Resampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// `fixed-ratio` or `cross-validation`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Strategy parameter list.
    #[serde(default = "default_params")]
    pub params: Vec<f64>,
    /// Partitioning seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Learner under validation.
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// Whether a min-max normalizer precedes the learner.
    #[serde(default = "default_true")]
    pub normalize: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            params: default_params(),
            seed: default_seed(),
            classifier: default_classifier(),
            normalize: default_true(),
        }
    }
}

impl ValidationSettings {
    /// Typed split strategy.
    pub fn split_strategy(&self) -> FlowResult<SplitStrategy> {
        SplitStrategy::parse(&self.strategy, &self.params)
    }

    /// Typed learner key.
    pub fn classifier_kind(&self) -> FlowResult<ClassifierKind> {
        self.classifier.parse()
    }
}

/// How grid templates are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// One template everywhere.
    Uniform,
    /// Row bands.
    ByRow,
    /// Column bands.
    ByColumn,
}

/// Ensemble grid settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSettings {
    /// Columns.
    #[serde(default = "default_side")]
    pub width: usize,
    /// Rows.
    #[serde(default = "default_side")]
    pub height: usize,
    /// Predefined topology name.
    #[serde(default = "default_topology")]
    pub topology: String,
    /// Learner used by a uniform layout.
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// `uniform`, `by-row` or `by-column`.
    #[serde(default = "default_layout")]
    pub template_layout: String,
    /// Learners per band for banded layouts.
    #[serde(default)]
    pub templates: Vec<String>,
    /// Instances each node offers its neighbors per round.
    #[serde(default = "default_select")]
    pub select: usize,
    /// Rounds run by the runtime.
    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            width: default_side(),
            height: default_side(),
            topology: default_topology(),
            classifier: default_classifier(),
            template_layout: default_layout(),
            templates: Vec::new(),
            select: default_select(),
            rounds: default_rounds(),
        }
    }
}

impl GridSettings {
    /// Typed topology.
    pub fn topology(&self) -> FlowResult<NeighborTopology> {
        self.topology.parse::<TopologyKind>().map(NeighborTopology::from)
    }

    /// Typed layout.
    pub fn layout_kind(&self) -> FlowResult<LayoutKind> {
        match self.template_layout.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "uniform" => Ok(LayoutKind::Uniform),
            "by-row" | "rows" => Ok(LayoutKind::ByRow),
            "by-column" | "columns" => Ok(LayoutKind::ByColumn),
            other => Err(FlowError::config(format!("unknown template layout `{other}`"))),
        }
    }

    /// Band learners; a banded layout with no list falls back to `classifier`.
    pub fn template_kinds(&self) -> FlowResult<Vec<ClassifierKind>> {
        if self.templates.is_empty() {
            return Ok(vec![self.classifier.parse()?]);
        }
        self.templates.iter().map(|name| name.parse()).collect()
    }
}

/// Log and event sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Module name stamped on records.
    #[serde(default = "default_module")]
    pub module: String,
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            module: default_module(),
            log_path: None,
            event_log: None,
        }
    }
}

impl TelemetrySettings {
    fn resolve_relative(&mut self, base: &Path) {
        for path in [&mut self.log_path, &mut self.event_log].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

fn default_strategy() -> String {
    "cross-validation".into()
}

fn default_params() -> Vec<f64> {
    vec![10.0]
}

const fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_classifier() -> String {
    ClassifierKind::Centroid.to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_side() -> usize {
    5
}

fn default_topology() -> String {
    TopologyKind::Orthogonal4.to_string()
}

fn default_layout() -> String {
    "uniform".into()
}

const fn default_select() -> usize {
    2
}

const fn default_rounds() -> usize {
    3
}

fn default_module() -> String {
    "flowgrid".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_takes_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(
            config.validation.split_strategy().unwrap(),
            SplitStrategy::CrossValidation { folds: 10 }
        );
        assert_eq!(config.validation.seed, DEFAULT_SEED);
        assert_eq!(config.grid.topology().unwrap().degree(), 4);
        assert_eq!(config.grid.layout_kind().unwrap(), LayoutKind::Uniform);
        assert_eq!(config.grid.template_kinds().unwrap(), vec![ClassifierKind::Centroid]);
    }

    #[test]
    fn reads_tables() {
        let raw = r#"
            [validation]
            strategy = "fixed-ratio"
            params = [0.8]
            seed = 42
            classifier = "prior"
            normalize = false

            [grid]
            width = 6
            height = 4
            topology = "combined12"
            template_layout = "by-row"
            templates = ["centroid", "prior"]
            select = 5
        "#;
        let config = EngineConfig::from_toml_str(raw).unwrap();
        assert_eq!(
            config.validation.split_strategy().unwrap(),
            SplitStrategy::FixedRatio { train_fraction: 0.8 }
        );
        assert!(!config.validation.normalize);
        assert_eq!(config.grid.topology().unwrap().degree(), 12);
        assert_eq!(config.grid.layout_kind().unwrap(), LayoutKind::ByRow);
        assert_eq!(config.grid.template_kinds().unwrap().len(), 2);
        assert_eq!(config.grid.rounds, 3);
    }

    #[test]
    fn rejects_bad_values() {
        for raw in [
            "[validation]\nstrategy = \"bootstrap\"",
            "[validation]\nparams = [1.0]",
            "[grid]\ntopology = \"hex\"",
            "[grid]\nwidth = 0",
            "[grid]\ntemplates = [\"forest\"]",
            "[grid]\ntemplate_layout = \"spiral\"",
        ] {
            assert!(EngineConfig::from_toml_str(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn load_resolves_sink_paths_next_to_the_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[telemetry]\nlog_path = \"engine.log\"").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        let expected = file.path().parent().unwrap().join("engine.log");
        assert_eq!(config.telemetry.log_path, Some(expected));
        assert_eq!(config.telemetry.module, "flowgrid");
        assert!(EngineConfig::load("/definitely/missing.toml").is_err());
    }
}
