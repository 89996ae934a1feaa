use std::{fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::{CentroidClassifier, Classifier, PriorClassifier},
    dataset::AttributeModel,
    error::{FlowError, FlowResult},
};

/// Closed set of learner templates the registry can hand out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// [`CentroidClassifier`].
    Centroid,
    /// [`PriorClassifier`].
    Prior,
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Centroid => write!(f, "centroid"),
            Self::Prior => write!(f, "prior"),
        }
    }
}

impl FromStr for ClassifierKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "centroid" => Ok(Self::Centroid),
            "prior" => Ok(Self::Prior),
            other => Err(FlowError::config(format!("unknown classifier `{other}`"))),
        }
    }
}

/// Registry of learner templates, built once and passed by reference.
#[derive(Clone, Default)]
pub struct ClassifierRegistry {
    inner: Arc<RwLock<IndexMap<ClassifierKind, Box<dyn Classifier>>>>,
}

impl fmt::Debug for ClassifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ClassifierRegistry {
    /// Registry holding every built-in learner, sharing one attribute model.
    #[must_use]
    pub fn with_defaults(schema: Arc<dyn AttributeModel>) -> Self {
        let registry = Self::default();
        registry.register(ClassifierKind::Centroid, Box::new(CentroidClassifier::new(schema)));
        registry.register(ClassifierKind::Prior, Box::new(PriorClassifier::new()));
        registry
    }

    /// Registers or replaces a template.
    pub fn register(&self, kind: ClassifierKind, template: Box<dyn Classifier>) {
        self.inner.write().insert(kind, template);
    }

    /// Fresh copy of a template.
    pub fn template(&self, kind: ClassifierKind) -> FlowResult<Box<dyn Classifier>> {
        self.inner
            .read()
            .get(&kind)
            .map(|template| template.boxed_clone())
            .ok_or_else(|| FlowError::config(format!("no template registered for `{kind}`")))
    }

    /// Registered kinds in registration order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ClassifierKind> {
        self.inner.read().keys().copied().collect()
    }
}
