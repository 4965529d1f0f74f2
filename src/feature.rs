use crate::classify::Classification;
use crate::geometry::Polygon;
use log::warn;

/// One building to classify.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFeature {
    pub index: usize,
    pub polygon: Polygon,
    classification: Option<Classification>,
}

impl BuildingFeature {
    pub fn new(index: usize, polygon: Polygon) -> Self {
        Self {
            index,
            polygon,
            classification: None,
        }
    }

    /// Record the classification outcome. A feature is annotated once;
    /// later calls are ignored.
    pub fn annotate(&mut self, classification: Classification) {
        if self.classification.is_some() {
            warn!("Building {} already classified, ignoring new result", self.index);
            return;
        }
        self.classification = Some(classification);
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn is_marked(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.is_marked)
    }

    pub fn error(&self) -> Option<&str> {
        self.classification.as_ref().and_then(|c| c.error.as_deref())
    }
}
