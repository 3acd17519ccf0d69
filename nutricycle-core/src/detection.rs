//! Detection value types and the class-name table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Axis-aligned box in center form, in original-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Corner form `[x1, y1, x2, y2]`.
    pub fn to_xyxy(&self) -> [f32; 4] {
        let half_w = self.w / 2.0;
        let half_h = self.h / 2.0;
        [
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        ]
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }
}

/// One detected object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Build a detection, resolving the label through the class table.
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox, classes: &ClassTable) -> Self {
        Self {
            class_id,
            class_name: classes.resolve(class_id),
            confidence,
            bbox,
        }
    }
}

/// Process-wide class id -> display label mapping. Read-only after startup,
/// cheap to clone.
#[derive(Debug, Clone)]
pub struct ClassTable {
    names: Arc<HashMap<usize, String>>,
}

impl ClassTable {
    pub fn new(names: HashMap<usize, String>) -> Self {
        Self {
            names: Arc::new(names),
        }
    }

    /// Build from an ordered list where the index is the class id.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .enumerate()
                .map(|(id, name)| (id, name.into()))
                .collect(),
        )
    }

    /// Label for `class_id`, or the stringified id when the table has no entry.
    pub fn resolve(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::from_names(["foreign_object"])
    }
}
