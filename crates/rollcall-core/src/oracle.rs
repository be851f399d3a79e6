//! Identity oracle contract.
//!
//! The oracle is the external face recognizer (cascade detector + LBPH). It
//! reports a label id and a distance for each detected face; lower distance
//! is a better match. This module holds the caller side of that contract:
//! the acceptance threshold, the displayed confidence and the label map.

use crate::error::AttendanceError;
use crate::types::RecognitionEvent;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Predictions with a distance below this are accepted as known identities.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 100.0;

/// One face prediction from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: i32,
    pub distance: f64,
}

impl Prediction {
    /// Displayed confidence percentage, `100 - distance` clamped at 0.
    pub fn confidence(&self) -> f64 {
        (100.0 - self.distance).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Known { name: String, confidence: f64 },
    Unknown { confidence: f64 },
}

impl Identification {
    /// A recognition event for known identities; unknown faces yield nothing.
    pub fn into_event(self, at: NaiveDateTime) -> Option<RecognitionEvent> {
        match self {
            Self::Known { name, confidence } => Some(RecognitionEvent {
                identity: name,
                confidence,
                at,
            }),
            Self::Unknown { .. } => None,
        }
    }
}

/// Source of oracle predictions, one per detected face.
pub trait IdentityOracle {
    /// Block until the next prediction. `Ok(None)` means the oracle has shut down.
    fn next_prediction(&mut self) -> Result<Option<Prediction>, AttendanceError>;
}

#[derive(Deserialize)]
struct LabelFile {
    #[serde(default)]
    labels: HashMap<String, String>,
}

/// Maps the recognizer's numeric labels to display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: HashMap<i32, String>,
}

impl LabelMap {
    /// Parse a label file:
    ///
    /// ```toml
    /// [labels]
    /// 1 = "Jane Doe"
    /// 2 = "Bob"
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, AttendanceError> {
        let file: LabelFile = toml::from_str(src)
            .map_err(|e| AttendanceError::InvalidInput(format!("bad label file: {e}")))?;
        let mut names = HashMap::with_capacity(file.labels.len());
        for (id, name) in file.labels {
            let id: i32 = id
                .trim()
                .parse()
                .map_err(|_| AttendanceError::InvalidInput(format!("label id {id:?} is not an integer")))?;
            names.insert(id, name);
        }
        Ok(Self { names })
    }

    /// Load a label file. A missing file is an unavailable oracle.
    pub fn load(path: &Path) -> Result<Self, AttendanceError> {
        let src = std::fs::read_to_string(path).map_err(|e| {
            AttendanceError::OracleUnavailable(format!("label file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&src)
    }

    pub fn insert(&mut self, label: i32, name: impl Into<String>) {
        self.names.insert(label, name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for a label; labels the recognizer knows but the map does not
    /// are shown as `User_<id>`.
    pub fn name_for(&self, label: i32) -> String {
        self.names
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("User_{label}"))
    }
}

/// Apply the acceptance threshold to a prediction.
pub fn identify(prediction: &Prediction, labels: &LabelMap, threshold: f64) -> Identification {
    let confidence = prediction.confidence();
    if prediction.distance < threshold {
        Identification::Known {
            name: labels.name_for(prediction.label),
            confidence,
        }
    } else {
        Identification::Unknown { confidence }
    }
}
