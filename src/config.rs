use crate::core::{Result, StoreError};
use crate::storage::persistence::{read_file, write_atomic};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version written by this build. Documents with an older version are
/// replaced by defaults on load.
pub const PARAMS_VERSION: u32 = 5;

/// Tunables of the interactive analysis tools.
///
/// Serialized as JSON with camelCase keys. Missing keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisParams {
    #[serde(default = "unversioned")]
    pub version: u32,

    /// Points along the centerline searched either side of the projection
    /// when placing an anchor. Zero disables the brightest-path search.
    pub brightest_path_distance: i64,

    /// Image channel (0-based) sampled for anchor and background search.
    ///
    /// Defaults to 1, the second channel. On a single-channel volume it is
    /// clamped to channel 0 and a warning is logged on every sample.
    pub channel: usize,

    /// Slices either side of z folded into the max projection
    pub z_spread: i64,

    /// ROI extend given to new spines
    pub roi_extend: f64,

    /// ROI radius given to new spines
    pub roi_radius: f64,

    /// Radius given to new segments
    pub segment_radius: f64,

    /// Furthest a new tracing point may land from the existing tracing
    pub segment_tracing_max_distance: f64,

    /// `n` of the `n`×`n` background candidate grid
    pub background_roi_grid_points: usize,

    /// Fraction by which neighbouring background candidates overlap
    pub background_roi_grid_overlap: f64,
}

fn unversioned() -> u32 {
    0
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            version: PARAMS_VERSION,
            brightest_path_distance: 10,
            channel: 1,
            z_spread: 3,
            roi_extend: 4.0,
            roi_radius: 4.0,
            segment_radius: 4.0,
            segment_tracing_max_distance: 90.0,
            background_roi_grid_points: 5,
            background_roi_grid_overlap: 0.1,
        }
    }
}

impl AnalysisParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brightest_path_distance(mut self, distance: i64) -> Self {
        self.brightest_path_distance = distance;
        self
    }

    pub fn channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn z_spread(mut self, z_spread: i64) -> Self {
        self.z_spread = z_spread;
        self
    }

    pub fn roi_extend(mut self, extend: f64) -> Self {
        self.roi_extend = extend;
        self
    }

    pub fn roi_radius(mut self, radius: f64) -> Self {
        self.roi_radius = radius;
        self
    }

    pub fn segment_radius(mut self, radius: f64) -> Self {
        self.segment_radius = radius;
        self
    }

    pub fn segment_tracing_max_distance(mut self, distance: f64) -> Self {
        self.segment_tracing_max_distance = distance;
        self
    }

    pub fn background_grid(mut self, points: usize, overlap: f64) -> Self {
        self.background_roi_grid_points = points;
        self.background_roi_grid_overlap = overlap;
        self
    }

    /// Parses a JSON document. An outdated document yields the defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        if params.version < PARAMS_VERSION {
            warn!(
                "analysis params version {} is older than {}, using defaults",
                params.version, PARAMS_VERSION
            );
            return Ok(Self::default());
        }
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = read_file(&path)?;
        let json = String::from_utf8(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let params = Self::from_json(&json)?;
        info!("loaded analysis params from {}", path.as_ref().display());
        Ok(params)
    }

    /// Writes the params through a temp file next to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        write_atomic(path, self.to_json()?.as_bytes())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(StoreError::ConstraintViolation(format!("analysis params: {}", msg)));

        if self.brightest_path_distance < 0 {
            return invalid("brightest_path_distance cannot be negative");
        }
        if self.z_spread < 0 {
            return invalid("z_spread cannot be negative");
        }
        if self.roi_extend < 0.0 || self.roi_radius <= 0.0 || self.segment_radius <= 0.0 {
            return invalid("ROI and segment radii must be positive");
        }
        if self.segment_tracing_max_distance <= 0.0 {
            return invalid("segment_tracing_max_distance must be > 0");
        }
        if self.background_roi_grid_points == 0 {
            return invalid("background_roi_grid_points must be > 0");
        }
        if !(0.0..1.0).contains(&self.background_roi_grid_overlap) {
            return invalid("background_roi_grid_overlap must be in [0, 1)");
        }
        Ok(())
    }
}
