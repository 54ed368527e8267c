use punchgate_hw::PositionFix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mean earth radius used for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Canonical detection rectangle in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBox {
    pub x_min: f64,
    pub y_min: f64,
    pub width: f64,
    pub height: f64,
}

impl DetectionBox {
    /// Area counting negative or non-finite sides as zero.
    pub fn area(&self) -> f64 {
        let side = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        side(self.width) * side(self.height)
    }

    /// A box is usable only with finite, strictly positive sides.
    pub fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// A corner as detectors emit it: `[x, y]` or `{x, y}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPoint {
    Pair(Vec<f64>),
    Xy {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
}

impl RawPoint {
    fn x(&self) -> Option<f64> {
        match self {
            RawPoint::Pair(v) => v.first().copied(),
            RawPoint::Xy { x, .. } => *x,
        }
    }

    fn y(&self) -> Option<f64> {
        match self {
            RawPoint::Pair(v) => v.get(1).copied(),
            RawPoint::Xy { y, .. } => *y,
        }
    }
}

/// Box record as emitted by a detector, in whichever shape it uses.
///
/// Accepted shapes: `{xMin, yMin, xMax, yMax}`, `{left, top, width, height}`,
/// `{topLeft, bottomRight}` with array or object corners, and mixes thereof.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawBox {
    pub x_min: Option<f64>,
    pub y_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_max: Option<f64>,
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub top_left: Option<RawPoint>,
    pub bottom_right: Option<RawPoint>,
}

impl RawBox {
    pub fn corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min: Some(x_min),
            y_min: Some(y_min),
            x_max: Some(x_max),
            y_max: Some(y_max),
            ..Self::default()
        }
    }

    pub fn ltwh(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left: Some(left),
            top: Some(top),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    /// Collapse into the canonical rectangle. Missing fields become 0.
    pub fn normalize(&self) -> DetectionBox {
        let tl_x = self.top_left.as_ref().and_then(RawPoint::x);
        let tl_y = self.top_left.as_ref().and_then(RawPoint::y);
        let br_x = self.bottom_right.as_ref().and_then(RawPoint::x);
        let br_y = self.bottom_right.as_ref().and_then(RawPoint::y);

        let x_min = self.x_min.or(self.left).or(tl_x).unwrap_or(0.0);
        let y_min = self.y_min.or(self.top).or(tl_y).unwrap_or(0.0);

        let width = self
            .width
            .or_else(|| Some(self.x_max? - self.x_min?))
            .or_else(|| Some(br_x? - tl_x?))
            .unwrap_or(0.0);
        let height = self
            .height
            .or_else(|| Some(self.y_max? - self.y_min?))
            .or_else(|| Some(br_y? - tl_y?))
            .unwrap_or(0.0);

        DetectionBox {
            x_min,
            y_min,
            width,
            height,
        }
    }
}

/// Clock-in or clock-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchType {
    In,
    Out,
}

impl PunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::In => "in",
            PunchType::Out => "out",
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" | "clock-in" => Ok(PunchType::In),
            "out" | "clock-out" => Ok(PunchType::Out),
            other => Err(format!("unknown punch type '{other}' (expected in or out)")),
        }
    }
}

/// The circular area a punch is allowed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteGeofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl SiteGeofence {
    /// Great-circle distance from the site center to the fix, in meters.
    pub fn distance_to(&self, fix: &PositionFix) -> f64 {
        haversine_m(self.latitude, self.longitude, fix.latitude, fix.longitude)
    }

    pub fn contains_distance(&self, distance_m: f64) -> bool {
        distance_m <= self.radius_m
    }
}

/// Haversine distance between two WGS84 coordinates, in meters.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}
