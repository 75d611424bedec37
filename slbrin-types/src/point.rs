use geo::Point;
use serde::{Deserialize, Serialize};

/// Opaque identifier of the payload attached to an indexed point.
pub type PayloadId = u64;

/// A point stored in the index together with its geohash key.
///
/// The key is derived from the coordinates by the index's geohash codec and is
/// never recomputed once the record is stored.
///
/// # Examples
///
/// ```
/// use slbrin_types::point::Record;
/// use geo::Point;
///
/// let record = Record::new(Point::new(-73.98, 40.75), 0x2f3a, 7);
/// assert_eq!(record.id, 7);
/// assert_eq!(record.x(), -73.98);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The 2D point (x/longitude, y/latitude)
    pub point: Point<f64>,
    /// Geohash integer key of `point`
    pub key: u64,
    /// Payload identifier
    pub id: PayloadId,
}

impl Record {
    /// Create a record from a point, its geohash key and a payload id.
    pub fn new(point: Point<f64>, key: u64, id: PayloadId) -> Self {
        Self { point, key, id }
    }

    /// Get the x coordinate.
    pub fn x(&self) -> f64 {
        self.point.x()
    }

    /// Get the y coordinate.
    pub fn y(&self) -> f64 {
        self.point.y()
    }

    /// Squared Euclidean distance to another point.
    pub fn distance_squared(&self, other: &Point<f64>) -> f64 {
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        dx * dx + dy * dy
    }
}
