use geo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// The cell lies entirely inside the window: no edge needs checking.
pub const RELATION_INSIDE: u8 = 0b0000;
/// The cell extends past the window's left (min x) edge.
pub const RELATION_LEFT: u8 = 0b0001;
/// The cell extends past the window's right (max x) edge.
pub const RELATION_RIGHT: u8 = 0b0010;
/// The cell extends past the window's bottom (min y) edge.
pub const RELATION_BOTTOM: u8 = 0b0100;
/// The cell extends past the window's top (max y) edge.
pub const RELATION_TOP: u8 = 0b1000;
/// Every window edge has to be checked.
pub const RELATION_ALL: u8 = 0b1111;

/// A 2D axis-aligned region `[min_x, max_x] × [min_y, max_y]`.
///
/// This is a wrapper around `geo::Rect` with the operations the partition
/// builder and the query engine need: quadrant splitting in geohash order,
/// window relations and point distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// The underlying geometric rectangle
    pub rect: Rect,
}

impl Region {
    /// Create a new region from minimum and maximum coordinates.
    ///
    /// # Examples
    ///
    /// ```
    /// use slbrin_types::region::Region;
    ///
    /// let region = Region::new(-74.05, 40.60, -73.75, 40.90);
    /// assert!((region.width() - 0.30).abs() < 1e-9);
    /// ```
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            rect: Rect::new(
                geo::coord! { x: min_x, y: min_y },
                geo::coord! { x: max_x, y: max_y },
            ),
        }
    }

    /// Create a region from a `geo::Rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self { rect }
    }

    /// Smallest region spanning two corner points.
    pub fn from_corners(a: &Point<f64>, b: &Point<f64>) -> Self {
        Self::new(a.x(), a.y(), b.x(), b.y())
    }

    pub fn min_x(&self) -> f64 {
        self.rect.min().x
    }

    pub fn min_y(&self) -> f64 {
        self.rect.min().y
    }

    pub fn max_x(&self) -> f64 {
        self.rect.max().x
    }

    pub fn max_y(&self) -> f64 {
        self.rect.max().y
    }

    /// Lower-left corner.
    pub fn min(&self) -> Point<f64> {
        Point::new(self.min_x(), self.min_y())
    }

    /// Upper-right corner.
    pub fn max(&self) -> Point<f64> {
        Point::new(self.max_x(), self.max_y())
    }

    pub fn width(&self) -> f64 {
        self.max_x() - self.min_x()
    }

    pub fn height(&self) -> f64 {
        self.max_y() - self.min_y()
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// A region is usable for indexing when all bounds are finite and it has a
    /// positive extent in both dimensions.
    pub fn is_valid(&self) -> bool {
        [self.min_x(), self.min_y(), self.max_x(), self.max_y()]
            .iter()
            .all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }

    /// Split into four quadrants in geohash order: `[SW, NW, SE, NE]`.
    ///
    /// The order matches the 2-bit quadrant code `x_bit << 1 | y_bit`, so child
    /// `i` of a split covers the keys starting at `parent + (i << shift)`.
    pub fn split(&self) -> [Region; 4] {
        let mid_x = (self.min_x() + self.max_x()) / 2.0;
        let mid_y = (self.min_y() + self.max_y()) / 2.0;
        [
            Region::new(self.min_x(), self.min_y(), mid_x, mid_y),
            Region::new(self.min_x(), mid_y, mid_x, self.max_y()),
            Region::new(mid_x, self.min_y(), self.max_x(), mid_y),
            Region::new(mid_x, mid_y, self.max_x(), self.max_y()),
        ]
    }

    /// Check if a point lies within this region (edges included).
    pub fn contains(&self, point: &Point<f64>) -> bool {
        point.x() >= self.min_x()
            && point.x() <= self.max_x()
            && point.y() >= self.min_y()
            && point.y() <= self.max_y()
    }

    /// Check if `other` lies entirely within this region.
    pub fn contains_region(&self, other: &Region) -> bool {
        other.min_x() >= self.min_x()
            && other.max_x() <= self.max_x()
            && other.min_y() >= self.min_y()
            && other.max_y() <= self.max_y()
    }

    /// Relation of this region to a query window.
    ///
    /// Returns `None` when the two are disjoint. Otherwise returns a bitmask of
    /// the window edges this region extends past (`RELATION_LEFT`, ...); a point
    /// of this region is inside the window iff it passes the flagged edges.
    pub fn intersect(&self, window: &Region) -> Option<u8> {
        if self.max_x() < window.min_x()
            || self.min_x() > window.max_x()
            || self.max_y() < window.min_y()
            || self.min_y() > window.max_y()
        {
            return None;
        }

        let mut relation = RELATION_INSIDE;
        if self.min_x() < window.min_x() {
            relation |= RELATION_LEFT;
        }
        if self.max_x() > window.max_x() {
            relation |= RELATION_RIGHT;
        }
        if self.min_y() < window.min_y() {
            relation |= RELATION_BOTTOM;
        }
        if self.max_y() > window.max_y() {
            relation |= RELATION_TOP;
        }
        Some(relation)
    }

    /// Check a point against only the edges flagged in `relation`.
    pub fn satisfies_edges(&self, point: &Point<f64>, relation: u8) -> bool {
        (relation & RELATION_LEFT == 0 || point.x() >= self.min_x())
            && (relation & RELATION_RIGHT == 0 || point.x() <= self.max_x())
            && (relation & RELATION_BOTTOM == 0 || point.y() >= self.min_y())
            && (relation & RELATION_TOP == 0 || point.y() <= self.max_y())
    }

    /// Squared distance from a point to the nearest point of this region.
    ///
    /// Zero when the point is inside.
    pub fn min_distance_squared(&self, point: &Point<f64>) -> f64 {
        let dx = (self.min_x() - point.x())
            .max(point.x() - self.max_x())
            .max(0.0);
        let dy = (self.min_y() - point.y())
            .max(point.y() - self.max_y())
            .max(0.0);
        dx * dx + dy * dy
    }

    /// Expand the region by `epsilon` in all directions.
    pub fn inflate(&self, epsilon: f64) -> Self {
        Self::new(
            self.min_x() - epsilon,
            self.min_y() - epsilon,
            self.max_x() + epsilon,
            self.max_y() + epsilon,
        )
    }

    /// Square window of half-size `half` centred on `center`.
    pub fn around(center: &Point<f64>, half: f64) -> Self {
        Self::new(
            center.x() - half,
            center.y() - half,
            center.x() + half,
            center.y() + half,
        )
    }
}
