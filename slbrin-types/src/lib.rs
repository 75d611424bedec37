//! # slbrin-types
//!
//! Core spatial data types for the SLBRIN learned block-range index.
//!
//! - **Region**: axis-aligned rectangle with quadrant splitting, window relations
//!   and point distances
//! - **Record**: an indexed point carrying its geohash key and payload id
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! geometric primitives.
//!
//! ## Examples
//!
//! ```rust
//! use slbrin_types::region::Region;
//! use geo::Point;
//!
//! let region = Region::new(0.0, 0.0, 2.0, 2.0);
//! let [sw, nw, se, ne] = region.split();
//! assert!(sw.contains(&Point::new(0.5, 0.5)));
//! assert!(ne.contains(&Point::new(1.5, 1.5)));
//! # let _ = (nw, se);
//! ```

pub mod point;
pub mod region;

pub use point::{PayloadId, Record};
pub use region::{
    RELATION_ALL, RELATION_BOTTOM, RELATION_INSIDE, RELATION_LEFT, RELATION_RIGHT, RELATION_TOP,
    Region,
};
