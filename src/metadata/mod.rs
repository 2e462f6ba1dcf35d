//! Link/site reference data and its process-lifetime resolver cache

mod resolver;

pub use resolver::{MetadataResolver, ResolutionStats};

use std::fmt;

/// One end of a microwave link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Side::A),
            "B" => Some(Side::B),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference record for one link end, keyed by the device IP.
///
/// Sourced from the relational store and treated as slowly-changing data:
/// once cached, a record is kept for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkMetadata {
    pub link_id: i64,
    /// Numeric technology code as stored in the links table; fed straight
    /// into the model's feature vector.
    pub technology: i64,
    pub ip: String,
    pub side: Side,
    pub site_id: i64,
    pub azimuth: f64,
    pub longitude: f64,
    pub latitude: f64,
}
