//! Grid coordinates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{MapError, MapResult, MAP_HEIGHT, MAP_WIDTH};

/// A cell of the map grid. Treasures placed on the grid are named by their
/// coordinate rendered as ASCII `"row,col"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub row: u32,
    pub col: u32,
}

impl Coordinate {
    pub fn new(row: u32, col: u32) -> MapResult<Self> {
        if row as usize >= MAP_HEIGHT || col as usize >= MAP_WIDTH {
            return Err(MapError::OutOfBounds { row, col });
        }
        Ok(Self { row, col })
    }

    /// Resource name for this cell
    pub fn to_name(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a resource name back into a cell, if it names one
    #[cfg(test)]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        std::str::from_utf8(name).ok()?.parse().ok()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl FromStr for Coordinate {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s
            .split_once(',')
            .ok_or_else(|| MapError::InvalidCoordinate(format!("{:?} is not row,col", s)))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| MapError::InvalidCoordinate(format!("{:?}: {}", part, e)))
        };

        Coordinate::new(parse(row)?, parse(col)?)
    }
}
