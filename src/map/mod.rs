//! Treasure map module
//!
//! Handles:
//! - Grid coordinates used as treasure names ("row,col")
//! - Parsing and verifying the aggregate map view

mod coordinate;
mod snapshot;

pub use coordinate::Coordinate;
pub use snapshot::MapSnapshot;

use thiserror::Error;

/// Number of columns in the map grid
pub const MAP_WIDTH: usize = 120;

/// Number of rows in the map grid
pub const MAP_HEIGHT: usize = 60;

/// Smallest size `check` may report for a rendered map: every row plus newline
pub const MIN_SNAPSHOT_LEN: u64 = (MAP_HEIGHT * (MAP_WIDTH + 1)) as u64;

/// Map errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MapError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Coordinate {row},{col} outside the {}x{} grid", MAP_HEIGHT, MAP_WIDTH)]
    OutOfBounds { row: u32, col: u32 },

    #[error("Map is {len} bytes, expected at least {min}")]
    TooSmall { len: u64, min: u64 },

    #[error("Map is not valid UTF-8")]
    NotUtf8,

    #[error("Map has only {0} lines")]
    TooFewLines(usize),

    #[error("Map line {line} is {width} wide, expected {}", MAP_WIDTH)]
    BadWidth { line: usize, width: usize },

    #[error("Expected a mark at {at}, found {found:?}")]
    MissingMark { at: Coordinate, found: char },

    #[error("Unexpected mark {found:?} at {at}")]
    UnexpectedMark { at: Coordinate, found: char },
}

pub type MapResult<T> = Result<T, MapError>;

/// Reject a reported map size too small to hold the full grid
pub fn check_snapshot_len(len: u64) -> MapResult<()> {
    if len < MIN_SNAPSHOT_LEN {
        return Err(MapError::TooSmall {
            len,
            min: MIN_SNAPSHOT_LEN,
        });
    }
    Ok(())
}
