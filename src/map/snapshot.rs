//! Aggregate map view

use super::{Coordinate, MapError, MapResult, MAP_HEIGHT, MAP_WIDTH};

/// Cells that carry no treasure
const BACKGROUND: [char; 2] = ['#', '~'];

/// The rendered map as returned by retrieving the aggregate resource
#[derive(Debug, Clone)]
pub struct MapSnapshot {
    rows: Vec<Vec<char>>,
}

impl MapSnapshot {
    /// Parse retrieved map bytes.
    ///
    /// Surrounding whitespace and zero padding are ignored. At least
    /// `MAP_HEIGHT` lines are required and the first `MAP_HEIGHT` of them
    /// must be exactly `MAP_WIDTH` characters wide.
    pub fn parse(data: &[u8]) -> MapResult<Self> {
        let text = std::str::from_utf8(data).map_err(|_| MapError::NotUtf8)?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < MAP_HEIGHT {
            return Err(MapError::TooFewLines(lines.len()));
        }

        let mut rows = Vec::with_capacity(MAP_HEIGHT);
        for (line, text) in lines.iter().take(MAP_HEIGHT).enumerate() {
            let row: Vec<char> = text.chars().collect();
            if row.len() != MAP_WIDTH {
                return Err(MapError::BadWidth {
                    line,
                    width: row.len(),
                });
            }
            rows.push(row);
        }

        Ok(Self { rows })
    }

    pub fn cell(&self, at: Coordinate) -> Option<char> {
        self.rows
            .get(at.row as usize)
            .and_then(|row| row.get(at.col as usize))
            .copied()
    }

    /// Every non-background cell, in row-major order
    pub fn marks(&self) -> Vec<(Coordinate, char)> {
        let mut marks = Vec::new();
        for (row, cells) in self.rows.iter().enumerate() {
            for (col, &c) in cells.iter().enumerate() {
                if !BACKGROUND.contains(&c) {
                    marks.push((
                        Coordinate {
                            row: row as u32,
                            col: col as u32,
                        },
                        c,
                    ));
                }
            }
        }
        marks
    }

    /// Require a mark at `expected` and background everywhere else.
    /// Returns the mark character.
    pub fn verify_single_mark(&self, expected: Coordinate) -> MapResult<char> {
        let found = self.cell(expected).ok_or(MapError::OutOfBounds {
            row: expected.row,
            col: expected.col,
        })?;
        if BACKGROUND.contains(&found) {
            return Err(MapError::MissingMark {
                at: expected,
                found,
            });
        }

        if let Some((at, c)) = self.marks().into_iter().find(|(at, _)| *at != expected) {
            return Err(MapError::UnexpectedMark { at, found: c });
        }

        Ok(found)
    }
}
