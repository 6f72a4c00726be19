//! Tile keys in the TMS grid.

use std::fmt;

/// Identifies one image tile of the TMS pyramid.
///
/// Column 0 starts at longitude −180° and grows eastward; row 0 starts at
/// latitude −90° and grows northward.
///
/// # Example
///
/// ```
/// use globestream::tile::TileKey;
///
/// let key = TileKey::new(2, 10, 3);
/// assert_eq!(key.path(), "2/10/3.png");
/// assert_eq!(key.to_string(), "2/10/3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Pyramid level identifier
    pub level: u32,
    /// Column, eastward from −180°
    pub col: u32,
    /// Row, northward from −90°
    pub row: u32,
}

impl TileKey {
    pub fn new(level: u32, col: u32, row: u32) -> Self {
        Self { level, col, row }
    }

    /// Path of the tile image relative to the TMS server base.
    pub fn path(&self) -> String {
        format!("{}/{}/{}.png", self.level, self.col, self.row)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.col, self.row)
    }
}

/// Receives the keys a grid wants resident this frame.
pub trait TileRegistry {
    /// Marks `key` as wanted. Calling this repeatedly within one frame has no
    /// further effect.
    fn reference(&mut self, key: &TileKey);
}
