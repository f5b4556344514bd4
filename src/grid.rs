//! Tile Grid Geometry
//!
//! Fixed geometry for one capture session: the screen divided into square
//! tiles (ceil division, so right/bottom tiles may be partial) and tiles
//! grouped into rectangular bounding areas for scroll suppression. All
//! per-tile and per-area state elsewhere is indexed by the linear ids
//! defined here.

/// Tile coordinate in grid units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Column (0-based, left to right)
    pub bx: u32,
    /// Row (0-based, top to bottom)
    pub by: u32,
}

/// Session tile/area geometry
#[derive(Debug, Clone)]
pub struct TileGrid {
    /// Screen width in pixels
    pub width: u32,
    /// Screen height in pixels
    pub height: u32,
    /// Tile side in pixels
    pub tile_size: u32,
    /// Tiles per row
    pub tiles_x: u32,
    /// Tile rows
    pub tiles_y: u32,
    /// Bounding area width in tiles
    pub area_width: u32,
    /// Bounding area height in tiles
    pub area_height: u32,
    /// Areas per row
    pub areas_x: u32,
    /// Area rows
    pub areas_y: u32,
}

impl TileGrid {
    /// Compute the grid for a screen size and tile/area configuration
    pub fn new(
        width: u32,
        height: u32,
        tile_size: u32,
        area_width: u32,
        area_height: u32,
    ) -> Self {
        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);
        let areas_x = tiles_x.div_ceil(area_width).max(1);
        let areas_y = tiles_y.div_ceil(area_height).max(1);
        Self {
            width,
            height,
            tile_size,
            tiles_x,
            tiles_y,
            area_width,
            area_height,
            areas_x,
            areas_y,
        }
    }

    /// Total number of tiles
    #[inline]
    pub fn tile_count(&self) -> usize {
        (self.tiles_x * self.tiles_y) as usize
    }

    /// Total number of bounding areas
    #[inline]
    pub fn area_count(&self) -> usize {
        (self.areas_x * self.areas_y) as usize
    }

    /// Linear tile index for a coordinate
    #[inline]
    pub fn index(&self, bx: u32, by: u32) -> usize {
        (by * self.tiles_x + bx) as usize
    }

    /// Coordinate for a linear tile index
    #[inline]
    pub fn coord(&self, index: usize) -> TileCoord {
        TileCoord {
            bx: index as u32 % self.tiles_x,
            by: index as u32 / self.tiles_x,
        }
    }

    /// Pixel rectangle of a tile, clamped at the right/bottom edges
    pub fn tile_rect(&self, index: usize) -> (u32, u32, u32, u32) {
        let c = self.coord(index);
        let x = c.bx * self.tile_size;
        let y = c.by * self.tile_size;
        let w = self.tile_size.min(self.width.saturating_sub(x));
        let h = self.tile_size.min(self.height.saturating_sub(y));
        (x, y, w, h)
    }

    /// Actual pixel count of a tile (partial at the edges)
    #[inline]
    pub fn tile_pixels(&self, index: usize) -> u32 {
        let (_, _, w, h) = self.tile_rect(index);
        w * h
    }

    /// Bounding area a tile belongs to
    #[inline]
    pub fn area_of_tile(&self, index: usize) -> usize {
        let c = self.coord(index);
        let ax = c.bx / self.area_width;
        let ay = c.by / self.area_height;
        (ay * self.areas_x + ax) as usize
    }

    /// Actual tile count of a bounding area (edge areas may be partial)
    pub fn area_tile_count(&self, area: usize) -> u32 {
        let ax = area as u32 % self.areas_x;
        let ay = area as u32 / self.areas_x;
        let w = self
            .area_width
            .min(self.tiles_x.saturating_sub(ax * self.area_width));
        let h = self
            .area_height
            .min(self.tiles_y.saturating_sub(ay * self.area_height));
        w * h
    }

    /// Linear indices of every tile inside a bounding area
    pub fn area_tiles(&self, area: usize) -> impl Iterator<Item = usize> + '_ {
        let ax = area as u32 % self.areas_x;
        let ay = area as u32 / self.areas_x;
        let bx0 = ax * self.area_width;
        let by0 = ay * self.area_height;
        let bx1 = (bx0 + self.area_width).min(self.tiles_x);
        let by1 = (by0 + self.area_height).min(self.tiles_y);
        (by0..by1).flat_map(move |by| (bx0..bx1).map(move |bx| self.index(bx, by)))
    }
}
