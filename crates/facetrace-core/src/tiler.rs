//! Split oversized images into a grid of tiles the detector can digest.
//!
//! Each axis is halved until it fits the maximum tile extent; the number of
//! halvings `div` then yields `2 * div` tiles along that axis. For `div >= 3`
//! (or odd extents) the grid does not reach the far edges of the image; the
//! uncovered extent is reported on the [`TileGrid`] so callers can log it.

use crate::types::Image;

/// A rectangular copy of part of an image, with its position in the source.
#[derive(Debug, Clone)]
pub struct Tile {
    pub image: Image,
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Tiles in row-major order (left to right, then top to bottom).
#[derive(Debug, Clone)]
pub struct TileGrid {
    pub tiles: Vec<Tile>,
    pub rows: u32,
    pub cols: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Source rows below the last tile row that no tile covers.
    pub uncovered_rows: u32,
    /// Source columns right of the last tile column that no tile covers.
    pub uncovered_cols: u32,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// True when the grid covers every pixel of the source image.
    pub fn is_lossless(&self) -> bool {
        self.uncovered_rows == 0 && self.uncovered_cols == 0
    }
}

/// Number of halvings needed to bring `extent` within `max`, and the result.
fn halve_until_fits(mut extent: u32, max: u32) -> (u32, u32) {
    let mut divisions = 0;
    while extent > max {
        divisions += 1;
        extent /= 2;
    }
    (divisions, extent)
}

/// Round down to an even value; a 1-pixel extent stays 1.
fn round_down_even(extent: u32) -> u32 {
    if extent >= 2 {
        extent - extent % 2
    } else {
        extent
    }
}

/// Split `image` into tiles no larger than `max_tile_height x max_tile_width`.
///
/// `max_tile_*` must be at least 2 (see `PipelineConfig::validate`).
pub fn split(image: &Image, max_tile_height: u32, max_tile_width: u32) -> TileGrid {
    let (div_h, height) = halve_until_fits(image.height, max_tile_height);
    let (div_w, width) = halve_until_fits(image.width, max_tile_width);

    if div_h == 0 && div_w == 0 {
        return TileGrid {
            tiles: vec![Tile {
                image: image.clone(),
                x_offset: 0,
                y_offset: 0,
            }],
            rows: 1,
            cols: 1,
            tile_width: image.width,
            tile_height: image.height,
            uncovered_rows: 0,
            uncovered_cols: 0,
        };
    }

    let tile_height = round_down_even(height);
    let tile_width = round_down_even(width);
    let rows = (2 * div_h).max(1);
    let cols = (2 * div_w).max(1);

    let mut tiles = Vec::with_capacity((rows * cols) as usize);
    let mut y = 0;
    for _ in 0..rows {
        let mut x = 0;
        for _ in 0..cols {
            tiles.push(Tile {
                image: image.crop(x, y, tile_width, tile_height),
                x_offset: x,
                y_offset: y,
            });
            x += tile_width;
        }
        y += tile_height;
    }

    TileGrid {
        tiles,
        rows,
        cols,
        tile_width,
        tile_height,
        uncovered_rows: image.height - rows * tile_height,
        uncovered_cols: image.width - cols * tile_width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelLayout;

    fn gray(width: u32, height: u32) -> Image {
        Image::blank(width, height, PixelLayout::Gray)
    }

    #[test]
    fn test_small_image_single_tile() {
        let img = gray(1999, 2000);
        let grid = split(&img, 2000, 2000);
        assert_eq!(grid.len(), 1);
        let t = &grid.tiles[0];
        assert_eq!((t.x_offset, t.y_offset), (0, 0));
        assert_eq!((t.image.width, t.image.height), (1999, 2000));
        assert!(grid.is_lossless());
    }

    #[test]
    fn test_both_axes_one_halving() {
        let img = gray(3000, 2400);
        let grid = split(&img, 2000, 2000);
        assert_eq!((grid.rows, grid.cols), (2, 2));
        assert_eq!(grid.len(), 4);
        assert_eq!((grid.tile_width, grid.tile_height), (1500, 1200));

        let offsets: Vec<_> = grid.tiles.iter().map(|t| (t.x_offset, t.y_offset)).collect();
        assert_eq!(offsets, vec![(0, 0), (1500, 0), (0, 1200), (1500, 1200)]);
        assert!(grid.is_lossless());
    }

    #[test]
    fn test_height_only_gives_single_column() {
        let img = gray(1001, 4100);
        let grid = split(&img, 2000, 2000);
        // 4100 -> 2050 -> 1025: two halvings, four tiles; 1025 rounds to 1024
        assert_eq!((grid.rows, grid.cols), (4, 1));
        assert_eq!(grid.tile_height, 1024);
        // width is not halved but still rounded down to even
        assert_eq!(grid.tile_width, 1000);
        for (i, t) in grid.tiles.iter().enumerate() {
            assert_eq!(t.x_offset, 0);
            assert_eq!(t.y_offset, i as u32 * 1024);
        }
        assert_eq!(grid.uncovered_rows, 4100 - 4 * 1024);
        assert_eq!(grid.uncovered_cols, 1);
    }

    #[test]
    fn test_width_only_gives_single_row() {
        let img = gray(4000, 800);
        let grid = split(&img, 2000, 2000);
        assert_eq!((grid.rows, grid.cols), (1, 2));
        let offsets: Vec<_> = grid.tiles.iter().map(|t| (t.x_offset, t.y_offset)).collect();
        assert_eq!(offsets, vec![(0, 0), (2000, 0)]);
    }

    #[test]
    fn test_grid_shape_matches_division_count() {
        // 17000 needs 4 halvings (-> 1062), 5000 needs 2 (-> 1250)
        let img = gray(17000, 5000);
        let grid = split(&img, 2000, 2000);
        assert_eq!(grid.cols, 8);
        assert_eq!(grid.rows, 4);
        assert_eq!(grid.len(), 32);
        // 8 * 1062 leaves most of the width uncovered
        assert!(!grid.is_lossless());
        assert_eq!(grid.uncovered_cols, 17000 - 8 * 1062);
    }

    #[test]
    fn test_offsets_strictly_increase_without_overlap() {
        let img = gray(9000, 6000);
        let grid = split(&img, 2000, 2000);
        for pair in grid.tiles.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.y_offset == b.y_offset {
                assert_eq!(b.x_offset, a.x_offset + grid.tile_width);
            } else {
                assert_eq!(b.y_offset, a.y_offset + grid.tile_height);
                assert_eq!(b.x_offset, 0);
            }
        }
        for t in &grid.tiles {
            assert!(t.x_offset + t.image.width <= img.width);
            assert!(t.y_offset + t.image.height <= img.height);
            assert_eq!((t.image.width, t.image.height), (grid.tile_width, grid.tile_height));
        }
    }

    #[test]
    fn test_deterministic() {
        let img = gray(5000, 4500);
        let a = split(&img, 2000, 2000);
        let b = split(&img, 2000, 2000);
        let key = |g: &TileGrid| g.tiles.iter().map(|t| (t.x_offset, t.y_offset)).collect::<Vec<_>>();
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn test_tile_content_matches_source() {
        let mut img = gray(8, 6);
        for (i, p) in img.data.iter_mut().enumerate() {
            *p = i as u8;
        }
        let grid = split(&img, 4, 4);
        assert_eq!(grid.len(), 4);
        // 6 rows halve to 3, rounded down to 2
        assert_eq!(grid.tile_height, 2);
        assert_eq!(grid.uncovered_rows, 2);
        let t = &grid.tiles[3];
        assert_eq!((t.x_offset, t.y_offset), (4, 2));
        // first pixel of the bottom-right tile is source (4, 2)
        assert_eq!(t.image.data[0], (2 * 8 + 4) as u8);
    }

    #[test]
    fn test_empty_image_does_not_panic() {
        let grid = split(&gray(0, 0), 2000, 2000);
        assert_eq!(grid.len(), 1);
    }
}
