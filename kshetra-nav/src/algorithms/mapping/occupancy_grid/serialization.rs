//! Map file serialization for occupancy grids.
//!
//! Layout, all little-endian:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "KSMP"
//! 4       4     version (u32)
//! 8       4     width (u32)
//! 12      4     height (u32)
//! 16      4     resolution (f32)
//! 20      4     origin_x (f32)
//! 24      4     origin_y (f32)
//! 28      4·N   cells (f32 log-odds, row-major)
//! end-4   4     CRC-32 of everything before it
//! ```

use std::fs;
use std::path::Path;

use super::OccupancyGrid;
use super::config::OccupancyGridConfig;
use crate::core::checksum::crc32;
use crate::core::persist::write_atomic;
use crate::error::{NavError, Result};

const MAP_MAGIC: &[u8; 4] = b"KSMP";
const MAP_VERSION: u32 = 1;
const HEADER_LEN: usize = 28;
const TRAILER_LEN: usize = 4;

/// Save map to a binary file, through a temporary file and rename.
pub fn save(grid: &OccupancyGrid, path: &Path) -> Result<()> {
    let cells = grid.cells();
    let mut buf = Vec::with_capacity(HEADER_LEN + cells.len() * 4 + TRAILER_LEN);

    buf.extend_from_slice(MAP_MAGIC);
    buf.extend_from_slice(&MAP_VERSION.to_le_bytes());
    buf.extend_from_slice(&(grid.width() as u32).to_le_bytes());
    buf.extend_from_slice(&(grid.height() as u32).to_le_bytes());
    buf.extend_from_slice(&grid.resolution().to_le_bytes());
    buf.extend_from_slice(&grid.origin().0.to_le_bytes());
    buf.extend_from_slice(&grid.origin().1.to_le_bytes());
    for cell in cells {
        buf.extend_from_slice(&cell.to_le_bytes());
    }
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    write_atomic(path, &buf)?;
    Ok(())
}

/// Load map from a binary file.
///
/// Resolution and extent come from the file; the rest of `config` is kept.
pub fn load(path: &Path, config: OccupancyGridConfig) -> Result<OccupancyGrid> {
    let bytes = fs::read(path)?;
    decode(&bytes, config)
}

fn decode(bytes: &[u8], mut config: OccupancyGridConfig) -> Result<OccupancyGrid> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(corrupt(format!("file too short ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != MAP_MAGIC {
        return Err(corrupt("invalid magic"));
    }

    let version = read_u32(bytes, 4);
    if version != MAP_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }

    let width = read_u32(bytes, 8) as usize;
    let height = read_u32(bytes, 12) as usize;
    let resolution = read_f32(bytes, 16);
    let origin_x = read_f32(bytes, 20);
    let origin_y = read_f32(bytes, 24);

    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .map(|n| n + HEADER_LEN + TRAILER_LEN);
    if expected != Some(bytes.len()) {
        return Err(corrupt(format!(
            "size mismatch: {}x{} cells in {} bytes",
            width,
            height,
            bytes.len()
        )));
    }

    let body_end = bytes.len() - TRAILER_LEN;
    let stored = read_u32(bytes, body_end);
    let actual = crc32(&bytes[..body_end]);
    if stored != actual {
        return Err(corrupt(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored, actual
        )));
    }

    if !(resolution.is_finite() && resolution > 0.0) || !origin_x.is_finite() || !origin_y.is_finite()
    {
        return Err(corrupt("invalid geometry"));
    }

    let cells: Vec<f32> = bytes[HEADER_LEN..body_end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if cells.iter().any(|c| !c.is_finite()) {
        return Err(corrupt("non-finite cell"));
    }

    config.resolution = resolution;
    config.width_m = width as f32 * resolution;
    config.height_m = height as f32 * resolution;

    Ok(OccupancyGrid::from_raw(
        config, cells, width, height, origin_x, origin_y,
    ))
}

fn corrupt(reason: impl Into<String>) -> NavError {
    NavError::MapCorruption(reason.into())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_bits(read_u32(bytes, at))
}
