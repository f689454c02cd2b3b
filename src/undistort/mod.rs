//! Resampling maps and bilinear remapping.
//!
//! A [`ResamplingMap`] stores, for every destination pixel of the undistorted
//! canvas, the pixel of the raw (distorted) image to sample from. Maps are
//! filled row by row in parallel; rows are disjoint so no locking is needed.

use crate::camera::{CameraModel, CameraModelError, Resolution};
use crate::geometry::BoundingBox;
use image::{ImageBuffer, Pixel};
use log::debug;
use nalgebra::Vector2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// What to write when the mapped source coordinate lies outside the raw image.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BorderPolicy {
    /// Leave the destination pixel zeroed.
    #[default]
    Transparent,
    /// Sample the nearest edge pixel.
    Replicate,
}

/// Dense per-pixel lookup table, row-major, `height` rows of `width` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ResamplingMap {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl ResamplingMap {
    /// A zero-filled map of the given size.
    pub fn new(size: Resolution) -> Self {
        let len = size.width as usize * size.height as usize;
        ResamplingMap {
            width: size.width,
            height: size.height,
            map_x: vec![0.0; len],
            map_y: vec![0.0; len],
        }
    }

    pub fn size(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Source coordinate stored for destination pixel `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        Some((self.map_x[idx], self.map_y[idx]))
    }
}

/// Fills a map by asking `source_of` for the raw pixel of every destination pixel.
fn fill_map<F>(size: Resolution, source_of: F) -> Result<ResamplingMap, CameraModelError>
where
    F: Fn(Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> + Sync,
{
    if size.width == 0 || size.height == 0 {
        return Err(CameraModelError::InvalidParams(format!(
            "Resampling map size must be positive, got {}x{}",
            size.width, size.height
        )));
    }

    let mut map = ResamplingMap::new(size);
    let width = size.width as usize;

    map.map_x
        .par_chunks_mut(width)
        .zip(map.map_y.par_chunks_mut(width))
        .enumerate()
        .try_for_each(|(y, (row_x, row_y))| -> Result<(), CameraModelError> {
            for (x, (mx, my)) in row_x.iter_mut().zip(row_y.iter_mut()).enumerate() {
                let source = source_of(Vector2::new(x as f64, y as f64))?;
                *mx = source.x as f32;
                *my = source.y as f32;
            }
            Ok(())
        })?;

    Ok(map)
}

/// Builds the explicit per-pixel map over the undistorted bounding box.
///
/// Destination pixel `(x, y)` is the ideal pixel `(min_x + x, min_y + y)`;
/// its source is `model.distort` of that pixel. The map has the size of
/// [`BoundingBox::canvas_size`].
pub fn build_resampling_map(
    model: &dyn CameraModel,
    bbox: &BoundingBox,
) -> Result<ResamplingMap, CameraModelError> {
    let size = bbox.canvas_size();
    debug!(
        "Building {}x{} resampling map from ({}, {})",
        size.width, size.height, bbox.min_x, bbox.min_y
    );

    fill_map(size, |pixel| {
        Ok(model.distort(&Vector2::new(bbox.min_x + pixel.x, bbox.min_y + pixel.y)))
    })
}

/// Builds a rectification map from an ideal `target` camera into the raw image.
///
/// Each destination pixel is normalized with the target camera and projected
/// through the distorted `source` model. The map has the target's resolution.
pub fn build_rectification_map(
    source: &dyn CameraModel,
    target: &dyn CameraModel,
) -> Result<ResamplingMap, CameraModelError> {
    let size = target.get_resolution();
    debug!("Building {}x{} rectification map", size.width, size.height);

    fill_map(size, |pixel| {
        let normalized = target.undistort_normalized(&pixel)?;
        Ok(source.project_normalized(&normalized))
    })
}

/// Resamples `source` through `map` with bilinear interpolation.
///
/// The output has the map's size. Destination pixels whose source coordinate
/// falls outside `[0, width) x [0, height)` are handled by `border`.
pub fn remap<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    map: &ResamplingMap,
    border: BorderPolicy,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    let mut output: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(map.width, map.height);
    let channels = P::CHANNEL_COUNT as usize;
    let width = map.width as usize;
    if width == 0 || map.height == 0 || source.width() == 0 || source.height() == 0 {
        return output;
    }

    output
        .par_chunks_mut(width * channels)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let idx = y * width + x;
                let sx = map.map_x[idx] as f64;
                let sy = map.map_y[idx] as f64;
                if let Some(pixel) = sample_bilinear(source, sx, sy, border) {
                    row[x * channels..(x + 1) * channels].copy_from_slice(pixel.channels());
                }
            }
        });

    output
}

/// Bilinear sample at `(x, y)`, or `None` when the border policy leaves the
/// destination untouched.
fn sample_bilinear<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    x: f64,
    y: f64,
    border: BorderPolicy,
) -> Option<P>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;

    let (x, y) = match border {
        BorderPolicy::Transparent => {
            if !(x >= 0.0 && x < width as f64 && y >= 0.0 && y < height as f64) {
                return None;
            }
            (x, y)
        }
        BorderPolicy::Replicate => {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            (x.clamp(0.0, max_x), y.clamp(0.0, max_y))
        }
    };

    // Past the last pixel center the right/bottom neighbour is the pixel itself.
    let x = x.min(max_x);
    let y = y.min(max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let wx = x - x0 as f64;
    let wy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0).channels();
    let p10 = image.get_pixel(x1, y0).channels();
    let p01 = image.get_pixel(x0, y1).channels();
    let p11 = image.get_pixel(x1, y1).channels();

    let mut result = *image.get_pixel(x0, y0);
    for (c, value) in result.channels_mut().iter_mut().enumerate() {
        let v = p00[c] as f64 * (1.0 - wx) * (1.0 - wy)
            + p10[c] as f64 * wx * (1.0 - wy)
            + p01[c] as f64 * (1.0 - wx) * wy
            + p11[c] as f64 * wx * wy;
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(result)
}
