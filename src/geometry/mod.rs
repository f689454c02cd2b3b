//! Extent of the undistorted image.
//!
//! [`compute_undistorted_boundary`] sizes the output canvas of the explicit
//! per-pixel strategy; [`optimal_new_intrinsics`] derives the ideal camera of
//! the rectification strategy.

use crate::camera::{CameraModel, CameraModelError, Intrinsics, Resolution};
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Grid density used when searching the outer rectangle of the undistorted image.
const OUTER_RECT_GRID: usize = 9;

/// Axis-aligned box in pixel coordinates of the undistorted image plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Min/max reduction over `points`. Returns `None` for an empty slice.
    pub fn from_points(points: &[Vector2<f64>]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let init = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        Some(points.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    /// Integer canvas enclosing the box.
    ///
    /// `width = trunc(max_x + 0.5) - trunc(min_x - 0.5)`, likewise for the
    /// height, with truncation toward zero. Each side is at least one pixel.
    pub fn canvas_size(&self) -> Resolution {
        let side = |min: f64, max: f64| {
            let extent = (max + 0.5) as i64 - (min - 0.5) as i64;
            u32::try_from(extent.max(1)).unwrap_or(u32::MAX)
        };
        Resolution {
            width: side(self.min_x, self.max_x),
            height: side(self.min_y, self.max_y),
        }
    }
}

/// The four raw image corners: top-left, top-right, bottom-right, bottom-left.
pub fn image_corners(resolution: &Resolution) -> [Vector2<f64>; 4] {
    let right = resolution.width as f64 - 1.0;
    let bottom = resolution.height as f64 - 1.0;
    [
        Vector2::new(0.0, 0.0),
        Vector2::new(right, 0.0),
        Vector2::new(right, bottom),
        Vector2::new(0.0, bottom),
    ]
}

/// Computes where the raw image corners land once distortion is removed and
/// the bounding box of those four points.
///
/// Corners are undistorted to normalized coordinates and de-normalized with
/// the model's own intrinsics, so the result lives on the ideal image plane
/// of the same camera. Only the corners are sampled; this assumes they stay
/// the extrema after undistortion, which holds for mild barrel and pincushion
/// distortion.
///
/// # Returns
///
/// The bounding box and the de-normalized corners in
/// [`image_corners`] order.
///
/// # Errors
///
/// * [`CameraModelError::InvalidParams`] for an empty resolution.
/// * Any error from [`CameraModel::undistort_normalized`].
pub fn compute_undistorted_boundary(
    resolution: &Resolution,
    model: &dyn CameraModel,
) -> Result<(BoundingBox, [Vector2<f64>; 4]), CameraModelError> {
    if resolution.width == 0 || resolution.height == 0 {
        return Err(CameraModelError::InvalidParams(format!(
            "Image size must be positive, got {}x{}",
            resolution.width, resolution.height
        )));
    }

    let intrinsics = model.get_intrinsics();
    let mut corners = image_corners(resolution);
    for corner in corners.iter_mut() {
        let normalized = model.undistort_normalized(corner)?;
        *corner = intrinsics.denormalize(&normalized);
    }

    let bbox = BoundingBox::from_points(&corners).ok_or_else(|| {
        CameraModelError::NumericalError("No corners to bound".to_string())
    })?;
    debug!("Undistorted corners: {:?} -> {:?}", corners, bbox);

    Ok((bbox, corners))
}

/// Generates an `n x n` grid spanning the image from border to border.
///
/// # Arguments
///
/// * `resolution` - The raw image size
/// * `n` - Points per axis, at least 2
pub fn border_grid(resolution: &Resolution, n: usize) -> Vec<Vector2<f64>> {
    let n = n.max(2);
    let step_x = (resolution.width as f64 - 1.0) / (n - 1) as f64;
    let step_y = (resolution.height as f64 - 1.0) / (n - 1) as f64;

    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            points.push(Vector2::new(j as f64 * step_x, i as f64 * step_y));
        }
    }
    points
}

/// Derives intrinsics of an ideal camera whose `new_size` canvas holds every
/// undistorted source pixel.
///
/// The undistorted outer rectangle `(x0, y0, w, h)` of a border-to-border grid
/// is found in normalized coordinates, then
/// `fx = (W - 1) / w`, `fy = (H - 1) / h`, `cx = -fx * x0`, `cy = -fy * y0`.
///
/// # Errors
///
/// * [`CameraModelError::InvalidParams`] for empty sizes.
/// * [`CameraModelError::NumericalError`] if the outer rectangle is degenerate.
/// * Any error from [`CameraModel::undistort_normalized`].
pub fn optimal_new_intrinsics(
    model: &dyn CameraModel,
    new_size: &Resolution,
) -> Result<Intrinsics, CameraModelError> {
    let resolution = model.get_resolution();
    if resolution.width == 0 || resolution.height == 0 {
        return Err(CameraModelError::InvalidParams(
            "Camera resolution must be set before deriving new intrinsics".to_string(),
        ));
    }
    if new_size.width == 0 || new_size.height == 0 {
        return Err(CameraModelError::InvalidParams(format!(
            "Target size must be positive, got {}x{}",
            new_size.width, new_size.height
        )));
    }

    let undistorted = border_grid(&resolution, OUTER_RECT_GRID)
        .iter()
        .map(|p| model.undistort_normalized(p))
        .collect::<Result<Vec<_>, _>>()?;
    let outer = BoundingBox::from_points(&undistorted)
        .filter(|b| b.width() > 0.0 && b.height() > 0.0)
        .ok_or_else(|| {
            CameraModelError::NumericalError("Degenerate undistorted outer rectangle".to_string())
        })?;

    // Pixel centers of the first and last column map onto the rectangle edges.
    let fx = (new_size.width as f64 - 1.0).max(1.0) / outer.width();
    let fy = (new_size.height as f64 - 1.0).max(1.0) / outer.height();
    let intrinsics = Intrinsics {
        fx,
        fy,
        cx: -fx * outer.min_x,
        cy: -fy * outer.min_y,
    };
    debug!("Optimal new intrinsics: {:?}", intrinsics);

    Ok(intrinsics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{DistortionCoefficients, RadTanModel};
    use approx::assert_relative_eq;

    fn reference_model() -> RadTanModel {
        RadTanModel::new(
            Intrinsics {
                fx: 1738.06409,
                fy: 1736.96128,
                cx: 965.222,
                cy: 666.6185,
            },
            DistortionCoefficients::new(-0.34592, 0.16969, -0.00279, 0.00235),
        )
        .unwrap()
        .with_resolution(Resolution {
            width: 1920,
            height: 1080,
        })
    }

    #[test]
    fn test_bounding_box_from_points() {
        let points = [
            Vector2::new(1.0, -2.0),
            Vector2::new(-3.0, 4.0),
            Vector2::new(2.5, 0.5),
        ];
        let bbox = BoundingBox::from_points(&points).unwrap();
        assert_eq!(bbox.min_x, -3.0);
        assert_eq!(bbox.min_y, -2.0);
        assert_eq!(bbox.max_x, 2.5);
        assert_eq!(bbox.max_y, 4.0);
        assert!(BoundingBox::from_points(&[]).is_none());
    }

    #[test]
    fn test_canvas_size_truncates_toward_zero() {
        let bbox = BoundingBox {
            min_x: -175.55,
            min_y: -115.52,
            max_x: 2073.53,
            max_y: 1144.93,
        };
        // trunc(2074.03) - trunc(-176.05) = 2074 + 176
        assert_eq!(
            bbox.canvas_size(),
            Resolution {
                width: 2250,
                height: 1261
            }
        );

        let point = BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        };
        assert_eq!(
            point.canvas_size(),
            Resolution {
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn test_boundary_reference_camera() {
        let model = reference_model();
        let resolution = model.resolution;

        let (bbox, corners) = compute_undistorted_boundary(&resolution, &model).unwrap();

        assert_relative_eq!(bbox.min_x, -175.5502577, epsilon = 1e-4);
        assert_relative_eq!(bbox.min_y, -115.5160586, epsilon = 1e-4);
        assert_relative_eq!(bbox.max_x, 2073.5332095, epsilon = 1e-4);
        assert_relative_eq!(bbox.max_y, 1144.9311707, epsilon = 1e-4);
        assert_eq!(
            bbox.canvas_size(),
            Resolution {
                width: 2250,
                height: 1261
            }
        );

        // Bottom-right corner.
        assert_relative_eq!(corners[2].x, 2049.9447810, epsilon = 1e-4);
        assert_relative_eq!(corners[2].y, 1139.1084671, epsilon = 1e-4);
    }

    #[test]
    fn test_boundary_is_reproducible() {
        let model = reference_model();
        let resolution = model.resolution;

        let (first, first_corners) = compute_undistorted_boundary(&resolution, &model).unwrap();
        let (second, second_corners) = compute_undistorted_boundary(&resolution, &model).unwrap();

        assert_eq!(first.min_x.to_bits(), second.min_x.to_bits());
        assert_eq!(first.min_y.to_bits(), second.min_y.to_bits());
        assert_eq!(first.max_x.to_bits(), second.max_x.to_bits());
        assert_eq!(first.max_y.to_bits(), second.max_y.to_bits());
        assert_eq!(first_corners, second_corners);
        assert_eq!(first.canvas_size(), second.canvas_size());
    }

    #[test]
    fn test_boundary_small_barrel_image_expands() {
        let model = RadTanModel::new(
            Intrinsics {
                fx: 2.0,
                fy: 2.0,
                cx: 1.5,
                cy: 1.5,
            },
            DistortionCoefficients::new(-0.2, 0.05, 0.0, 0.0),
        )
        .unwrap();
        let resolution = Resolution {
            width: 4,
            height: 4,
        };

        let (bbox, _) = compute_undistorted_boundary(&resolution, &model).unwrap();

        assert!(bbox.contains(&Vector2::new(1.5, 1.5)));
        assert!(bbox.width() > 3.0);
        assert!(bbox.height() > 3.0);
        assert_relative_eq!(bbox.min_x, -0.3673178, epsilon = 1e-5);
        assert_relative_eq!(bbox.max_x, 3.3673178, epsilon = 1e-5);
    }

    #[test]
    fn test_boundary_without_distortion_is_the_image() {
        let model = RadTanModel::new(
            reference_model().intrinsics,
            DistortionCoefficients::default(),
        )
        .unwrap();
        let resolution = Resolution {
            width: 640,
            height: 480,
        };

        let (bbox, _) = compute_undistorted_boundary(&resolution, &model).unwrap();

        assert_relative_eq!(bbox.min_x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.min_y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.max_x, 639.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.max_y, 479.0, epsilon = 1e-9);
    }

    #[test]
    fn test_boundary_rejects_empty_image() {
        let model = reference_model();
        let result = compute_undistorted_boundary(
            &Resolution {
                width: 0,
                height: 10,
            },
            &model,
        );
        assert!(matches!(result, Err(CameraModelError::InvalidParams(_))));
    }

    #[test]
    fn test_border_grid() {
        let resolution = Resolution {
            width: 801,
            height: 601,
        };
        let points = border_grid(&resolution, 9);

        assert_eq!(points.len(), 81);
        assert_eq!(points[0], Vector2::new(0.0, 0.0));
        assert_eq!(points[80], Vector2::new(800.0, 600.0));
        for point in &points {
            assert!(point.x >= 0.0 && point.x <= 800.0);
            assert!(point.y >= 0.0 && point.y <= 600.0);
        }
    }

    #[test]
    fn test_optimal_new_intrinsics_keeps_all_source_pixels() {
        let model = reference_model();
        let (bbox, _) = compute_undistorted_boundary(&model.resolution, &model).unwrap();
        let new_size = bbox.canvas_size();

        let new_intrinsics = optimal_new_intrinsics(&model, &new_size).unwrap();
        assert!(new_intrinsics.fx > 0.0 && new_intrinsics.fy > 0.0);

        for corner in image_corners(&model.resolution) {
            let normalized = model.undistort_normalized(&corner).unwrap();
            let pixel = new_intrinsics.denormalize(&normalized);
            assert!(pixel.x >= -1e-6 && pixel.x <= new_size.width as f64 - 1.0 + 1e-6);
            assert!(pixel.y >= -1e-6 && pixel.y <= new_size.height as f64 - 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_optimal_new_intrinsics_requires_resolution() {
        let model = RadTanModel::new(
            reference_model().intrinsics,
            DistortionCoefficients::default(),
        )
        .unwrap();
        let result = optimal_new_intrinsics(
            &model,
            &Resolution {
                width: 100,
                height: 100,
            },
        );
        assert!(matches!(result, Err(CameraModelError::InvalidParams(_))));
    }
}
