//! Camera models used for lens distortion correction.
//!
//! Coordinates come in two flavours and every method says which one it
//! consumes and produces:
//! * **pixel** coordinates `(u, v)` on the image grid;
//! * **normalized** coordinates `(x, y) = ((u - cx) / fx, (v - cy) / fy)` on the
//!   camera plane at `z = 1`.

use nalgebra::{Matrix3, Vector2};
use serde::{Deserialize, Serialize};

pub mod pinhole;
pub mod rad_tan;

pub use pinhole::PinholeModel;
pub use rad_tan::RadTanModel;

/// Focal lengths and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// The 3x3 camera matrix `K`.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Pixel -> normalized.
    pub fn normalize(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
        )
    }

    /// Normalized -> pixel.
    pub fn denormalize(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            normalized.x * self.fx + self.cx,
            normalized.y * self.fy + self.cy,
        )
    }
}

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Radial (`k1`, `k2`) and tangential (`p1`, `p2`) distortion coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl DistortionCoefficients {
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64) -> Self {
        Self { k1, k2, p1, p2 }
    }

    /// Coefficients in `[k1, k2, p1, p2]` order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.k1, self.k2, self.p1, self.p2]
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|c| *c == 0.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Forward and inverse lens distortion between ideal (pinhole) and raw images.
///
/// Implementors are shared read-only across the worker threads that build
/// resampling maps, hence the `Sync` bound.
pub trait CameraModel: Sync {
    /// Applies distortion to a normalized undistorted point and returns the
    /// distorted **pixel** coordinate in the raw image.
    fn project_normalized(&self, normalized: &Vector2<f64>) -> Vector2<f64>;

    /// Maps an undistorted **pixel** (ideal pinhole image with the same
    /// intrinsics) to the distorted **pixel** in the raw image.
    fn distort(&self, pixel: &Vector2<f64>) -> Vector2<f64>;

    /// Removes distortion from a raw **pixel** and returns the **normalized**
    /// undistorted point.
    fn undistort_normalized(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Same as [`CameraModel::undistort_normalized`] but de-normalized back to
    /// **pixel** coordinates with the model's own intrinsics.
    fn undistort(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        let normalized = self.undistort_normalized(pixel)?;
        Ok(self.get_intrinsics().denormalize(&normalized))
    }

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> DistortionCoefficients;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0)
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_distortion(
        distortion: &DistortionCoefficients,
    ) -> Result<(), CameraModelError> {
        if let Some(i) = distortion.to_array().iter().position(|c| !c.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "Distortion coefficient at index {i} is not finite"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_intrinsics() {
        let good = Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(validation::validate_intrinsics(&good).is_ok());

        let zero_fx = Intrinsics { fx: 0.0, ..good };
        assert!(matches!(
            validation::validate_intrinsics(&zero_fx),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        let nan_fy = Intrinsics { fy: f64::NAN, ..good };
        assert!(matches!(
            validation::validate_intrinsics(&nan_fy),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        let inf_cx = Intrinsics {
            cx: f64::INFINITY,
            ..good
        };
        assert!(matches!(
            validation::validate_intrinsics(&inf_cx),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_validate_distortion() {
        let ok = DistortionCoefficients::new(-0.3, 0.1, 0.001, -0.002);
        assert!(validation::validate_distortion(&ok).is_ok());

        let bad = DistortionCoefficients::new(-0.3, f64::NAN, 0.0, 0.0);
        assert!(matches!(
            validation::validate_distortion(&bad),
            Err(CameraModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_normalize_denormalize() {
        let intrinsics = Intrinsics {
            fx: 400.0,
            fy: 200.0,
            cx: 100.0,
            cy: 50.0,
        };
        let normalized = intrinsics.normalize(&Vector2::new(500.0, 250.0));
        assert_eq!(normalized, Vector2::new(1.0, 1.0));
        assert_eq!(
            intrinsics.denormalize(&normalized),
            Vector2::new(500.0, 250.0)
        );

        let k = intrinsics.camera_matrix();
        assert_eq!(k[(0, 0)], 400.0);
        assert_eq!(k[(1, 2)], 50.0);
        assert_eq!(k[(2, 2)], 1.0);
    }
}
