//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This module provides the [`RadTanModel`] struct, the plumb-bob
//! (Brown-Conrady) model with two radial terms (`k1`, `k2`) and two tangential
//! terms (`p1`, `p2`). It adheres to the [`CameraModel`] trait defined in the
//! parent `camera` module ([`crate::camera`]).
//!
//! Forward distortion is closed form. The inverse has no closed form and is
//! solved per point with Newton's method.

use crate::camera::{
    validation, CameraModel, CameraModelError, DistortionCoefficients, Intrinsics, Resolution,
};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::{fmt, fs};
use yaml_rust::YamlLoader;

/// Convergence threshold for the inverse, in normalized units.
const UNDISTORT_EPS: f64 = 1e-10;
const UNDISTORT_MAX_ITERATIONS: u32 = 100;

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// # Examples
///
/// ```rust
/// use lens_undistort::camera::rad_tan::RadTanModel;
/// use lens_undistort::camera::{DistortionCoefficients, Intrinsics, Resolution};
///
/// let intrinsics = Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 };
/// let distortion = DistortionCoefficients::new(-0.28, 0.07, 0.0002, 0.00002);
/// let model = RadTanModel::new(intrinsics, distortion)
///     .unwrap()
///     .with_resolution(Resolution { width: 640, height: 480 });
///
/// assert_eq!(model.intrinsics.fx, 500.0);
/// assert_eq!(model.distortion.k1, -0.28);
/// assert_eq!(model.resolution.width, 640);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the raw image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// The distortion coefficients `k1, k2, p1, p2`.
    pub distortion: DistortionCoefficients,
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`].
    ///
    /// The resolution is initialized to 0x0 and is usually filled in from the
    /// decoded image with [`RadTanModel::with_resolution`].
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidParams`] if a coefficient is not finite.
    pub fn new(
        intrinsics: Intrinsics,
        distortion: DistortionCoefficients,
    ) -> Result<Self, CameraModelError> {
        let model = RadTanModel {
            intrinsics,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortion,
        };

        model.validate_params()?;
        Ok(model)
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Applies the distortion polynomial to a normalized point.
    fn apply_distortion(&self, x: f64, y: f64) -> (f64, f64) {
        let DistortionCoefficients { k1, k2, p1, p2 } = self.distortion;

        let r2 = x * x + y * y;
        let kcoef = 1.0 + k1 * r2 + k2 * r2 * r2;

        let x_distorted = x * kcoef + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_distorted = y * kcoef + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        (x_distorted, y_distorted)
    }

    /// Rejects a Newton root on the far side of the radial fold, where
    /// `1 + k1 r^2 + k2 r^4 <= 0` mirrors the point through the principal point.
    fn reject_folded_root(
        &self,
        point: Vector2<f64>,
        pixel: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        let DistortionCoefficients { k1, k2, .. } = self.distortion;
        let r2 = point.norm_squared();
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        if radial > 0.0 {
            Ok(point)
        } else {
            Err(CameraModelError::NumericalError(format!(
                "Undistortion of ({}, {}) converged past the radial fold (factor {radial})",
                pixel.x, pixel.y
            )))
        }
    }
}

/// Provides a debug string representation for [`RadTanModel`].
impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortion: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortion.to_array(),
        )
    }
}

/// On-disk layout written by [`RadTanModel::save_to_yaml`].
#[derive(Serialize)]
struct CameraFile {
    cam0: CameraEntry,
}

#[derive(Serialize)]
struct CameraEntry {
    camera_model: &'static str,
    intrinsics: [f64; 4],
    distortion: [f64; 4],
    resolution: [u32; 2],
}

impl CameraModel for RadTanModel {
    fn project_normalized(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let (x_distorted, y_distorted) = self.apply_distortion(normalized.x, normalized.y);
        self.intrinsics
            .denormalize(&Vector2::new(x_distorted, y_distorted))
    }

    /// Forward distortion of an ideal pixel.
    ///
    /// The result is formed as the input pixel plus the distortion
    /// displacement scaled back to pixels, `u + fx * (x' - x)`. This equals
    /// `fx * x' + cx` but returns the input bit-for-bit when the coefficients
    /// are zero.
    fn distort(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let Intrinsics { fx, fy, .. } = self.intrinsics;
        let normalized = self.intrinsics.normalize(pixel);
        let (x_distorted, y_distorted) = self.apply_distortion(normalized.x, normalized.y);

        Vector2::new(
            pixel.x + (x_distorted - normalized.x) * fx,
            pixel.y + (y_distorted - normalized.y) * fy,
        )
    }

    /// Solves `distort(p) = target` for the normalized point `p` with Newton
    /// iterations, starting from the distorted normalized point.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::NumericalError`] if the Jacobian becomes singular,
    ///   the iteration does not converge, or it converges to a folded root.
    fn undistort_normalized(
        &self,
        pixel: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        let DistortionCoefficients { k1, k2, p1, p2 } = self.distortion;

        let target = self.intrinsics.normalize(pixel);
        let mut point = target;

        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2;

            let (x_estimate, y_estimate) = self.apply_distortion(x, y);
            let error = Vector2::new(x_estimate, y_estimate) - target;
            if error.norm() < UNDISTORT_EPS {
                return self.reject_folded_root(point, pixel);
            }

            // d(radial)/dx = (k1 + 2 k2 r2) * 2x, same for y
            let dr_dx = 2.0 * x;
            let dr_dy = 2.0 * y;
            let d_radial = k1 + 2.0 * k2 * r2;
            let d_radial_dx = d_radial * dr_dx;
            let d_radial_dy = d_radial * dr_dy;

            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + p2 * (dr_dx + 4.0 * x);
            let j01 = x * d_radial_dy + 2.0 * p1 * x + p2 * dr_dy;
            let j10 = y * d_radial_dx + p1 * dr_dx + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + p1 * (dr_dy + 4.0 * y) + 2.0 * p2 * x;
            let jacobian = Matrix2::new(j00, j01, j10, j11);

            let inv_jacobian = jacobian.try_inverse().ok_or_else(|| {
                CameraModelError::NumericalError(format!(
                    "Jacobian is singular while undistorting ({}, {})",
                    pixel.x, pixel.y
                ))
            })?;

            let delta = inv_jacobian * error;
            point -= delta;

            if delta.norm() < UNDISTORT_EPS {
                return self.reject_folded_root(point, pixel);
            }
        }

        Err(CameraModelError::NumericalError(format!(
            "Undistortion of ({}, {}) did not converge after {} iterations",
            pixel.x, pixel.y, UNDISTORT_MAX_ITERATIONS
        )))
    }

    /// Loads RadTan camera parameters from a Kalibr-style YAML file.
    ///
    /// Expected layout:
    ///
    /// ```yaml
    /// cam0:
    ///   camera_model: rad_tan
    ///   intrinsics: [fx, fy, cx, cy]
    ///   distortion: [k1, k2, p1, p2]
    ///   resolution: [width, height]   # optional
    /// ```
    ///
    /// A fifth distortion entry (`k3`) is accepted only when it is zero.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`]: If there's an issue reading the file.
    /// * [`CameraModelError::YamlError`]: If the YAML content is malformed.
    /// * [`CameraModelError::InvalidParams`]: If expected fields are missing or
    ///   of the wrong type or count.
    /// * Errors from `validate_params`.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }

        let doc = &docs[0];

        let intrinsics_yaml = doc["cam0"]["intrinsics"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid intrinsics".to_string()))?;
        if intrinsics_yaml.len() != 4 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 4 intrinsic parameters in YAML, found {}",
                intrinsics_yaml.len()
            )));
        }

        let distortion_node = doc["cam0"]["distortion"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("Missing distortion parameters".to_string())
        })?;

        let mut values = [0.0; 4];
        for (i, param) in intrinsics_yaml.iter().enumerate() {
            values[i] = yaml_number(param).ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid intrinsic parameter at index {i}"))
            })?;
        }
        let intrinsics = Intrinsics {
            fx: values[0],
            fy: values[1],
            cx: values[2],
            cy: values[3],
        };

        let mut coefficients = Vec::with_capacity(distortion_node.len());
        for (i, param) in distortion_node.iter().enumerate() {
            coefficients.push(yaml_number(param).ok_or_else(|| {
                CameraModelError::InvalidParams(format!(
                    "Invalid distortion parameter at index {i}"
                ))
            })?);
        }
        match coefficients.len() {
            4 => {}
            5 if coefficients[4] == 0.0 => {}
            5 => {
                return Err(CameraModelError::InvalidParams(
                    "k3 radial distortion is not supported".to_string(),
                ))
            }
            n => {
                return Err(CameraModelError::InvalidParams(format!(
                    "Expected 4 distortion parameters in YAML, found {n}"
                )))
            }
        }
        let distortion = DistortionCoefficients::new(
            coefficients[0],
            coefficients[1],
            coefficients[2],
            coefficients[3],
        );

        let resolution = match doc["cam0"]["resolution"].as_vec() {
            Some(resolution_yaml) if resolution_yaml.len() == 2 => Resolution {
                width: yaml_dimension(&resolution_yaml[0])
                    .ok_or_else(|| CameraModelError::InvalidParams("Invalid width".to_string()))?,
                height: yaml_dimension(&resolution_yaml[1])
                    .ok_or_else(|| CameraModelError::InvalidParams("Invalid height".to_string()))?,
            },
            Some(_) => {
                return Err(CameraModelError::InvalidParams(
                    "Invalid resolution".to_string(),
                ))
            }
            None => Resolution {
                width: 0,
                height: 0,
            },
        };

        Ok(RadTanModel::new(intrinsics, distortion)?.with_resolution(resolution))
    }

    /// Saves the camera model's parameters in the layout read by
    /// [`RadTanModel::load_from_yaml`].
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let file = CameraFile {
            cam0: CameraEntry {
                camera_model: "rad_tan",
                intrinsics: [
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ],
                distortion: self.distortion.to_array(),
                resolution: [self.resolution.width, self.resolution.height],
            },
        };

        let yaml_string =
            serde_yaml::to_string(&file).map_err(|e| CameraModelError::YamlError(e.to_string()))?;
        fs::write(path, yaml_string)?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_distortion(&self.distortion)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_distortion(&self) -> DistortionCoefficients {
        self.distortion
    }
}

/// YAML scalars written without a decimal point parse as integers.
fn yaml_number(node: &yaml_rust::Yaml) -> Option<f64> {
    node.as_f64().or_else(|| node.as_i64().map(|v| v as f64))
}

fn yaml_dimension(node: &yaml_rust::Yaml) -> Option<u32> {
    node.as_i64().and_then(|v| u32::try_from(v).ok())
}
