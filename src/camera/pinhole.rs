//! Implements the Pinhole camera model.
//!
//! The pinhole model assumes no lens distortion. It describes the ideal
//! camera of an undistorted output canvas, e.g. the adjusted intrinsics
//! produced by [`crate::geometry::optimal_new_intrinsics`].

use crate::camera::{
    validation, CameraModel, CameraModelError, DistortionCoefficients, Intrinsics, Resolution,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fs;
use yaml_rust::YamlLoader;

/// Represents a Pinhole camera model.
///
/// # Examples
///
/// ```rust
/// use lens_undistort::camera::pinhole::PinholeModel;
/// use lens_undistort::camera::{CameraModel, Intrinsics, Resolution};
/// use nalgebra::Vector2;
///
/// let model = PinholeModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
///
/// let normalized = model.undistort_normalized(&Vector2::new(370.0, 340.0)).unwrap();
/// assert!((normalized.x - 0.1).abs() < 1e-12);
/// assert!((normalized.y - 0.2).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };

        model.validate_params()?;

        Ok(model)
    }
}

#[derive(Serialize)]
struct CameraFile {
    cam0: CameraEntry,
}

#[derive(Serialize)]
struct CameraEntry {
    camera_model: &'static str,
    intrinsics: [f64; 4],
    resolution: [u32; 2],
}

impl CameraModel for PinholeModel {
    fn project_normalized(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        self.intrinsics.denormalize(normalized)
    }

    fn distort(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        *pixel
    }

    fn undistort_normalized(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        Ok(self.intrinsics.normalize(pixel))
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        let doc = docs.first().ok_or_else(|| {
            CameraModelError::InvalidParams("Empty YAML document".to_string())
        })?;

        let intrinsics_yaml = doc["cam0"]["intrinsics"]
            .as_vec()
            .filter(|v| v.len() == 4)
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid intrinsics".to_string()))?;
        let resolution_yaml = doc["cam0"]["resolution"]
            .as_vec()
            .filter(|v| v.len() == 2)
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))?;

        let number = |i: usize| {
            let node = &intrinsics_yaml[i];
            node.as_f64()
                .or_else(|| node.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!(
                        "Invalid intrinsic parameter at index {i}"
                    ))
                })
        };
        let dimension = |i: usize| {
            resolution_yaml[i]
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))
        };

        PinholeModel::new(
            Intrinsics {
                fx: number(0)?,
                fy: number(1)?,
                cx: number(2)?,
                cy: number(3)?,
            },
            Resolution {
                width: dimension(0)?,
                height: dimension(1)?,
            },
        )
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let file = CameraFile {
            cam0: CameraEntry {
                camera_model: "pinhole",
                intrinsics: [
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ],
                resolution: [self.resolution.width, self.resolution.height],
            },
        };
        let yaml_string =
            serde_yaml::to_string(&file).map_err(|e| CameraModelError::YamlError(e.to_string()))?;
        fs::write(path, yaml_string)?;
        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_distortion(&self) -> DistortionCoefficients {
        DistortionCoefficients::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PinholeModel {
        PinholeModel::new(
            Intrinsics {
                fx: 461.629,
                fy: 460.152,
                cx: 362.680,
                cy: 246.049,
            },
            Resolution {
                width: 752,
                height: 480,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_pinhole_round_trip() {
        let model = model();
        let pixel = Vector2::new(100.0, 400.0);

        let normalized = model.undistort_normalized(&pixel).unwrap();
        let back = model.project_normalized(&normalized);

        assert!((back - pixel).norm() < 1e-9);
        assert_eq!(model.distort(&pixel), pixel);
        assert!(model.get_distortion().is_zero());
    }

    #[test]
    fn test_pinhole_save_and_load() {
        let path = std::env::temp_dir().join("lens_undistort_pinhole_saved.yaml");
        let path = path.to_str().unwrap();

        let model = model();
        model.save_to_yaml(path).unwrap();
        let loaded = PinholeModel::load_from_yaml(path).unwrap();

        assert_eq!(model.intrinsics, loaded.intrinsics);
        assert_eq!(model.resolution, loaded.resolution);

        fs::remove_file(path).unwrap();
    }
}
