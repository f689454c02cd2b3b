//! Run configuration and the undistortion pipeline.
//!
//! [`Undistorter`] loads the raw image, sizes the undistorted canvas from the
//! corner boundary, builds one or both resampling maps, remaps, and only then
//! writes the outputs. Nothing is written if any step fails.

use crate::camera::{
    CameraModelError, DistortionCoefficients, Intrinsics, PinholeModel, RadTanModel,
    Resolution,
};
use crate::geometry::{compute_undistorted_boundary, optimal_new_intrinsics, BoundingBox};
use crate::undistort::{build_rectification_map, build_resampling_map, remap, BorderPolicy};
use crate::util::{self, UtilError};
use image::RgbImage;
use log::{debug, info};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum UndistortError {
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error(transparent)]
    Util(#[from] UtilError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// How the resampling map is built.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum MapStrategy {
    /// Forward-distort every pixel of the undistorted bounding box.
    #[default]
    Explicit,
    /// Rectify into an ideal camera fitted to the canvas.
    Optimal,
    /// Both, the optimal result written next to the explicit one.
    Both,
}

/// Everything one run needs.
///
/// ```yaml
/// image_path: raw_image.jpg
/// output_path: undistorted.jpg
/// intrinsics: { fx: 1738.06409, fy: 1736.96128, cx: 965.222, cy: 666.6185 }
/// distortion: { k1: -0.34592, k2: 0.16969, p1: -0.00279, p2: 0.00235 }
/// strategy: both
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndistortConfig {
    pub image_path: PathBuf,
    pub output_path: PathBuf,
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub distortion: DistortionCoefficients,
    #[serde(default)]
    pub strategy: MapStrategy,
    #[serde(default)]
    pub border: BorderPolicy,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl UndistortConfig {
    pub fn load_from_yaml(path: &Path) -> Result<Self, UndistortError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            UndistortError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| UndistortError::Config(format!("{}: {e}", path.display())))
    }

    /// Path of the rectification result when both strategies run:
    /// `out.jpg` becomes `out_optimal.jpg`.
    pub fn optimal_output_path(&self) -> PathBuf {
        let stem = self
            .output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "undistorted".to_string());
        let name = match self.output_path.extension() {
            Some(ext) => format!("{stem}_optimal.{}", ext.to_string_lossy()),
            None => format!("{stem}_optimal"),
        };
        self.output_path.with_file_name(name)
    }
}

/// Summary of a run, optionally written as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndistortReport {
    pub image_path: PathBuf,
    pub image_size: Resolution,
    pub bounding_box: BoundingBox,
    /// Undistorted raw corners: top-left, top-right, bottom-right, bottom-left.
    pub corners: [[f64; 2]; 4],
    pub canvas_size: Resolution,
    /// Camera matrix of the raw image, row-major.
    pub camera_matrix: [[f64; 3]; 3],
    pub optimal_intrinsics: Option<Intrinsics>,
    /// Camera matrix the rectification map projects into, row-major.
    pub optimal_camera_matrix: Option<[[f64; 3]; 3]>,
    pub outputs: Vec<PathBuf>,
}

fn matrix_rows(k: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [0usize, 1, 2].map(|r| [k[(r, 0)], k[(r, 1)], k[(r, 2)]])
}

/// Removes files written earlier in a failed run.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

/// Undistorted images, not yet written.
#[derive(Debug)]
pub struct Undistorted {
    pub explicit: Option<RgbImage>,
    pub optimal: Option<RgbImage>,
    pub bounding_box: BoundingBox,
    pub corners: [[f64; 2]; 4],
    pub canvas_size: Resolution,
    pub optimal_intrinsics: Option<Intrinsics>,
}

pub struct Undistorter {
    config: UndistortConfig,
}

impl Undistorter {
    /// Validates the camera parameters up front.
    pub fn new(config: UndistortConfig) -> Result<Self, UndistortError> {
        RadTanModel::new(config.intrinsics, config.distortion)?;
        if config.output_path.as_os_str().is_empty() {
            return Err(UndistortError::Config("Output path is empty".to_string()));
        }
        Ok(Undistorter { config })
    }

    /// Loads, undistorts and writes. Returns the run summary.
    pub fn run(&self) -> Result<UndistortReport, UndistortError> {
        let start = Instant::now();
        info!("Loading {}", self.config.image_path.display());
        let image = util::load_image(&self.config.image_path)?;

        let undistorted = self.undistort(&image)?;

        let mut pending = Vec::new();
        if let Some(explicit) = &undistorted.explicit {
            pending.push((self.config.output_path.clone(), explicit));
        }
        if let Some(optimal) = &undistorted.optimal {
            let path = match self.config.strategy {
                MapStrategy::Both => self.config.optimal_output_path(),
                _ => self.config.output_path.clone(),
            };
            pending.push((path, optimal));
        }

        let mut outputs = Vec::with_capacity(pending.len());
        for (path, output) in pending {
            if let Err(e) = util::save_image(output, &path) {
                // All or nothing.
                discard(&outputs);
                return Err(e.into());
            }
            info!("Wrote {}", path.display());
            outputs.push(path);
        }

        let report = UndistortReport {
            image_path: self.config.image_path.clone(),
            image_size: Resolution {
                width: image.width(),
                height: image.height(),
            },
            bounding_box: undistorted.bounding_box,
            corners: undistorted.corners,
            canvas_size: undistorted.canvas_size,
            camera_matrix: matrix_rows(&self.config.intrinsics.camera_matrix()),
            optimal_intrinsics: undistorted.optimal_intrinsics,
            optimal_camera_matrix: undistorted
                .optimal_intrinsics
                .map(|k| matrix_rows(&k.camera_matrix())),
            outputs,
        };
        if let Some(report_path) = &self.config.report_path {
            if let Err(e) = util::write_json_report(&report, report_path) {
                discard(&report.outputs);
                return Err(e.into());
            }
            info!("Wrote report {}", report_path.display());
        }

        info!("Finished in {:.1} ms", start.elapsed().as_secs_f64() * 1e3);
        Ok(report)
    }

    /// Undistorts an already decoded raw image with the configured strategy.
    pub fn undistort(&self, image: &RgbImage) -> Result<Undistorted, UndistortError> {
        let resolution = Resolution {
            width: image.width(),
            height: image.height(),
        };
        let model = RadTanModel::new(self.config.intrinsics, self.config.distortion)?
            .with_resolution(resolution);
        debug!("Camera: {:?}", model);
        debug!("K ={}", self.config.intrinsics.camera_matrix());

        let (bounding_box, corners) = compute_undistorted_boundary(&resolution, &model)?;
        let canvas_size = bounding_box.canvas_size();
        info!(
            "Undistorted extent x: [{:.3}, {:.3}] y: [{:.3}, {:.3}], canvas {}x{} from {}x{}",
            bounding_box.min_x,
            bounding_box.max_x,
            bounding_box.min_y,
            bounding_box.max_y,
            canvas_size.width,
            canvas_size.height,
            resolution.width,
            resolution.height
        );

        let border = self.config.border;
        let explicit = match self.config.strategy {
            MapStrategy::Explicit | MapStrategy::Both => {
                let map = build_resampling_map(&model, &bounding_box)?;
                Some(remap(image, &map, border))
            }
            MapStrategy::Optimal => None,
        };

        let (optimal, optimal_intrinsics) = match self.config.strategy {
            MapStrategy::Optimal | MapStrategy::Both => {
                let new_intrinsics = optimal_new_intrinsics(&model, &canvas_size)?;
                debug!("New K ={}", new_intrinsics.camera_matrix());
                let target = PinholeModel::new(new_intrinsics, canvas_size)?;
                let map = build_rectification_map(&model, &target)?;
                (Some(remap(image, &map, border)), Some(new_intrinsics))
            }
            MapStrategy::Explicit => (None, None),
        };

        Ok(Undistorted {
            explicit,
            optimal,
            bounding_box,
            corners: corners.map(|c| [c.x, c.y]),
            canvas_size,
            optimal_intrinsics,
        })
    }
}
