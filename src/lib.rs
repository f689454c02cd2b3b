//! Lens Undistort Library
//!
//! Removes radial-tangential lens distortion from images taken by a
//! calibrated camera. The library provides:
//! - Radial-Tangential (k1, k2, p1, p2) and Pinhole camera models with
//!   forward and inverse distortion
//! - Undistorted canvas bounds from the projected raw image corners
//! - Per-pixel resampling maps and bilinear remapping with a border policy
//! - A configurable pipeline that loads, undistorts and writes images

pub mod camera;
pub mod geometry;
pub mod pipeline;
pub mod undistort;
pub mod util;

// Re-export commonly used types
pub use camera::{
    CameraModel, CameraModelError, DistortionCoefficients, Intrinsics, PinholeModel, RadTanModel,
    Resolution,
};

pub use geometry::{compute_undistorted_boundary, optimal_new_intrinsics, BoundingBox};

pub use pipeline::{MapStrategy, UndistortConfig, UndistortError, UndistortReport, Undistorter};

pub use undistort::{
    build_rectification_map, build_resampling_map, remap, BorderPolicy, ResamplingMap,
};
