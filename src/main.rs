//! Image Undistortion Tool
//!
//! Removes lens distortion from a raw image given the camera intrinsics and
//! radial-tangential coefficients.
//!
//! Usage:
//! ```bash
//! lens-undistort -i raw_image.jpg -o undistorted.jpg \
//!   --fx 1738.06409 --fy 1736.96128 --cx 965.222 --cy 666.6185 \
//!   --k1 -0.34592 --k2 0.16969 --p1 -0.00279 --p2 0.00235
//! lens-undistort -i raw_image.jpg -c samples/rad_tan.yaml --strategy both
//! lens-undistort --config samples/undistort.yaml
//! ```

use clap::Parser;
use lens_undistort::camera::{CameraModel, DistortionCoefficients, Intrinsics, RadTanModel};
use lens_undistort::{BorderPolicy, MapStrategy, UndistortConfig, Undistorter};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

/// Remove lens distortion from an image taken by a calibrated camera
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, allow_negative_numbers = true)]
struct Cli {
    /// Run configuration YAML (replaces all other options)
    #[arg(long, conflicts_with_all = ["input", "calib", "fx"])]
    config: Option<PathBuf>,

    /// Raw input image
    #[arg(short = 'i', long, required_unless_present = "config")]
    input: Option<PathBuf>,

    /// Undistorted output image
    #[arg(short = 'o', long, default_value = "undistorted.jpg")]
    output: PathBuf,

    /// Camera calibration YAML (cam0 intrinsics + distortion)
    #[arg(short = 'c', long, conflicts_with = "fx")]
    calib: Option<PathBuf>,

    /// Focal length x in pixels
    #[arg(long, requires_all = ["fy", "cx", "cy"])]
    fx: Option<f64>,

    /// Focal length y in pixels
    #[arg(long)]
    fy: Option<f64>,

    /// Principal point x in pixels
    #[arg(long)]
    cx: Option<f64>,

    /// Principal point y in pixels
    #[arg(long)]
    cy: Option<f64>,

    /// First radial coefficient
    #[arg(long, default_value_t = 0.0)]
    k1: f64,

    /// Second radial coefficient
    #[arg(long, default_value_t = 0.0)]
    k2: f64,

    /// First tangential coefficient
    #[arg(long, default_value_t = 0.0)]
    p1: f64,

    /// Second tangential coefficient
    #[arg(long, default_value_t = 0.0)]
    p2: f64,

    /// How the resampling map is built
    #[arg(short = 's', long, value_enum, default_value_t = MapStrategy::Explicit)]
    strategy: MapStrategy,

    /// Fill for pixels that map outside the raw image
    #[arg(long, value_enum, default_value_t = BorderPolicy::Transparent)]
    border: BorderPolicy,

    /// Write a JSON run report here
    #[arg(long)]
    report: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<UndistortConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.config {
        info!("Loading run configuration from: {}", path.display());
        return Ok(UndistortConfig::load_from_yaml(path)?);
    }

    let image_path = cli.input.clone().ok_or("Missing --input image")?;

    let (intrinsics, distortion) = match (&cli.calib, cli.fx, cli.fy, cli.cx, cli.cy) {
        (Some(calib), ..) => {
            let calib = calib.to_str().ok_or("Invalid calibration path string")?;
            info!("Loading Radial-Tangential model from: {}", calib);
            let model = RadTanModel::load_from_yaml(calib)?;
            (model.get_intrinsics(), model.get_distortion())
        }
        (None, Some(fx), Some(fy), Some(cx), Some(cy)) => (
            Intrinsics { fx, fy, cx, cy },
            DistortionCoefficients::new(cli.k1, cli.k2, cli.p1, cli.p2),
        ),
        _ => return Err("Provide either --calib or all of --fx --fy --cx --cy".into()),
    };

    Ok(UndistortConfig {
        image_path,
        output_path: cli.output.clone(),
        intrinsics,
        distortion,
        strategy: cli.strategy,
        border: cli.border,
        report_path: cli.report.clone(),
    })
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match Undistorter::new(config).and_then(|undistorter| undistorter.run()) {
        Ok(report) => {
            info!(
                "Undistorted {}x{} -> {}x{}",
                report.image_size.width,
                report.image_size.height,
                report.canvas_size.width,
                report.canvas_size.height
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            eprintln!("{e}, terminating...");
            ExitCode::FAILURE
        }
    }
}
