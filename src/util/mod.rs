use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Failed to read the image: {path}: {reason}")]
    ImageLoad { path: String, reason: String },
    #[error("Failed to write the image: {path}: {reason}")]
    ImageSave { path: String, reason: String },
    #[error("Failed to write the report: {0}")]
    Report(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// Ensure the directory that will hold `path` exists
pub fn ensure_parent_dir(path: &Path) -> Result<(), UtilError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            fs::create_dir_all(dir).map_err(|e| {
                UtilError::InvalidParams(format!(
                    "Failed to create output directory {}: {e}",
                    dir.display()
                ))
            })
        }
        _ => Ok(()),
    }
}

/// Load an image from file and convert it to RGB
///
/// # Arguments
///
/// * `image_path` - Path to the image file
///
/// # Returns
///
/// * `Result<RgbImage, UtilError>` - Loaded RGB image
pub fn load_image(image_path: &Path) -> Result<RgbImage, UtilError> {
    let img = image::open(image_path).map_err(|e| UtilError::ImageLoad {
        path: image_path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(img.to_rgb8())
}

/// Save an RGB image, format chosen from the file extension.
///
/// A file left behind by a failed encode is removed.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), UtilError> {
    ensure_parent_dir(path)?;
    image.save(path).map_err(|e| {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        UtilError::ImageSave {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })
}

/// Serialize `value` as pretty JSON into `path`
pub fn write_json_report<T: Serialize>(value: &T, path: &Path) -> Result<(), UtilError> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value).map_err(|e| UtilError::Report(e.to_string()))?;
    fs::write(path, json).map_err(|e| UtilError::Report(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_load_missing_image_names_path() {
        let path = Path::new("does/not/exist.jpg");
        let err = load_image(path).unwrap_err();

        assert!(matches!(err, UtilError::ImageLoad { .. }));
        assert!(err.to_string().contains("does/not/exist.jpg"));
    }

    #[test]
    fn test_save_and_load_image() {
        let dir = std::env::temp_dir().join("lens_undistort_util_test");
        let path = dir.join("nested").join("pixel.png");

        let image = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        save_image(&image, &path).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded, image);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_save_with_unknown_extension_leaves_no_file() {
        let path = std::env::temp_dir().join("lens_undistort_util_test.unknownext");

        let image = RgbImage::new(2, 2);
        let result = save_image(&image, &path);

        assert!(matches!(result, Err(UtilError::ImageSave { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_json_report() {
        #[derive(Serialize)]
        struct Report {
            width: u32,
        }
        let path = std::env::temp_dir().join("lens_undistort_util_report.json");

        write_json_report(&Report { width: 7 }, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["width"], 7);

        fs::remove_file(path).unwrap();
    }
}
