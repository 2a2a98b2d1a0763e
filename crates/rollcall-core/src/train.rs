//! Registration photos and gallery training.
//!
//! The images directory holds one sub-directory per person, named
//! `{ID}_{NAME}`. Training walks it in sorted order, detects every face in
//! every photo and keeps one embedding per face.

use crate::session::{EmbeddingExtractor, FaceDetector};
use crate::types::KnownIdentity;
use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("student id and name are both required")]
    MissingLabel,
    #[error("unsupported image type: {} (expected .jpg, .jpeg or .png)", .0.display())]
    UnsupportedImage(PathBuf),
    #[error("no images given")]
    NoImages,
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face detection failed on {}: {source}", .path.display())]
    Detection {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("no identity folders under {}", .0.display())]
    NoIdentities(PathBuf),
}

/// Directory name for a person: `{ID}_{NAME}` with spaces replaced by `_`.
pub fn identity_dir_name(id: &str, name: &str) -> String {
    format!("{}_{}", id.trim(), name.trim()).replace(' ', "_")
}

/// Split a directory name into `(id, name)` at the first `_`. A name with
/// no `_` is used for both parts.
pub fn parse_identity_dir(dir_name: &str) -> (String, String) {
    match dir_name.split_once('_') {
        Some((id, name)) => (id.to_string(), name.to_string()),
        None => (dir_name.to_string(), dir_name.to_string()),
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Copy photos for one person into `{images_dir}/{ID}_{NAME}/`.
///
/// Each photo is decoded first, so unreadable files are rejected before
/// anything is written, then saved as JPEG under a timestamped name.
pub fn register(
    images_dir: &Path,
    id: &str,
    name: &str,
    photos: &[PathBuf],
) -> Result<Vec<PathBuf>, TrainError> {
    if id.trim().is_empty() || name.trim().is_empty() {
        return Err(TrainError::MissingLabel);
    }
    if photos.is_empty() {
        return Err(TrainError::NoImages);
    }
    if let Some(bad) = photos.iter().find(|p| !is_supported_image(p)) {
        return Err(TrainError::UnsupportedImage(bad.clone()));
    }

    let decoded = photos
        .iter()
        .map(|p| {
            image::open(p).map_err(|source| TrainError::Image { path: p.clone(), source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dir = images_dir.join(identity_dir_name(id, name));
    std::fs::create_dir_all(&dir).map_err(|source| TrainError::Io { path: dir.clone(), source })?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
    let mut saved = Vec::with_capacity(decoded.len());
    for (i, img) in decoded.into_iter().enumerate() {
        let path = dir.join(format!("{stamp}_{i:02}.jpg"));
        img.to_rgb8()
            .save(&path)
            .map_err(|source| TrainError::Image { path: path.clone(), source })?;
        saved.push(path);
    }

    tracing::info!(dir = %dir.display(), photos = saved.len(), "photos registered");
    Ok(saved)
}

/// Per-identity training outcome, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainedIdentity {
    pub label: String,
    pub images: usize,
    pub embeddings: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub identities: Vec<KnownIdentity>,
    pub trained: Vec<TrainedIdentity>,
    /// Labels of folders that produced no embedding.
    pub skipped: Vec<String>,
}

/// Build the identity list from every folder under `images_dir`.
pub fn train<D, E>(
    images_dir: &Path,
    detector: &mut D,
    extractor: &mut E,
) -> Result<TrainReport, TrainError>
where
    D: FaceDetector,
    E: EmbeddingExtractor,
{
    let mut dirs = sorted_entries(images_dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    dirs.retain(|p| p.file_name().and_then(|n| n.to_str()).is_some());
    if dirs.is_empty() {
        return Err(TrainError::NoIdentities(images_dir.to_path_buf()));
    }

    let mut report = TrainReport::default();
    for dir in dirs {
        let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (id, name) = parse_identity_dir(dir_name);
        let label = format!("{id} - {name}");

        let images: Vec<PathBuf> = sorted_entries(&dir)?
            .into_iter()
            .filter(|p| p.is_file() && is_supported_image(p))
            .collect();

        let mut embeddings = Vec::new();
        for path in &images {
            let gray = match image::open(path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    continue;
                }
            };
            let (width, height) = gray.dimensions();

            let faces = detector.detect(gray.as_raw(), width, height).map_err(|e| {
                TrainError::Detection { path: path.clone(), source: Box::new(e) }
            })?;
            if faces.is_empty() {
                tracing::debug!(path = %path.display(), "no face in image");
                continue;
            }

            for face in &faces {
                match extractor.extract(gray.as_raw(), width, height, face) {
                    Ok(Some(embedding)) => embeddings.push(embedding),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "embedding extraction failed");
                    }
                }
            }
        }

        if embeddings.is_empty() {
            tracing::warn!(%label, images = images.len(), "no faces found; identity skipped");
            report.skipped.push(label);
            continue;
        }

        tracing::info!(%label, images = images.len(), embeddings = embeddings.len(), "identity trained");
        report.trained.push(TrainedIdentity {
            label,
            images: images.len(),
            embeddings: embeddings.len(),
        });
        report.identities.push(KnownIdentity { id, name, embeddings });
    }

    Ok(report)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, TrainError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| TrainError::Io { path: dir.to_path_buf(), source })?;
    let mut paths = entries
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TrainError::Io { path: dir.to_path_buf(), source })?;
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    #[derive(Debug, Error)]
    #[error("scripted failure")]
    struct ScriptedError;

    /// One face covering the whole image, none for all-black images.
    struct WholeImageDetector;

    impl FaceDetector for WholeImageDetector {
        type Error = ScriptedError;

        fn detect(&mut self, frame: &[u8], w: u32, h: u32) -> Result<Vec<BoundingBox>, ScriptedError> {
            if frame.iter().all(|&p| p == 0) {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: w as f32,
                height: h as f32,
                confidence: 0.9,
            }])
        }
    }

    /// Embedding is the mean intensity of the frame.
    struct MeanExtractor;

    impl EmbeddingExtractor for MeanExtractor {
        type Error = ScriptedError;

        fn extract(
            &mut self,
            frame: &[u8],
            _: u32,
            _: u32,
            _: &BoundingBox,
        ) -> Result<Option<Embedding>, ScriptedError> {
            let mean = frame.iter().map(|&p| p as f32).sum::<f32>() / frame.len() as f32;
            Ok(Some(Embedding::new(vec![mean / 255.0])))
        }
    }

    fn write_gray(path: &Path, value: u8) {
        GrayImage::from_pixel(8, 8, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_parse_identity_dir() {
        assert_eq!(parse_identity_dir("101_Alice"), ("101".into(), "Alice".into()));
        assert_eq!(parse_identity_dir("7_Mary_Jane"), ("7".into(), "Mary_Jane".into()));
        assert_eq!(parse_identity_dir("Solo"), ("Solo".into(), "Solo".into()));
    }

    #[test]
    fn test_identity_dir_name_replaces_spaces() {
        assert_eq!(identity_dir_name("12", "Jane Doe"), "12_Jane_Doe");
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image(Path::new("a.JPG")));
        assert!(is_supported_image(Path::new("a.png")));
        assert!(!is_supported_image(Path::new("a.gif")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    #[test]
    fn test_train_sorted_and_skips_faceless() {
        let dir = tempdir().unwrap();
        for (folder, value) in [("102_Bob", 200u8), ("101_Alice", 100), ("103_Ghost", 0)] {
            let d = dir.path().join(folder);
            std::fs::create_dir(&d).unwrap();
            write_gray(&d.join("a.png"), value);
        }
        std::fs::write(dir.path().join("101_Alice/notes.txt"), "x").unwrap();

        let report = train(dir.path(), &mut WholeImageDetector, &mut MeanExtractor).unwrap();
        let labels: Vec<String> = report.identities.iter().map(|i| i.label()).collect();
        assert_eq!(labels, vec!["101 - Alice", "102 - Bob"]);
        assert_eq!(report.skipped, vec!["103 - Ghost".to_string()]);
        assert!((report.identities[0].embeddings[0].values[0] - 100.0 / 255.0).abs() < 1e-4);
        assert_eq!(report.trained[0].images, 1);
    }

    #[test]
    fn test_train_multiple_photos_per_identity() {
        let dir = tempdir().unwrap();
        let d = dir.path().join("5_Eve");
        std::fs::create_dir(&d).unwrap();
        write_gray(&d.join("1.png"), 50);
        write_gray(&d.join("2.png"), 60);

        let report = train(dir.path(), &mut WholeImageDetector, &mut MeanExtractor).unwrap();
        assert_eq!(report.identities[0].embeddings.len(), 2);
    }

    #[test]
    fn test_train_empty_root() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            train(dir.path(), &mut WholeImageDetector, &mut MeanExtractor),
            Err(TrainError::NoIdentities(_))
        ));
    }

    #[test]
    fn test_register_copies_photos() {
        let src = tempdir().unwrap();
        let photo = src.path().join("me.png");
        write_gray(&photo, 128);

        let images = tempdir().unwrap();
        let saved = register(images.path(), "42", "Jane Doe", &[photo.clone(), photo]).unwrap();
        assert_eq!(saved.len(), 2);
        for p in &saved {
            assert!(p.starts_with(images.path().join("42_Jane_Doe")));
            assert!(p.exists());
        }
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let images = tempdir().unwrap();
        let photo = PathBuf::from("face.gif");
        assert!(matches!(
            register(images.path(), "1", "A", &[photo]),
            Err(TrainError::UnsupportedImage(_))
        ));
        assert!(matches!(
            register(images.path(), " ", "A", &[PathBuf::from("a.png")]),
            Err(TrainError::MissingLabel)
        ));
        assert!(matches!(register(images.path(), "1", "A", &[]), Err(TrainError::NoImages)));
    }
}
