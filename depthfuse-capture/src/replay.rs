//! Replay of recorded depth sequences listed in a manifest file.
//!
//! The manifest follows the TUM RGB-D `depth.txt` layout: one
//! `<timestamp> <relative/path.png>` pair per line, `#` comments and blank
//! lines ignored. Paths resolve against the manifest's directory.

use crate::source::{AcquisitionMode, CaptureError, DepthFrame, DepthImage, DepthSource};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One line of a depth manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    /// Recorded timestamp, when the first column parses as a number.
    pub timestamp: Option<f64>,
    /// Image path, already resolved against the manifest directory.
    pub path: PathBuf,
}

/// Read a manifest file and resolve every listed image path.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn parse_manifest(path: impl AsRef<Path>) -> Result<Vec<ManifestEntry>, CaptureError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| CaptureError::ManifestUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    parse_entries(&text, dir, path)
}

fn parse_entries(
    text: &str,
    dir: &Path,
    manifest: &Path,
) -> Result<Vec<ManifestEntry>, CaptureError> {
    let mut entries = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut columns = line.split_whitespace();
        let stamp = columns.next().unwrap_or_default();
        let relative = columns
            .next()
            .ok_or_else(|| CaptureError::ManifestMalformed {
                path: manifest.to_path_buf(),
                line: index + 1,
                reason: "expected `<timestamp> <path>`".to_string(),
            })?;

        entries.push(ManifestEntry {
            timestamp: stamp.parse().ok(),
            path: dir.join(relative),
        });
    }

    Ok(entries)
}

/// Decode an image file as depth without rescaling its samples.
fn decode_depth(path: &Path) -> Result<DepthImage, CaptureError> {
    let failed = |reason: String| CaptureError::FrameDecodeFailed {
        path: path.to_path_buf(),
        reason,
    };

    let decoded = image::open(path).map_err(|e| failed(e.to_string()))?;
    let image = match decoded {
        DynamicImage::ImageLuma16(image) => image,
        DynamicImage::ImageLuma8(image) => {
            let (width, height) = image.dimensions();
            let samples = image.into_raw().into_iter().map(u16::from).collect();
            DepthImage::from_raw(width, height, samples)
                .ok_or_else(|| failed("sample buffer does not match dimensions".to_string()))?
        }
        other => {
            return Err(failed(format!(
                "unsupported pixel layout {:?}, expected single-channel depth",
                other.color()
            )));
        }
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(failed("decoded image is empty".to_string()));
    }

    Ok(image)
}

/// Depth source replaying a recorded sequence.
///
/// The cursor only moves forward; once every entry has been read the source
/// returns `None` on every call.
pub struct FileReplay {
    entries: Vec<ManifestEntry>,
    cursor: usize,
}

impl FileReplay {
    /// Create a replay source from a manifest file.
    ///
    /// An empty path yields a source with no frames.
    pub fn from_manifest(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            info!("No depth manifest given, replay source is empty");
            return Ok(Self::from_entries(Vec::new()));
        }

        let entries = parse_manifest(path)?;
        info!("Depth manifest {} lists {} frames", path.display(), entries.len());
        Ok(Self::from_entries(entries))
    }

    /// Create a replay source from already-resolved entries.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self { entries, cursor: 0 }
    }

    /// Number of frames not yet read.
    pub fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

impl DepthSource for FileReplay {
    fn next_frame(&mut self) -> Result<Option<DepthFrame>, CaptureError> {
        let Some(entry) = self.entries.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let image = decode_depth(&entry.path)?;
        debug!(
            "Read depth frame {} ({}x{}) from {}",
            self.cursor,
            image.width(),
            image.height(),
            entry.path.display()
        );

        Ok(Some(DepthFrame::new(
            image,
            entry.timestamp,
            self.cursor as u64,
        )))
    }

    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::FileReplay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    fn write_depth(path: &Path, width: u32, height: u32, value: u16) {
        DepthImage::from_pixel(width, height, image::Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let text = "# depth maps\n# file: 'rgbd_dataset'\n\n1305031102.160407 depth/a.png\n   \n1305031102.194330 depth/b.png\n";
        let entries = parse_entries(text, Path::new("data"), Path::new("data/depth.txt")).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("data/depth/a.png"));
        assert_eq!(entries[1].path, PathBuf::from("data/depth/b.png"));
    }

    #[test]
    fn test_parse_resolves_relative_to_manifest_dir() {
        let entries =
            parse_entries("123.456 depth/001.png", Path::new("data"), Path::new("data/x")).unwrap();

        assert_eq!(entries[0].path, PathBuf::from("data/depth/001.png"));
        assert_eq!(entries[0].timestamp, Some(123.456));
    }

    #[test]
    fn test_parse_handles_crlf() {
        let entries =
            parse_entries("1.0 a.png\r\n2.0 b.png\r\n", Path::new(""), Path::new("m")).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, PathBuf::from("b.png"));
    }

    #[test]
    fn test_parse_non_numeric_timestamp_is_kept_as_none() {
        let entries = parse_entries("frame a.png", Path::new(""), Path::new("m")).unwrap();
        assert_eq!(entries[0].timestamp, None);
    }

    #[test]
    fn test_parse_rejects_missing_path_column() {
        let err = parse_entries("# header\n1.0\n", Path::new(""), Path::new("m")).unwrap_err();
        assert!(matches!(err, CaptureError::ManifestMalformed { line: 2, .. }));
    }

    #[test]
    fn test_unreadable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileReplay::from_manifest(dir.path().join("missing.txt"))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::ManifestUnreadable { .. }));
    }

    #[test]
    fn test_empty_manifest_path_is_exhausted() {
        let mut source = FileReplay::from_manifest("").unwrap();
        assert!(source.is_exhausted());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.mode(), AcquisitionMode::FileReplay);
    }

    #[test]
    fn test_replay_order_and_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("depth")).unwrap();
        write_depth(&dir.path().join("depth/1.png"), 4, 2, 1000);
        write_depth(&dir.path().join("depth/2.png"), 4, 2, 2000);
        let manifest = dir.path().join("depth.txt");
        std::fs::write(&manifest, "# test\n0.1 depth/1.png\n0.2 depth/2.png\n").unwrap();

        let mut source = FileReplay::from_manifest(&manifest).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.frame_number, 1);
        assert_eq!(first.timestamp, Some(0.1));
        assert_eq!(first.image.get_pixel(0, 0).0[0], 1000);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.image.get_pixel(3, 1).0[0], 2000);

        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_none());
        }
    }

    #[test]
    fn test_sixteen_bit_depth_is_not_rescaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.png");
        write_depth(&path, 2, 2, 65000);

        let image = decode_depth(&path).unwrap();
        assert!(image.pixels().all(|p| p.0[0] == 65000));
    }

    #[test]
    fn test_eight_bit_depth_is_widened_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        GrayImage::from_pixel(3, 3, image::Luma([200])).save(&path).unwrap();

        let image = decode_depth(&path).unwrap();
        assert!(image.pixels().all(|p| p.0[0] == 200));
    }

    #[test]
    fn test_colour_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        RgbImage::new(2, 2).save(&path).unwrap();

        let err = decode_depth(&path).unwrap_err();
        assert!(matches!(err, CaptureError::FrameDecodeFailed { .. }));
    }

    #[test]
    fn test_corrupt_frame_fails_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.png");
        std::fs::write(&path, b"not a png").unwrap();

        let mut source = FileReplay::from_entries(vec![ManifestEntry {
            timestamp: None,
            path,
        }]);
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, CaptureError::FrameDecodeFailed { .. }));
        assert!(source.next_frame().unwrap().is_none());
    }
}
