use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine as _;

use crate::errors::{PilotError, PilotResult};

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(PNG_SIGNATURE)
}

/// Reads width and height from the image header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> PilotResult<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PilotError::CaptureFailed(format!("screenshot format: {e}")))?;
    let (w, h) = reader
        .into_dimensions()
        .map_err(|e| PilotError::CaptureFailed(format!("screenshot header: {e}")))?;
    if w == 0 || h == 0 {
        return Err(PilotError::CaptureFailed(format!("screenshot has empty size {w}x{h}")));
    }
    Ok((w, h))
}

pub fn file_name_for_step(step: u32) -> String {
    format!("step_{step:04}.png")
}

/// Writes the screenshot for `step` into `dir`, creating it if needed.
pub async fn persist(dir: &Path, step: u32, bytes: &[u8]) -> PilotResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name_for_step(step));
    tokio::fs::write(&path, bytes).await?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "screenshot persisted");
    Ok(path)
}

/// `data:` URL accepted by OpenAI-compatible vision endpoints.
pub fn png_data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_png_dimensions() {
        let png = solid_png(36, 80);
        assert!(is_png(&png));
        assert_eq!(image_dimensions(&png).unwrap(), (36, 80));
    }

    #[test]
    fn garbage_is_a_capture_failure() {
        let err = image_dimensions(b"error: closed").unwrap_err();
        assert!(matches!(err, PilotError::CaptureFailed(_)));
    }

    #[test]
    fn data_url_has_png_prefix() {
        assert_eq!(png_data_url(b"abc"), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn persists_by_step_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = persist(&dir.path().join("shots"), 7, b"png").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "step_0007.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }
}
