use crate::models::ArtifactFormat;

/// Identify a generated image from its magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ArtifactFormat> {
    match bytes {
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ArtifactFormat::Png),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => {
            Some(ArtifactFormat::WebP)
        }
        _ => {
            tracing::warn!(
                "Unrecognized image format (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            None
        }
    }
}
