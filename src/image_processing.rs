use anyhow::{Result, anyhow};
use image::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

pub fn sniff_format(bytes: &[u8]) -> Result<SniffedFormat> {
    let format = image::guess_format(bytes).map_err(|err| anyhow!("unrecognized image data: {err}"))?;
    let (mime_type, extension) = match format {
        ImageFormat::Png => ("image/png", "png"),
        ImageFormat::Jpeg => ("image/jpeg", "jpg"),
        ImageFormat::WebP => ("image/webp", "webp"),
        ImageFormat::Gif => ("image/gif", "gif"),
        ImageFormat::Bmp => ("image/bmp", "bmp"),
        other => return Err(anyhow!("unsupported image format: {other:?}")),
    };
    Ok(SniffedFormat {
        mime_type,
        extension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 16] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
    ];

    #[test]
    fn sniffs_png_and_jpeg() {
        assert_eq!(sniff_format(&PNG_HEADER).unwrap().extension, "png");
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(sniff_format(&jpeg).unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn rejects_non_image_payloads() {
        assert!(sniff_format(b"{\"error\":\"nope\"}").is_err());
    }
}
