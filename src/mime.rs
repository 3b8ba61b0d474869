//! Image format detection from leading bytes and declared media types.

/// Formats recognised by their file signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Svg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Svg => "image/svg+xml",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Svg => "svg",
        }
    }

    /// Map a media type essence (see [`media_type_essence`]) to a format.
    pub fn from_mime(essence: &str) -> Option<Self> {
        match essence {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/tiff" => Some(Self::Tiff),
            "image/svg+xml" => Some(Self::Svg),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }
}

/// Number of leading bytes worth inspecting for a signature.
pub const SNIFF_LEN: usize = 512;

pub fn detect_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.len() < 4 {
        return None;
    }

    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        [0x52, 0x49, 0x46, 0x46, ..] => Some(ImageFormat::Webp),
        [0x42, 0x4D, ..] => Some(ImageFormat::Bmp),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        _ if looks_like_svg(bytes) => Some(ImageFormat::Svg),
        _ => None,
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let head = &head[start..];

    head.starts_with(b"<?xml") || head.starts_with(b"<svg")
}

/// Parse a `Content-Type` value down to its lower-cased `type/subtype`,
/// dropping parameters. Returns `None` for values that are not a media type.
pub fn media_type_essence(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;

    let is_token = |s: &str| {
        !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
    };
    if !is_token(kind) || !is_token(subtype) {
        return None;
    }

    // Common non-standard alias.
    if essence == "image/jpg" || essence == "image/pjpeg" {
        return Some("image/jpeg".to_string());
    }

    Some(essence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_png() {
        assert_eq!(
            detect_image_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            Some(ImageFormat::Png)
        );
    }

    #[test]
    fn test_truncated_png_signature_is_rejected() {
        assert_eq!(detect_image_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), None);
    }

    #[test]
    fn test_detect_jpeg() {
        assert_eq!(
            detect_image_format(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn test_detect_gif_variants() {
        assert_eq!(detect_image_format(b"GIF87a.."), Some(ImageFormat::Gif));
        assert_eq!(detect_image_format(b"GIF89a.."), Some(ImageFormat::Gif));
        assert_eq!(detect_image_format(b"GIF88a.."), None);
    }

    #[test]
    fn test_detect_webp() {
        assert_eq!(
            detect_image_format(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            Some(ImageFormat::Webp)
        );
    }

    #[test]
    fn test_detect_bmp_and_tiff() {
        assert_eq!(detect_image_format(b"BM\x00\x00"), Some(ImageFormat::Bmp));
        assert_eq!(
            detect_image_format(&[0x49, 0x49, 0x2A, 0x00]),
            Some(ImageFormat::Tiff)
        );
        assert_eq!(
            detect_image_format(&[0x4D, 0x4D, 0x00, 0x2A]),
            Some(ImageFormat::Tiff)
        );
    }

    #[test]
    fn test_detect_svg() {
        assert_eq!(
            detect_image_format(b"<?xml version=\"1.0\"?><svg/>"),
            Some(ImageFormat::Svg)
        );
        assert_eq!(
            detect_image_format(b"\xEF\xBB\xBF  <svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some(ImageFormat::Svg)
        );
    }

    #[test]
    fn test_html_is_not_an_image() {
        assert_eq!(detect_image_format(b"<!DOCTYPE html><html>"), None);
    }

    #[test]
    fn test_short_input_is_rejected() {
        assert_eq!(detect_image_format(&[]), None);
        assert_eq!(detect_image_format(&[0xFF, 0xD8, 0xFF]), None);
    }

    #[test]
    fn test_media_type_essence_strips_parameters() {
        assert_eq!(
            media_type_essence("Image/PNG; charset=binary").as_deref(),
            Some("image/png")
        );
        assert_eq!(media_type_essence("image/jpg").as_deref(), Some("image/jpeg"));
        assert_eq!(media_type_essence("not a type"), None);
        assert_eq!(media_type_essence(""), None);
        assert_eq!(media_type_essence("image/"), None);
    }

    #[test]
    fn test_format_mime_roundtrip() {
        for format in [
            ImageFormat::Jpeg,
            ImageFormat::Png,
            ImageFormat::Gif,
            ImageFormat::Webp,
            ImageFormat::Bmp,
            ImageFormat::Tiff,
            ImageFormat::Svg,
        ] {
            assert_eq!(ImageFormat::from_mime(format.mime_type()), Some(format));
            assert_eq!(ImageFormat::from_extension(format.extension()), Some(format));
        }
    }
}
