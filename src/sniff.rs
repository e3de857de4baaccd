//! Image type detection by magic bytes.
//!
//! Uploaded content is classified purely from its leading (and, for JPEG,
//! trailing) bytes.  Client-supplied metadata like the Content-Type header or
//! the filename extension is never consulted: both are trivially forgeable and
//! say nothing about what the bytes actually are.

/// The 8-byte signature every PNG file starts with.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// JPEG Start-Of-Image marker.
pub const JPEG_SOI: &[u8] = b"\xff\xd8";

/// JPEG End-Of-Image marker.
pub const JPEG_EOI: &[u8] = b"\xff\xd9";

/// An image format recognized by [`sniff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// The filename extension (without the dot) used when storing a file of
    /// this kind.  Chosen by the store, never by the client.
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }

    /// The canonical MIME type for this kind.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// Classify a byte sequence by its magic bytes.
///
/// Returns `None` for anything that isn't recognizably PNG or JPEG, including
/// empty input.  Pure function: no I/O, no side effects.
///
/// The JPEG check requires the SOI marker at the start and the EOI marker at
/// the end.  This is a coarse boundary check, not a parse of the segment
/// structure: a crafted payload with the right first and last two bytes will
/// classify as JPEG regardless of what's in between.
pub fn sniff(data: &[u8]) -> Option<ImageKind> {
    if data.starts_with(PNG_SIGNATURE) {
        return Some(ImageKind::Png);
    }

    if data.starts_with(JPEG_SOI) && data.ends_with(JPEG_EOI) {
        return Some(ImageKind::Jpeg);
    }

    None
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_png_signature() {
        let data = [PNG_SIGNATURE, b"fake_png_data"].concat();
        assert_eq!(sniff(&data), Some(ImageKind::Png));

        // the signature alone is enough
        assert_eq!(sniff(PNG_SIGNATURE), Some(ImageKind::Png));
    }

    #[test]
    fn test_jpeg_markers() {
        let data = [JPEG_SOI, b"fake_jpeg_data", JPEG_EOI].concat();
        assert_eq!(sniff(&data), Some(ImageKind::Jpeg));
    }

    #[test]
    fn test_jpeg_requires_both_markers() {
        // SOI without EOI
        let data = [JPEG_SOI, b"truncated"].concat();
        assert_eq!(sniff(&data), None);

        // EOI without SOI
        let data = [b"prefix" as &[u8], JPEG_EOI].concat();
        assert_eq!(sniff(&data), None);

        // SOI alone is too short to also end with EOI
        assert_eq!(sniff(JPEG_SOI), None);
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(sniff(b"not_an_image_at_all"), None);
        assert_eq!(sniff(b"GIF89a"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn test_truncated_png_signature() {
        assert_eq!(sniff(&PNG_SIGNATURE[..7]), None);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(ImageKind::Png.extension(), "png");
        assert_eq!(ImageKind::Jpeg.extension(), "jpg");
        assert_eq!(ImageKind::Png.mime_type(), "image/png");
        assert_eq!(ImageKind::Jpeg.mime_type(), "image/jpeg");
    }
}
