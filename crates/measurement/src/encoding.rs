//! JPEG encoding of the capture surface.

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use video_ingest::Frame;

use crate::error::EncodeError;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Encode the surface as a lossy JPEG at `quality` (1-100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    if frame.data.len() != frame.expected_len() {
        return Err(EncodeError(format!(
            "surface holds {} bytes, expected {}",
            frame.data.len(),
            frame.expected_len()
        )));
    }
    let image = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
        .ok_or_else(|| EncodeError("surface dimensions do not match data".into()))?;

    let mut buffer = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| EncodeError(err.to_string()))?;
    Ok(buffer)
}

/// Wrap JPEG bytes in the data URL form the backend expects.
pub fn to_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(jpeg, &mut url);
    url
}

/// Decode an image the backend sent back, either as a data URL or as bare base64.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => encoded,
    };
    STANDARD.decode(payload.trim())
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    #[test]
    fn encodes_a_decodable_jpeg() {
        let mut frame = Frame::blank(64, 48, FrameFormat::Bgr8);
        for (i, px) in frame.data.chunks_exact_mut(3).enumerate() {
            px[0] = (i % 255) as u8;
        }
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn rejects_truncated_surface() {
        let mut frame = Frame::blank(4, 4, FrameFormat::Rgb8);
        frame.data.truncate(10);
        assert!(matches!(
            encode_jpeg(&frame, 80),
            Err(EncodeError(_))
        ));
    }

    #[test]
    fn decodes_data_url_and_bare_base64() {
        assert_eq!(
            decode_image("data:image/png;base64,iVBORw==").unwrap(),
            &[0x89, 0x50, 0x4E, 0x47]
        );
        assert_eq!(decode_image("/9j/").unwrap(), &[0xFF, 0xD8, 0xFF]);
        assert!(decode_image("data:image/png;base64,***").is_err());
    }

    #[test]
    fn data_url_has_jpeg_prefix() {
        let url = to_data_url(&[0xFF, 0xD8, 0xFF]);
        assert_eq!(url, "data:image/jpeg;base64,/9j/");
    }
}
