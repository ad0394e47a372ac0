//! Image derivation from cached frames.
//!
//! Colour frames arrive as BGRA and are served as raw BGR/RGB pixels or
//! encoded as JPEG/PNG. Depth frames are clipped to a millimetre range and
//! served raw, normalised to 8 bits, or false-coloured with a JET palette.

use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::device::driver::{ColorFrame, DepthFrame};
use crate::error::ImageError;

/// Requested form of a colour image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorEncoding {
    Bgr,
    Rgb,
    Jpeg,
    Png,
}

impl ColorEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorEncoding::Bgr => "BGR",
            ColorEncoding::Rgb => "RGB",
            ColorEncoding::Jpeg => "JPEG",
            ColorEncoding::Png => "PNG",
        }
    }
}

impl FromStr for ColorEncoding {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BGR" => Ok(ColorEncoding::Bgr),
            "RGB" => Ok(ColorEncoding::Rgb),
            "JPEG" | "JPG" => Ok(ColorEncoding::Jpeg),
            "PNG" => Ok(ColorEncoding::Png),
            _ => Err(ImageError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ColorEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested form of a depth image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthEncoding {
    Raw,
    Normalized,
    Colormap,
}

impl DepthEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthEncoding::Raw => "RAW",
            DepthEncoding::Normalized => "NORMALIZED",
            DepthEncoding::Colormap => "COLORMAP",
        }
    }
}

impl FromStr for DepthEncoding {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RAW" => Ok(DepthEncoding::Raw),
            "NORMALIZED" => Ok(DepthEncoding::Normalized),
            "COLORMAP" => Ok(DepthEncoding::Colormap),
            _ => Err(ImageError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for DepthEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample type of a raw pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::U8 => "uint8",
            SampleType::U16 => "uint16",
        }
    }
}

/// Bytes of a derived image plus the metadata a caller needs to interpret them.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    /// `[h, w]` or `[h, w, channels]` of the pixel data.
    pub shape: Vec<usize>,
    pub format: String,
    pub dtype: SampleType,
    /// `[min, max]` of the clipped depth data.
    pub depth_range: Option<[u16; 2]>,
}

/// Derive a colour image from a BGRA frame.
///
/// `quality` only applies to JPEG and must be within 1..=100.
pub fn encode_color(
    frame: &ColorFrame,
    encoding: ColorEncoding,
    quality: i64,
) -> Result<EncodedImage, ImageError> {
    let pixels = frame.width * frame.height;
    if frame.data.len() != pixels * frame.format.channels() {
        return Err(ImageError::ShapeMismatch {
            width: frame.width,
            height: frame.height,
        });
    }

    let (width, height) = dimensions_u32(frame.width, frame.height)?;
    let shape = vec![frame.height, frame.width, 3];

    let data = match encoding {
        ColorEncoding::Bgr => bgra_to_bgr(&frame.data),
        ColorEncoding::Rgb => bgra_to_rgb(&frame.data),
        ColorEncoding::Jpeg => {
            let quality = u8::try_from(quality)
                .ok()
                .filter(|q| (1..=100).contains(q))
                .ok_or(ImageError::InvalidQuality(quality))?;
            let rgb = bgra_to_rgb(&frame.data);
            let mut buffer = Vec::new();
            JpegEncoder::new_with_quality(&mut buffer, quality)
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ImageError::Encode(e.to_string()))?;
            buffer
        }
        ColorEncoding::Png => {
            png_bytes(&bgra_to_rgb(&frame.data), width, height, ExtendedColorType::Rgb8)?
        }
    };

    Ok(EncodedImage {
        data,
        shape,
        format: encoding.to_string(),
        dtype: SampleType::U8,
        depth_range: None,
    })
}

/// Derive a depth image, clipping samples to `[min_depth, max_depth]` first.
pub fn encode_depth(
    frame: &DepthFrame,
    encoding: DepthEncoding,
    min_depth: u16,
    max_depth: u16,
) -> Result<EncodedImage, ImageError> {
    if min_depth > max_depth {
        return Err(ImageError::InvalidDepthRange {
            min: min_depth,
            max: max_depth,
        });
    }
    if frame.data.len() != frame.width * frame.height {
        return Err(ImageError::ShapeMismatch {
            width: frame.width,
            height: frame.height,
        });
    }

    let clipped: Vec<u16> = frame
        .data
        .iter()
        .map(|v| (*v).clamp(min_depth, max_depth))
        .collect();
    let lo = clipped.iter().copied().min().unwrap_or(min_depth);
    let hi = clipped.iter().copied().max().unwrap_or(max_depth);

    let (width, height) = dimensions_u32(frame.width, frame.height)?;

    let (data, shape, dtype) = match encoding {
        DepthEncoding::Raw => {
            let bytes = clipped.iter().flat_map(|v| v.to_le_bytes()).collect();
            (bytes, vec![frame.height, frame.width], SampleType::U16)
        }
        DepthEncoding::Normalized => {
            let norm = normalize(&clipped, lo, hi);
            let png = png_bytes(&norm, width, height, ExtendedColorType::L8)?;
            (png, vec![frame.height, frame.width], SampleType::U8)
        }
        DepthEncoding::Colormap => {
            let rgb: Vec<u8> = normalize(&clipped, lo, hi)
                .into_iter()
                .flat_map(|v| jet(f32::from(v) / 255.0))
                .collect();
            let png = png_bytes(&rgb, width, height, ExtendedColorType::Rgb8)?;
            (png, vec![frame.height, frame.width, 3], SampleType::U8)
        }
    };

    Ok(EncodedImage {
        data,
        shape,
        format: encoding.to_string(),
        dtype,
        depth_range: Some([lo, hi]),
    })
}

/// JET palette lookup for `x` in `[0, 1]`, as RGB.
pub fn jet(x: f32) -> [u8; 3] {
    let x = x.clamp(0.0, 1.0);
    let channel = |offset: f32| {
        let v = (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Min-max normalise to the full 8-bit range. A flat image maps to zero.
fn normalize(samples: &[u16], lo: u16, hi: u16) -> Vec<u8> {
    let span = u32::from(hi - lo);
    if span == 0 {
        return vec![0; samples.len()];
    }
    samples
        .iter()
        .map(|v| ((u32::from(v - lo) * 255 + span / 2) / span) as u8)
        .collect()
}

fn bgra_to_bgr(bgra: &[u8]) -> Vec<u8> {
    bgra.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

fn bgra_to_rgb(bgra: &[u8]) -> Vec<u8> {
    bgra.chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

fn png_bytes(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(pixels, width, height, color)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn dimensions_u32(width: usize, height: usize) -> Result<(u32, u32), ImageError> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(ImageError::ShapeMismatch { width, height }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::driver::PixelFormat;
    use pretty_assertions::assert_eq;

    fn color_frame() -> ColorFrame {
        // 2x1: one pure-blue and one pure-red pixel in BGRA.
        ColorFrame {
            width: 2,
            height: 1,
            format: PixelFormat::Bgra32,
            data: vec![255, 0, 0, 255, 0, 0, 255, 255],
        }
    }

    fn depth_frame() -> DepthFrame {
        DepthFrame {
            width: 4,
            height: 1,
            data: vec![100, 500, 1500, 6000],
        }
    }

    #[test]
    fn test_bgr_and_rgb_drop_alpha() {
        let bgr = encode_color(&color_frame(), ColorEncoding::Bgr, 95).unwrap();
        assert_eq!(bgr.data, vec![255, 0, 0, 0, 0, 255]);
        assert_eq!(bgr.shape, vec![1, 2, 3]);

        let rgb = encode_color(&color_frame(), ColorEncoding::Rgb, 95).unwrap();
        assert_eq!(rgb.data, vec![0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn test_jpeg_quality_bounds() {
        let frame = color_frame();
        for bad in [0, 101, -5] {
            let err = encode_color(&frame, ColorEncoding::Jpeg, bad).unwrap_err();
            assert!(matches!(err, ImageError::InvalidQuality(q) if q == bad));
        }
        let jpeg = encode_color(&frame, ColorEncoding::Jpeg, 80).unwrap();
        assert_eq!(&jpeg.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_signature() {
        let png = encode_color(&color_frame(), ColorEncoding::Png, 95).unwrap();
        assert_eq!(&png.data[1..4], b"PNG");
        assert_eq!(png.format, "PNG");
    }

    #[test]
    fn test_raw_depth_is_clipped() {
        let raw = encode_depth(&depth_frame(), DepthEncoding::Raw, 200, 4000).unwrap();
        let samples: Vec<u16> = raw
            .data
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![200, 500, 1500, 4000]);
        assert_eq!(raw.depth_range, Some([200, 4000]));
        assert_eq!(raw.shape, vec![1, 4]);
        assert_eq!(raw.dtype, SampleType::U16);
    }

    #[test]
    fn test_clip_bounds_are_inclusive() {
        let frame = DepthFrame {
            width: 2,
            height: 1,
            data: vec![500, 1500],
        };
        let raw = encode_depth(&frame, DepthEncoding::Raw, 500, 1500).unwrap();
        assert_eq!(raw.depth_range, Some([500, 1500]));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = encode_depth(&depth_frame(), DepthEncoding::Raw, 3000, 100).unwrap_err();
        assert!(matches!(err, ImageError::InvalidDepthRange { min: 3000, max: 100 }));
    }

    #[test]
    fn test_normalize_spans_full_range() {
        assert_eq!(normalize(&[10, 20, 30], 10, 30), vec![0, 128, 255]);
        assert_eq!(normalize(&[7, 7], 7, 7), vec![0, 0]);
    }

    #[test]
    fn test_colormap_shape() {
        let img = encode_depth(&depth_frame(), DepthEncoding::Colormap, 0, 4000).unwrap();
        assert_eq!(img.shape, vec![1, 4, 3]);
        assert_eq!(img.format, "COLORMAP");
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
        assert_eq!(jet(0.5), [128, 255, 128]);
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("jpeg".parse::<ColorEncoding>().unwrap(), ColorEncoding::Jpeg);
        assert!("TIFF".parse::<ColorEncoding>().is_err());
        assert_eq!(
            "normalized".parse::<DepthEncoding>().unwrap(),
            DepthEncoding::Normalized
        );
    }
}
