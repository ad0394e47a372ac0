//! Client-side helpers for image payloads and device info.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ExtendedColorType;

use crate::device::DeviceInfo;
use crate::error::RpcError;
use crate::rpc::types::ImagePayload;

/// Pixels decoded from an [`ImagePayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedImage {
    /// 8-bit samples, interleaved when `shape` has a channel axis.
    U8 { shape: Vec<usize>, data: Vec<u8> },
    /// 16-bit single channel samples (raw depth).
    U16 { shape: Vec<usize>, data: Vec<u16> },
}

impl DecodedImage {
    pub fn shape(&self) -> &[usize] {
        match self {
            DecodedImage::U8 { shape, .. } | DecodedImage::U16 { shape, .. } => shape,
        }
    }
}

/// Base64-decode the payload bytes as sent.
pub fn decode_image_data(payload: &ImagePayload) -> Result<Vec<u8>, RpcError> {
    STANDARD
        .decode(payload.image_data.as_bytes())
        .map_err(|e| RpcError::Decode(e.to_string()))
}

/// Decode a payload into pixels according to its format.
pub fn decode_image(payload: &ImagePayload) -> Result<DecodedImage, RpcError> {
    let bytes = decode_image_data(payload)?;
    let expected: usize = payload.shape.iter().product();

    match payload.format.as_str() {
        "BGR" | "RGB" => {
            if bytes.len() != expected {
                return Err(shape_error(payload, bytes.len()));
            }
            Ok(DecodedImage::U8 {
                shape: payload.shape.clone(),
                data: bytes,
            })
        }
        "RAW" => {
            if bytes.len() != expected * 2 {
                return Err(shape_error(payload, bytes.len()));
            }
            let data = bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            Ok(DecodedImage::U16 {
                shape: payload.shape.clone(),
                data,
            })
        }
        "NORMALIZED" => {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| RpcError::Decode(e.to_string()))?
                .to_luma8();
            Ok(DecodedImage::U8 {
                shape: vec![img.height() as usize, img.width() as usize],
                data: img.into_raw(),
            })
        }
        "JPEG" | "PNG" | "COLORMAP" => {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| RpcError::Decode(e.to_string()))?
                .to_rgb8();
            Ok(DecodedImage::U8 {
                shape: vec![img.height() as usize, img.width() as usize, 3],
                data: img.into_raw(),
            })
        }
        other => Err(RpcError::Decode(format!("unsupported image format: {other}"))),
    }
}

/// Write a payload to `path`.
///
/// Encoded payloads are written as received. Raw colour pixels are saved as
/// PNG; raw depth is written as little-endian 16-bit samples.
pub fn save_image_payload(payload: &ImagePayload, path: &Path) -> Result<(), RpcError> {
    match payload.format.as_str() {
        "BGR" | "RGB" => {
            let DecodedImage::U8 { shape, mut data } = decode_image(payload)? else {
                return Err(RpcError::Decode("expected 8-bit pixels".to_string()));
            };
            if payload.format == "BGR" {
                for px in data.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
            }
            let (height, width) = match shape.as_slice() {
                [h, w, 3] => (*h as u32, *w as u32),
                _ => return Err(shape_error(payload, data.len())),
            };
            image::save_buffer(path, &data, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| RpcError::Decode(e.to_string()))
        }
        _ => {
            std::fs::write(path, decode_image_data(payload)?)?;
            Ok(())
        }
    }
}

/// Human readable device summary.
pub fn format_device_info(info: &DeviceInfo, simulation_mode: bool) -> String {
    let modes = &info.available_modes;
    let frame_rates: Vec<String> = modes.frame_rates.iter().map(|r| r.to_string()).collect();

    let mut lines = vec![
        "=== Device Information ===".to_string(),
        format!("Connected: {}", info.connected),
        format!("Started: {}", info.started),
        format!("Serial: {}", info.serial.as_deref().unwrap_or("N/A")),
        format!("Simulation Mode: {simulation_mode}"),
        format!("Auto Capture: {}", info.auto_capture),
    ];
    if let Some(config) = &info.configuration {
        lines.push(format!(
            "Configuration: {} / {} @ {} fps",
            config.color_resolution, config.depth_mode, config.frame_rate
        ));
    }
    lines.push(format!(
        "Available color resolutions: {}",
        modes.color_resolutions.join(", ")
    ));
    lines.push(format!("Available depth modes: {}", modes.depth_modes.join(", ")));
    lines.push(format!("Available frame rates: {}", frame_rates.join(", ")));
    lines.join("\n")
}

/// Rough payload size in bytes for an image of `shape` in `format`.
pub fn estimate_image_size(shape: &[usize], format: &str) -> usize {
    let (height, width, channels) = match shape {
        [h, w] => (*h, *w, 1),
        [h, w, c, ..] => (*h, *w, *c),
        _ => return 0,
    };
    match format {
        "RAW" => height * width * 2,
        "JPEG" => height * width * channels / 10,
        _ => height * width * channels,
    }
}

fn shape_error(payload: &ImagePayload, len: usize) -> RpcError {
    RpcError::Decode(format!(
        "{} bytes do not match shape {:?} ({})",
        len, payload.shape, payload.format
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvailableModes, DeviceConfiguration};
    use crate::device::imaging::{ColorEncoding, DepthEncoding, encode_color, encode_depth};
    use crate::device::{ColorFrame, DepthFrame, PixelFormat};

    fn payload(format: &str, shape: Vec<usize>, bytes: &[u8]) -> ImagePayload {
        ImagePayload {
            image_data: STANDARD.encode(bytes),
            shape,
            format: format.to_string(),
            dtype: "uint8".to_string(),
            depth_range: None,
        }
    }

    #[test]
    fn test_decode_raw_depth() {
        let bytes: Vec<u8> = [500u16, 1500].iter().flat_map(|v| v.to_le_bytes()).collect();
        let decoded = decode_image(&payload("RAW", vec![1, 2], &bytes)).unwrap();
        assert_eq!(
            decoded,
            DecodedImage::U16 {
                shape: vec![1, 2],
                data: vec![500, 1500]
            }
        );
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = decode_image(&payload("BGR", vec![2, 2, 3], &[0; 5])).unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[test]
    fn test_decode_encoded_payloads() {
        let frame = DepthFrame {
            width: 3,
            height: 2,
            data: vec![100, 200, 300, 400, 500, 600],
        };
        let normalized = encode_depth(&frame, DepthEncoding::Normalized, 0, 4000).unwrap();
        let decoded =
            decode_image(&payload("NORMALIZED", normalized.shape, &normalized.data)).unwrap();
        assert_eq!(decoded.shape(), &[2, 3]);

        let color = ColorFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra32,
            data: vec![10; 16],
        };
        let png = encode_color(&color, ColorEncoding::Png, 95).unwrap();
        let decoded = decode_image(&payload("PNG", png.shape, &png.data)).unwrap();
        assert_eq!(decoded.shape(), &[2, 2, 3]);
    }

    #[test]
    fn test_save_payloads() {
        let dir = tempfile::tempdir().unwrap();

        let raw = payload("RAW", vec![1, 1], &[1, 2]);
        let raw_path = dir.path().join("depth.raw");
        save_image_payload(&raw, &raw_path).unwrap();
        assert_eq!(std::fs::read(&raw_path).unwrap(), vec![1, 2]);

        let bgr = payload("BGR", vec![1, 1, 3], &[255, 0, 0]);
        let png_path = dir.path().join("color.png");
        save_image_payload(&bgr, &png_path).unwrap();
        let img = image::open(&png_path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn test_format_device_info() {
        let info = DeviceInfo {
            connected: true,
            started: false,
            serial: Some("SIM000001".to_string()),
            auto_capture: false,
            configuration: Some(DeviceConfiguration::default()),
            available_modes: AvailableModes::all(),
        };
        let text = format_device_info(&info, true);
        assert!(text.starts_with("=== Device Information ==="));
        assert!(text.contains("Serial: SIM000001"));
        assert!(text.contains("Simulation Mode: true"));
        assert!(text.contains("Available frame rates: 5, 15, 30"));
    }

    #[test]
    fn test_estimate_image_size() {
        assert_eq!(estimate_image_size(&[720, 1280, 3], "BGR"), 2_764_800);
        assert_eq!(estimate_image_size(&[576, 640], "RAW"), 737_280);
        assert_eq!(estimate_image_size(&[100, 100, 3], "JPEG"), 3000);
        assert_eq!(estimate_image_size(&[5], "BGR"), 0);
    }
}
