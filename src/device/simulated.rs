//! Simulated driver used when no hardware driver is installed.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DeviceConfiguration;
use crate::device::driver::{CaptureResult, ColorFrame, DepthFrame, PixelFormat};
use crate::error::DriverError;

/// Serial reported by every simulated device.
pub const SIMULATED_SERIAL: &str = "SIM000001";

/// BGRA fill of simulated colour frames.
const SIM_COLOR_BGRA: [u8; 4] = [100, 150, 200, 255];

/// Simulated depth range in millimetres.
const SIM_DEPTH_MM: std::ops::Range<u16> = 500..3000;

/// Produces deterministic frames shaped by the configuration.
///
/// Depth noise is seeded from the frame index, so the n-th capture of any
/// simulated session is identical.
#[derive(Debug)]
pub struct SimulatedDriver {
    config: DeviceConfiguration,
    started: bool,
    frame_index: u64,
}

impl SimulatedDriver {
    pub fn new(config: DeviceConfiguration) -> Self {
        Self {
            config,
            started: false,
            frame_index: 0,
        }
    }

    pub fn serial(&self) -> &str {
        SIMULATED_SERIAL
    }

    pub fn start(&mut self) -> Result<(), DriverError> {
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DriverError> {
        self.started = false;
        Ok(())
    }

    pub fn get_capture(&mut self) -> Result<CaptureResult, DriverError> {
        if !self.started {
            return Err(DriverError::Failed {
                reason: "simulated cameras are not running".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.frame_index);
        self.frame_index += 1;

        let color = self
            .config
            .color_resolution
            .dimensions()
            .map(|(width, height)| ColorFrame {
                width,
                height,
                format: PixelFormat::Bgra32,
                data: SIM_COLOR_BGRA.repeat(width * height),
            });

        let depth = self
            .config
            .depth_mode
            .dimensions()
            .map(|(width, height)| DepthFrame {
                width,
                height,
                data: (0..width * height)
                    .map(|_| rng.gen_range(SIM_DEPTH_MM))
                    .collect(),
            });

        // IR mirrors depth geometry; intensity falls off with distance.
        let ir = depth.as_ref().map(|d| DepthFrame {
            width: d.width,
            height: d.height,
            data: d.data.iter().map(|mm| 4000u16.saturating_sub(*mm)).collect(),
        });

        Ok(CaptureResult {
            color,
            depth,
            ir,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColorResolution, DepthMode};

    #[test]
    fn test_capture_requires_start() {
        let mut driver = SimulatedDriver::new(DeviceConfiguration::default());
        assert!(driver.get_capture().is_err());
        driver.start().unwrap();
        assert!(driver.get_capture().is_ok());
        driver.stop().unwrap();
        assert!(driver.get_capture().is_err());
    }

    #[test]
    fn test_shapes_follow_configuration() {
        let mut driver = SimulatedDriver::new(DeviceConfiguration {
            color_resolution: ColorResolution::Res1080p,
            depth_mode: DepthMode::Nfov2x2Binned,
            ..Default::default()
        });
        driver.start().unwrap();
        let capture = driver.get_capture().unwrap();
        assert_eq!(capture.color.unwrap().shape(), vec![1080, 1920, 4]);
        assert_eq!(capture.depth.unwrap().shape(), vec![288, 320]);
        assert_eq!(capture.ir.unwrap().shape(), vec![288, 320]);
    }

    #[test]
    fn test_off_streams_are_absent() {
        let mut driver = SimulatedDriver::new(DeviceConfiguration {
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::Off,
            ..Default::default()
        });
        driver.start().unwrap();
        let capture = driver.get_capture().unwrap();
        assert!(capture.color.is_none());
        assert!(capture.depth.is_none());
        assert!(capture.ir.is_none());
    }

    #[test]
    fn test_frames_are_deterministic() {
        let mut a = SimulatedDriver::new(DeviceConfiguration::default());
        let mut b = SimulatedDriver::new(DeviceConfiguration::default());
        a.start().unwrap();
        b.start().unwrap();
        let da = a.get_capture().unwrap().depth.unwrap().data;
        let db = b.get_capture().unwrap().depth.unwrap().data;
        assert_eq!(da, db);
        assert!(da.iter().all(|mm| SIM_DEPTH_MM.contains(mm)));
    }
}
