//! UVC depth camera driver using nokhwa.
//!
//! Targets sensors that expose depth as a grey stream over UVC. 16-bit
//! buffers are read little-endian; 8-bit buffers are widened as-is. Colour and
//! compressed frame formats are rejected.

use crate::live::{DepthDevice, DepthDriver, DepthStream, DeviceUri, DriverError, DriverFrame};
use nokhwa::Camera;
use nokhwa::pixel_format::LumaFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Buffer;
use std::time::Instant;
use tracing::{debug, info};

const DEPTH_WIDTH: u32 = 640;
const DEPTH_HEIGHT: u32 = 480;
const DEPTH_FPS: u32 = 30;

/// Depth samples from a raw `format` buffer holding `pixels` samples.
fn gray_samples(format: FrameFormat, bytes: &[u8], pixels: usize) -> Result<Vec<u16>, DriverError> {
    if format != FrameFormat::GRAY {
        return Err(DriverError::new(format!(
            "unsupported frame format {:?}, expected GRAY",
            format
        )));
    }

    if bytes.len() == pixels * 2 {
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    } else if bytes.len() == pixels {
        Ok(bytes.iter().map(|&b| u16::from(b)).collect())
    } else {
        Err(DriverError::new(format!(
            "GRAY buffer of {} bytes does not match {} pixels",
            bytes.len(),
            pixels
        )))
    }
}

/// Camera driver backed by the platform's native UVC API.
#[derive(Debug, Default)]
pub struct UvcDriver;

impl UvcDriver {
    pub fn new() -> Self {
        Self
    }

    /// List available devices.
    pub fn list_devices() -> Result<Vec<String>, DriverError> {
        let devices =
            nokhwa::query(ApiBackend::Auto).map_err(|e| DriverError::new(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|info| format!("{}: {}", info.index(), info.human_name()))
            .collect())
    }
}

impl DepthDriver for UvcDriver {
    fn name(&self) -> &str {
        "uvc"
    }

    fn initialize(&self) -> Result<(), DriverError> {
        let devices = Self::list_devices()?;
        if devices.is_empty() {
            return Err(DriverError::new("no UVC devices found"));
        }
        info!("UVC devices: {:?}", devices);
        Ok(())
    }

    fn shutdown(&self) {
        debug!("UVC driver has no global state to release");
    }

    fn open_device(&self, uri: &DeviceUri) -> Result<Box<dyn DepthDevice>, DriverError> {
        let index = match uri {
            DeviceUri::Any => CameraIndex::Index(0),
            DeviceUri::Uri(uri) => match uri.parse::<u32>() {
                Ok(index) => CameraIndex::Index(index),
                Err(_) => CameraIndex::String(uri.clone()),
            },
        };

        let gray = CameraFormat::new(
            Resolution::new(DEPTH_WIDTH, DEPTH_HEIGHT),
            FrameFormat::GRAY,
            DEPTH_FPS,
        );
        let requested = RequestedFormat::new::<LumaFormat>(RequestedFormatType::Closest(gray));
        let camera = Camera::new(index, requested).map_err(|e| DriverError::new(e.to_string()))?;

        Ok(Box::new(UvcDevice {
            camera: Some(camera),
        }))
    }
}

struct UvcDevice {
    camera: Option<Camera>,
}

impl DepthDevice for UvcDevice {
    fn create_depth_stream(&mut self) -> Result<Box<dyn DepthStream>, DriverError> {
        let camera = self
            .camera
            .take()
            .ok_or_else(|| DriverError::new("depth stream already created"))?;

        Ok(Box::new(UvcStream {
            camera,
            start_time: Instant::now(),
            pending: None,
        }))
    }
}

struct UvcStream {
    camera: Camera,
    start_time: Instant,
    pending: Option<Buffer>,
}

impl DepthStream for UvcStream {
    fn start(&mut self) -> Result<(), DriverError> {
        let format = self.camera.camera_format();
        if format.format() != FrameFormat::GRAY {
            return Err(DriverError::new(format!(
                "camera negotiated {:?}, expected a GRAY depth stream",
                format.format()
            )));
        }

        self.camera
            .open_stream()
            .map_err(|e| DriverError::new(e.to_string()))?;
        info!("UVC depth stream {:?}", format);
        self.start_time = Instant::now();
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<(), DriverError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| DriverError::new(e.to_string()))?;
        self.pending = Some(buffer);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<DriverFrame, DriverError> {
        let buffer = self
            .pending
            .take()
            .ok_or_else(|| DriverError::new("no frame is ready"))?;

        let resolution = buffer.resolution();
        let (width, height) = (resolution.width(), resolution.height());
        let pixels = width as usize * height as usize;
        let data = gray_samples(buffer.source_frame_format(), buffer.buffer(), pixels)?;
        let valid = data.len() == pixels;

        Ok(DriverFrame {
            width,
            height,
            timestamp_us: self.start_time.elapsed().as_micros() as u64,
            data,
            valid,
        })
    }

    fn stop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            debug!("Failed to stop UVC stream: {}", e);
        }
    }
}
