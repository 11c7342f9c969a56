//! Live depth camera capture.
//!
//! The camera driver is process-global: it is initialized once and shut down
//! once, no matter how many devices are opened through it. [`CameraSubsystem`]
//! is the shared handle to that state; the driver is shut down when the last
//! handle (including the ones held by open [`LiveCamera`]s) is dropped.

use crate::source::{AcquisitionMode, CaptureError, DepthFrame, DepthImage, DepthSource};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reported by a camera driver call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Which device to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceUri {
    /// First device the driver enumerates.
    #[default]
    Any,
    /// Driver-specific device identifier.
    Uri(String),
}

impl fmt::Display for DeviceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceUri::Any => write!(f, "<any device>"),
            DeviceUri::Uri(uri) => write!(f, "{}", uri),
        }
    }
}

/// A depth frame as delivered by the driver.
#[derive(Debug, Clone)]
pub struct DriverFrame {
    pub width: u32,
    pub height: u32,
    /// Driver timestamp in microseconds.
    pub timestamp_us: u64,
    /// Row-major depth samples.
    pub data: Vec<u16>,
    /// Validity flag set by the driver.
    pub valid: bool,
}

impl DriverFrame {
    /// Driver-side validity check: flagged valid and sized consistently.
    pub fn is_valid(&self) -> bool {
        self.valid
            && self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize
    }
}

/// Process-wide camera driver.
pub trait DepthDriver {
    /// Human readable backend name for logs.
    fn name(&self) -> &str;

    /// Bring up the driver. Called once per process.
    fn initialize(&self) -> Result<(), DriverError>;

    /// Tear down the driver. Called once per process.
    fn shutdown(&self);

    /// Open a device.
    fn open_device(&self, uri: &DeviceUri) -> Result<Box<dyn DepthDevice>, DriverError>;
}

/// An open sensor device.
pub trait DepthDevice {
    /// Create the device's depth stream.
    fn create_depth_stream(&mut self) -> Result<Box<dyn DepthStream>, DriverError>;
}

/// A depth stream on an open device.
pub trait DepthStream {
    fn start(&mut self) -> Result<(), DriverError>;

    /// Block until a frame is ready. No timeout.
    fn wait_ready(&mut self) -> Result<(), DriverError>;

    /// Read the frame that [`wait_ready`](DepthStream::wait_ready) reported.
    fn read_frame(&mut self) -> Result<DriverFrame, DriverError>;

    fn stop(&mut self) {}
}

thread_local! {
    static SUBSYSTEM_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

struct SubsystemInner {
    driver: Box<dyn DepthDriver>,
}

impl Drop for SubsystemInner {
    fn drop(&mut self) {
        self.driver.shutdown();
        SUBSYSTEM_ACTIVE.set(false);
        info!("Camera subsystem ({}) shut down", self.driver.name());
    }
}

/// Shared handle to the initialized camera driver.
#[derive(Clone)]
pub struct CameraSubsystem {
    inner: Rc<SubsystemInner>,
}

impl CameraSubsystem {
    /// Initialize the camera driver.
    ///
    /// Fails if a subsystem is already live on this thread; clone the existing
    /// handle to open more devices.
    pub fn initialize<D: DepthDriver + 'static>(driver: D) -> Result<Self, CaptureError> {
        if SUBSYSTEM_ACTIVE.get() {
            return Err(CaptureError::DeviceInitFailed(
                "camera subsystem is already initialized".to_string(),
            ));
        }

        if let Err(e) = driver.initialize() {
            driver.shutdown();
            return Err(CaptureError::DeviceInitFailed(e.to_string()));
        }

        SUBSYSTEM_ACTIVE.set(true);
        info!("Camera subsystem ({}) initialized", driver.name());

        Ok(Self {
            inner: Rc::new(SubsystemInner {
                driver: Box::new(driver),
            }),
        })
    }

    /// Number of live handles, including those held by open cameras.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    fn driver(&self) -> &dyn DepthDriver {
        self.inner.driver.as_ref()
    }
}

/// Depth source reading from a live camera.
///
/// At most one depth stream is active per camera. The stream is stopped when
/// the camera is dropped; the driver itself shuts down with the last
/// [`CameraSubsystem`] handle.
pub struct LiveCamera {
    // Field order is drop order: stream, then device, then the subsystem.
    stream: Box<dyn DepthStream>,
    _device: Box<dyn DepthDevice>,
    _subsystem: CameraSubsystem,
    frame_count: u64,
}

impl LiveCamera {
    /// Initialize a subsystem with `driver` and open its first device.
    ///
    /// On failure the freshly initialized subsystem is shut down before the
    /// error is returned.
    pub fn new<D: DepthDriver + 'static>(driver: D) -> Result<Self, CaptureError> {
        let subsystem = CameraSubsystem::initialize(driver)?;
        Self::open(&subsystem, &DeviceUri::Any)
    }

    /// Open a device through an already initialized subsystem and start its
    /// depth stream.
    pub fn open(subsystem: &CameraSubsystem, uri: &DeviceUri) -> Result<Self, CaptureError> {
        let driver = subsystem.driver();

        let mut device = driver.open_device(uri).map_err(|e| {
            warn!("Failed to open {}: {}", uri, e);
            CaptureError::DeviceOpenFailed(e.to_string())
        })?;
        info!("Camera opened: {}", uri);

        let mut stream = device
            .create_depth_stream()
            .map_err(|e| CaptureError::StreamCreateFailed(e.to_string()))?;
        info!("Depth stream created");

        stream
            .start()
            .map_err(|e| CaptureError::StreamStartFailed(e.to_string()))?;
        info!("Depth stream started");

        Ok(Self {
            stream,
            _device: device,
            _subsystem: subsystem.clone(),
            frame_count: 0,
        })
    }
}

impl DepthSource for LiveCamera {
    fn next_frame(&mut self) -> Result<Option<DepthFrame>, CaptureError> {
        self.stream
            .wait_ready()
            .map_err(|e| CaptureError::StreamWaitFailed(e.to_string()))?;

        let frame = self
            .stream
            .read_frame()
            .map_err(|e| CaptureError::FrameInvalid(e.to_string()))?;

        if !frame.is_valid() {
            return Err(CaptureError::FrameInvalid(format!(
                "driver rejected {}x{} frame at {}us",
                frame.width, frame.height, frame.timestamp_us
            )));
        }

        self.frame_count += 1;
        debug!("Frame read, {}", frame.timestamp_us);

        let timestamp = frame.timestamp_us as f64 / 1_000_000.0;
        let image = DepthImage::from_raw(frame.width, frame.height, frame.data)
            .ok_or_else(|| CaptureError::FrameInvalid("sample buffer too small".to_string()))?;

        Ok(Some(DepthFrame::new(image, Some(timestamp), self.frame_count)))
    }

    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::LiveCamera
    }
}

impl Drop for LiveCamera {
    fn drop(&mut self) {
        self.stream.stop();
        info!("Depth stream stopped after {} frames", self.frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum FailAt {
        Nowhere,
        Init,
        Open,
        Create,
        Start,
    }

    #[derive(Default)]
    struct DriverLog {
        inits: usize,
        shutdowns: usize,
        opened: usize,
        stops: usize,
    }

    enum Delivery {
        Frame(DriverFrame),
        WaitError,
        ReadError,
    }

    struct MockDriver {
        fail_at: FailAt,
        log: Rc<RefCell<DriverLog>>,
        deliveries: Rc<RefCell<VecDeque<Delivery>>>,
    }

    impl MockDriver {
        fn new(fail_at: FailAt) -> (Self, Rc<RefCell<DriverLog>>, Rc<RefCell<VecDeque<Delivery>>>) {
            let log = Rc::new(RefCell::new(DriverLog::default()));
            let deliveries = Rc::new(RefCell::new(VecDeque::new()));
            let driver = Self {
                fail_at,
                log: log.clone(),
                deliveries: deliveries.clone(),
            };
            (driver, log, deliveries)
        }
    }

    impl DepthDriver for MockDriver {
        fn name(&self) -> &str {
            "mock"
        }

        fn initialize(&self) -> Result<(), DriverError> {
            self.log.borrow_mut().inits += 1;
            if self.fail_at == FailAt::Init {
                return Err(DriverError::new("no driver"));
            }
            Ok(())
        }

        fn shutdown(&self) {
            self.log.borrow_mut().shutdowns += 1;
        }

        fn open_device(&self, _uri: &DeviceUri) -> Result<Box<dyn DepthDevice>, DriverError> {
            if self.fail_at == FailAt::Open {
                return Err(DriverError::new("no device"));
            }
            self.log.borrow_mut().opened += 1;
            Ok(Box::new(MockDevice {
                fail_at: self.fail_at,
                log: self.log.clone(),
                deliveries: self.deliveries.clone(),
            }))
        }
    }

    struct MockDevice {
        fail_at: FailAt,
        log: Rc<RefCell<DriverLog>>,
        deliveries: Rc<RefCell<VecDeque<Delivery>>>,
    }

    impl DepthDevice for MockDevice {
        fn create_depth_stream(&mut self) -> Result<Box<dyn DepthStream>, DriverError> {
            if self.fail_at == FailAt::Create {
                return Err(DriverError::new("no depth sensor"));
            }
            Ok(Box::new(MockStream {
                fail_at: self.fail_at,
                log: self.log.clone(),
                deliveries: self.deliveries.clone(),
                pending: None,
            }))
        }
    }

    struct MockStream {
        fail_at: FailAt,
        log: Rc<RefCell<DriverLog>>,
        deliveries: Rc<RefCell<VecDeque<Delivery>>>,
        pending: Option<Delivery>,
    }

    impl DepthStream for MockStream {
        fn start(&mut self) -> Result<(), DriverError> {
            if self.fail_at == FailAt::Start {
                return Err(DriverError::new("busy"));
            }
            Ok(())
        }

        fn wait_ready(&mut self) -> Result<(), DriverError> {
            match self.deliveries.borrow_mut().pop_front() {
                Some(Delivery::WaitError) | None => Err(DriverError::new("wait failed")),
                Some(delivery) => {
                    self.pending = Some(delivery);
                    Ok(())
                }
            }
        }

        fn read_frame(&mut self) -> Result<DriverFrame, DriverError> {
            match self.pending.take() {
                Some(Delivery::Frame(frame)) => Ok(frame),
                _ => Err(DriverError::new("read failed")),
            }
        }

        fn stop(&mut self) {
            self.log.borrow_mut().stops += 1;
        }
    }

    fn frame(width: u32, height: u32, value: u16, valid: bool) -> DriverFrame {
        DriverFrame {
            width,
            height,
            timestamp_us: 33_000,
            data: vec![value; (width * height) as usize],
            valid,
        }
    }

    #[test]
    fn test_live_camera_reads_frames() {
        let (driver, _log, deliveries) = MockDriver::new(FailAt::Nowhere);
        deliveries
            .borrow_mut()
            .push_back(Delivery::Frame(frame(4, 3, 1200, true)));

        let mut camera = LiveCamera::new(driver).unwrap();
        assert_eq!(camera.mode(), AcquisitionMode::LiveCamera);

        let depth = camera.next_frame().unwrap().unwrap();
        assert_eq!(depth.dimensions(), (4, 3));
        assert_eq!(depth.image.get_pixel(2, 1).0[0], 1200);
        assert_eq!(depth.timestamp, Some(0.033));
        assert_eq!(depth.frame_number, 1);
    }

    #[test]
    fn test_wait_failure() {
        let (driver, _log, deliveries) = MockDriver::new(FailAt::Nowhere);
        deliveries.borrow_mut().push_back(Delivery::WaitError);

        let mut camera = LiveCamera::new(driver).unwrap();
        let err = camera.next_frame().unwrap_err();
        assert!(matches!(err, CaptureError::StreamWaitFailed(_)));
    }

    #[test]
    fn test_invalid_frame() {
        let (driver, _log, deliveries) = MockDriver::new(FailAt::Nowhere);
        deliveries
            .borrow_mut()
            .push_back(Delivery::Frame(frame(4, 3, 0, false)));
        deliveries.borrow_mut().push_back(Delivery::ReadError);

        let mut camera = LiveCamera::new(driver).unwrap();
        assert!(matches!(
            camera.next_frame().unwrap_err(),
            CaptureError::FrameInvalid(_)
        ));
        assert!(matches!(
            camera.next_frame().unwrap_err(),
            CaptureError::FrameInvalid(_)
        ));
    }

    #[test]
    fn test_mis_sized_frame_is_invalid() {
        let mut bad = frame(4, 3, 7, true);
        bad.data.truncate(5);
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_each_construction_failure_shuts_down_once() {
        let cases = [
            (FailAt::Init, "init"),
            (FailAt::Open, "open"),
            (FailAt::Create, "create"),
            (FailAt::Start, "start"),
        ];

        for (fail_at, label) in cases {
            let (driver, log, _) = MockDriver::new(fail_at);
            let err = LiveCamera::new(driver).err().unwrap();

            match fail_at {
                FailAt::Init => assert!(matches!(err, CaptureError::DeviceInitFailed(_))),
                FailAt::Open => assert!(matches!(err, CaptureError::DeviceOpenFailed(_))),
                FailAt::Create => assert!(matches!(err, CaptureError::StreamCreateFailed(_))),
                FailAt::Start => assert!(matches!(err, CaptureError::StreamStartFailed(_))),
                FailAt::Nowhere => unreachable!(),
            }
            assert_eq!(log.borrow().shutdowns, 1, "{label}");
            assert!(!SUBSYSTEM_ACTIVE.get(), "{label}");
        }
    }

    #[test]
    fn test_subsystem_shuts_down_once_for_many_cameras() {
        let (driver, log, _) = MockDriver::new(FailAt::Nowhere);
        let subsystem = CameraSubsystem::initialize(driver).unwrap();

        let first = LiveCamera::open(&subsystem, &DeviceUri::Any).unwrap();
        let second = LiveCamera::open(&subsystem, &DeviceUri::Uri("dev/1".into())).unwrap();
        assert_eq!(subsystem.handle_count(), 3);
        assert_eq!(log.borrow().opened, 2);

        drop(first);
        drop(subsystem);
        assert_eq!(log.borrow().shutdowns, 0);

        drop(second);
        let log = log.borrow();
        assert_eq!(log.inits, 1);
        assert_eq!(log.shutdowns, 1);
        assert_eq!(log.stops, 2);
    }

    #[test]
    fn test_second_initialize_is_rejected() {
        let (first, _, _) = MockDriver::new(FailAt::Nowhere);
        let (second, second_log, _) = MockDriver::new(FailAt::Nowhere);

        let _subsystem = CameraSubsystem::initialize(first).unwrap();
        let err = CameraSubsystem::initialize(second).err().unwrap();

        assert!(matches!(err, CaptureError::DeviceInitFailed(_)));
        assert_eq!(second_log.borrow().inits, 0);
    }
}
