//! In-process camera SDK and USB bus for tests and demos.
//!
//! [`MockSdk`] serves frames of a constant color in any supported pixel
//! format and can be scripted to time out, fail buffer returns, reject
//! features or wedge until a bus reset. [`MockBus`] resets it.

use super::{AccessMode, BusError, BusPort, BusResetter, CameraDevice, DeviceIdentity, DeviceSdk, RawFrame, SdkError};
use crate::capture::{ColorSite, PixelFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const STATUS_NOT_FOUND: i32 = -3;
const STATUS_INVALID_PARAMETER: i32 = -5;
const STATUS_INVALID_CALL: i32 = -8;
const STATUS_INVALID_ACCESS: i32 = -9;
const STATUS_NOT_INIT_API: i32 = -13;

/// Mock camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Format name as accepted by `PixelFormat::from_str`.
    pub pixel_format: String,
    /// Scene color as `[r, g, b]`.
    pub color: [u8; 3],
    /// Delay between delivered frames.
    pub frame_interval_ms: u64,
    /// 1-based dequeue call from which the camera stops delivering until the
    /// bus is reset.
    pub fault_at: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            pixel_format: "bayer_rg8".to_string(),
            color: [200, 120, 40],
            frame_interval_ms: 5,
            fault_at: None,
        }
    }
}

impl MockConfig {
    /// Resolved pixel format; unknown names map to an unsupported code.
    pub fn format(&self) -> PixelFormat {
        self.pixel_format
            .parse()
            .unwrap_or(PixelFormat::Other(0))
    }
}

#[derive(Debug)]
struct MockState {
    width: u32,
    height: u32,
    format: PixelFormat,
    color: [u8; 3],
    frame_interval: Duration,

    devices_present: u32,
    library_inits: u32,
    library_closes: u32,
    library_init_error: Option<SdkError>,

    open_handles: u32,
    max_open_handles: u32,
    total_opens: u64,
    streaming: bool,
    features: HashMap<String, f64>,
    rejected_features: HashSet<String>,

    dequeue_calls: u64,
    enqueue_calls: u64,
    timeout_on: BTreeSet<u64>,
    corrupt_on: BTreeSet<u64>,
    fail_enqueue_on: BTreeSet<u64>,
    outstanding: HashSet<u64>,
    wedge_at: Option<u64>,
    wedged: bool,
    next_buffer_id: u64,
}

enum Delivery {
    Frame(RawFrame, Duration),
    Timeout,
}

/// Mock vendor SDK. Clones share the same simulated camera.
#[derive(Debug, Clone)]
pub struct MockSdk {
    state: Arc<Mutex<MockState>>,
}

impl MockSdk {
    /// A simulated camera with one device present.
    pub fn new(config: &MockConfig) -> Self {
        let state = MockState {
            width: config.width,
            height: config.height,
            format: config.format(),
            color: config.color,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            devices_present: 1,
            library_inits: 0,
            library_closes: 0,
            library_init_error: None,
            open_handles: 0,
            max_open_handles: 0,
            total_opens: 0,
            streaming: false,
            features: HashMap::new(),
            rejected_features: HashSet::new(),
            dequeue_calls: 0,
            enqueue_calls: 0,
            timeout_on: BTreeSet::new(),
            corrupt_on: BTreeSet::new(),
            fail_enqueue_on: BTreeSet::new(),
            outstanding: HashSet::new(),
            wedge_at: config.fault_at,
            wedged: false,
            next_buffer_id: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Sets how many cameras enumeration reports.
    pub fn set_devices_present(&self, count: u32) {
        self.lock().devices_present = count;
    }

    /// Makes the `call`-th dequeue (1-based, counted across handles) time out.
    pub fn timeout_on_dequeue(&self, call: u64) {
        self.lock().timeout_on.insert(call);
    }

    /// Makes the `call`-th dequeue deliver an empty buffer whose header
    /// claims `u32::MAX` by `u32::MAX` pixels.
    pub fn corrupt_frame_on(&self, call: u64) {
        self.lock().corrupt_on.insert(call);
    }

    /// Makes the `call`-th buffer return (1-based) fail.
    pub fn fail_enqueue_on(&self, call: u64) {
        self.lock().fail_enqueue_on.insert(call);
    }

    /// From the `call`-th dequeue on, time out until the bus is reset.
    pub fn wedge_at(&self, call: u64) {
        self.lock().wedge_at = Some(call);
    }

    /// Makes setting `name` fail.
    pub fn reject_feature(&self, name: &str) {
        self.lock().rejected_features.insert(name.to_string());
    }

    /// Makes `init_library` fail.
    pub fn fail_library_init(&self) {
        self.lock().library_init_error = Some(SdkError::new(STATUS_NOT_INIT_API, "library init failed"));
    }

    /// Last value written to a feature. Enumeration values read back as `f64`.
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.lock().features.get(name).copied()
    }

    pub fn open_handles(&self) -> u32 {
        self.lock().open_handles
    }

    /// Highest number of handles that were ever open at once.
    pub fn max_open_handles(&self) -> u32 {
        self.lock().max_open_handles
    }

    pub fn total_opens(&self) -> u64 {
        self.lock().total_opens
    }

    pub fn dequeue_calls(&self) -> u64 {
        self.lock().dequeue_calls
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn is_wedged(&self) -> bool {
        self.lock().wedged
    }

    pub fn library_inits(&self) -> u32 {
        self.lock().library_inits
    }

    pub fn library_closes(&self) -> u32 {
        self.lock().library_closes
    }

    /// A bus on which this camera is attached under `identity`.
    pub fn bus(&self, identity: DeviceIdentity) -> MockBus {
        let bus = MockBus::new();
        {
            let mut state = lock(&bus.state);
            state.attached.insert(identity);
            state.camera = Some(Arc::clone(&self.state));
        }
        bus
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceSdk for MockSdk {
    fn init_library(&self) -> Result<(), SdkError> {
        let mut state = self.lock();
        if let Some(err) = state.library_init_error.clone() {
            return Err(err);
        }
        state.library_inits += 1;
        Ok(())
    }

    fn close_library(&self) {
        self.lock().library_closes += 1;
    }

    fn refresh_device_list(&self, _timeout: Duration) -> Result<u32, SdkError> {
        let state = self.lock();
        if state.library_inits == state.library_closes {
            return Err(SdkError::new(STATUS_NOT_INIT_API, "library not initialized"));
        }
        Ok(state.devices_present)
    }

    fn open(&self, index: u32, access: AccessMode) -> Result<Box<dyn CameraDevice>, SdkError> {
        let mut state = self.lock();
        if index >= state.devices_present {
            return Err(SdkError::new(STATUS_NOT_FOUND, format!("no device at index {index}")));
        }
        if access == AccessMode::Exclusive && state.open_handles > 0 {
            return Err(SdkError::new(STATUS_INVALID_ACCESS, "device already opened"));
        }
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        state.total_opens += 1;
        tracing::debug!(index, total_opens = state.total_opens, "MockSdk opened camera");
        Ok(Box::new(MockCamera {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Handle returned by [`MockSdk::open`].
struct MockCamera {
    state: Arc<Mutex<MockState>>,
}

impl MockCamera {
    fn set_feature(&mut self, name: &str, value: f64) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        if state.rejected_features.contains(name) {
            return Err(SdkError::new(STATUS_INVALID_PARAMETER, format!("feature {name} not supported")));
        }
        state.features.insert(name.to_string(), value);
        Ok(())
    }

    fn next_delivery(&mut self) -> Result<Delivery, SdkError> {
        let mut state = lock(&self.state);
        if !state.streaming {
            return Err(SdkError::new(STATUS_INVALID_CALL, "stream not started"));
        }
        state.dequeue_calls += 1;
        let call = state.dequeue_calls;
        if state.wedge_at == Some(call) {
            state.wedged = true;
        }
        if state.wedged || state.timeout_on.remove(&call) {
            return Ok(Delivery::Timeout);
        }

        state.next_buffer_id += 1;
        let buffer_id = state.next_buffer_id;
        state.outstanding.insert(buffer_id);
        if state.corrupt_on.remove(&call) {
            let frame = RawFrame::new(Vec::new(), u32::MAX, u32::MAX, state.format, buffer_id);
            return Ok(Delivery::Frame(frame, state.frame_interval));
        }
        let data = synthesize(state.color, state.width as usize, state.height as usize, state.format);
        let frame = RawFrame::new(data, state.width, state.height, state.format, buffer_id);
        Ok(Delivery::Frame(frame, state.frame_interval))
    }
}

impl CameraDevice for MockCamera {
    fn set_enum(&mut self, name: &str, value: i64) -> Result<(), SdkError> {
        self.set_feature(name, value as f64)
    }

    fn set_float(&mut self, name: &str, value: f64) -> Result<(), SdkError> {
        self.set_feature(name, value)
    }

    fn start_stream(&mut self) -> Result<(), SdkError> {
        lock(&self.state).streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), SdkError> {
        lock(&self.state).streaming = false;
        Ok(())
    }

    fn dequeue_buffer(&mut self, timeout: Duration) -> Result<RawFrame, SdkError> {
        // Sleep outside the lock so test threads can script faults meanwhile.
        match self.next_delivery()? {
            Delivery::Frame(frame, interval) => {
                thread::sleep(interval.min(timeout));
                Ok(frame)
            }
            Delivery::Timeout => {
                thread::sleep(timeout);
                Err(SdkError::timeout())
            }
        }
    }

    fn enqueue_buffer(&mut self, frame: RawFrame) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.enqueue_calls += 1;
        let call = state.enqueue_calls;
        if !state.outstanding.remove(&frame.buffer_id()) {
            return Err(SdkError::new(
                STATUS_INVALID_PARAMETER,
                format!("buffer {} was not dequeued", frame.buffer_id()),
            ));
        }
        if state.fail_enqueue_on.remove(&call) {
            return Err(SdkError::new(STATUS_INVALID_CALL, "buffer queue rejected"));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.streaming = false;
        state.open_handles = state.open_handles.saturating_sub(1);
        state.outstanding.clear();
        Ok(())
    }
}

/// Fills a raw buffer so every pixel reads as `rgb` in `format`.
fn synthesize(rgb: [u8; 3], width: usize, height: usize, format: PixelFormat) -> Vec<u8> {
    let [r, g, b] = rgb;
    if let Some(phase) = format.bayer_phase() {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(match phase.site(x, y) {
                    ColorSite::Red => r,
                    ColorSite::Green => g,
                    ColorSite::Blue => b,
                });
            }
        }
        return data;
    }
    match format {
        PixelFormat::Rgb8 => [r, g, b].repeat(width * height),
        PixelFormat::Bgr8 => [b, g, r].repeat(width * height),
        _ => vec![g; width * height],
    }
}

#[derive(Debug, Default)]
struct BusState {
    attached: HashSet<DeviceIdentity>,
    camera: Option<Arc<Mutex<MockState>>>,
    resets: u64,
    open_ports: u32,
    fail_resets: bool,
}

/// Mock USB bus. Resetting an attached camera clears a wedge.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device with no camera behind it.
    pub fn attach(&self, identity: DeviceIdentity) {
        lock(&self.state).attached.insert(identity);
    }

    /// Makes every reset fail.
    pub fn fail_resets(&self, fail: bool) {
        lock(&self.state).fail_resets = fail;
    }

    /// Number of successful resets.
    pub fn resets(&self) -> u64 {
        lock(&self.state).resets
    }

    pub fn open_ports(&self) -> u32 {
        lock(&self.state).open_ports
    }
}

impl BusResetter for MockBus {
    fn open(&self, identity: DeviceIdentity) -> Result<Box<dyn BusPort>, BusError> {
        let mut state = lock(&self.state);
        if !state.attached.contains(&identity) {
            return Err(BusError::NotFound(identity));
        }
        state.open_ports += 1;
        Ok(Box::new(MockPort {
            bus: Arc::clone(&self.state),
        }))
    }
}

struct MockPort {
    bus: Arc<Mutex<BusState>>,
}

impl BusPort for MockPort {
    fn reset(&mut self) -> Result<(), BusError> {
        let mut bus = lock(&self.bus);
        if bus.fail_resets {
            return Err(BusError::ResetFailed("LIBUSB_ERROR_IO".to_string()));
        }
        bus.resets += 1;
        if let Some(camera) = &bus.camera {
            lock(camera).wedged = false;
        }
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut bus = lock(&self.bus);
        bus.open_ports = bus.open_ports.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode;

    fn sdk() -> MockSdk {
        let config = MockConfig {
            width: 8,
            height: 6,
            frame_interval_ms: 0,
            ..MockConfig::default()
        };
        let sdk = MockSdk::new(&config);
        sdk.init_library().unwrap();
        sdk
    }

    #[test]
    fn test_mock_camera_lifecycle() {
        let sdk = sdk();
        assert_eq!(sdk.refresh_device_list(Duration::ZERO), Ok(1));

        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        assert_eq!(sdk.open_handles(), 1);
        assert!(camera.dequeue_buffer(Duration::ZERO).is_err());

        camera.start_stream().unwrap();
        let frame = camera.dequeue_buffer(Duration::from_millis(10)).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.format(), PixelFormat::BayerRg8);

        let image = decode(frame.data(), frame.width(), frame.height(), frame.format()).unwrap();
        assert_eq!(image.pixel(3, 3), Some([40, 120, 200]));

        camera.enqueue_buffer(frame).unwrap();
        camera.close().unwrap();
        assert_eq!(sdk.open_handles(), 0);
        assert!(!sdk.is_streaming());
    }

    #[test]
    fn test_exclusive_open_rejects_second_handle() {
        let sdk = sdk();
        let _first = sdk.open(0, AccessMode::Exclusive).unwrap();
        let err = sdk.open(0, AccessMode::Exclusive).err().unwrap();
        assert_eq!(err.code, STATUS_INVALID_ACCESS);
        assert_eq!(sdk.max_open_handles(), 1);
    }

    #[test]
    fn test_read_only_open_alongside_exclusive() {
        let sdk = sdk();
        let _owner = sdk.open(0, AccessMode::Exclusive).unwrap();
        let _observer = sdk.open(0, AccessMode::ReadOnly).unwrap();
        assert_eq!(sdk.open_handles(), 2);
    }

    #[test]
    fn test_enqueue_requires_dequeued_buffer() {
        let sdk = sdk();
        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        camera.start_stream().unwrap();

        let frame = camera.dequeue_buffer(Duration::from_millis(1)).unwrap();
        let stray = RawFrame::new(Vec::new(), 8, 6, frame.format(), frame.buffer_id() + 100);
        assert_eq!(camera.enqueue_buffer(stray).unwrap_err().code, STATUS_INVALID_PARAMETER);

        let copy = frame.clone();
        camera.enqueue_buffer(frame).unwrap();
        assert!(camera.enqueue_buffer(copy).is_err(), "returned twice");
    }

    #[test]
    fn test_corrupt_frame_header() {
        let sdk = sdk();
        sdk.corrupt_frame_on(1);
        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        camera.start_stream().unwrap();

        let frame = camera.dequeue_buffer(Duration::from_millis(1)).unwrap();
        assert_eq!((frame.width(), frame.height()), (u32::MAX, u32::MAX));
        assert!(frame.data().is_empty());
        camera.enqueue_buffer(frame).unwrap();

        let frame = camera.dequeue_buffer(Duration::from_millis(1)).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
    }

    #[test]
    fn test_scripted_faults() {
        let sdk = sdk();
        sdk.timeout_on_dequeue(2);
        sdk.fail_enqueue_on(1);

        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        camera.start_stream().unwrap();

        let frame = camera.dequeue_buffer(Duration::from_millis(1)).unwrap();
        assert!(camera.enqueue_buffer(frame).is_err());
        assert!(camera.dequeue_buffer(Duration::from_millis(1)).unwrap_err().is_timeout());
        assert!(camera.dequeue_buffer(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_wedge_cleared_by_bus_reset() {
        let sdk = sdk();
        let identity = DeviceIdentity::new(0x2bdf, 0x0102);
        let bus = sdk.bus(identity);
        sdk.wedge_at(1);

        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        camera.start_stream().unwrap();
        assert!(camera.dequeue_buffer(Duration::from_millis(1)).is_err());
        assert!(camera.dequeue_buffer(Duration::from_millis(1)).is_err());
        assert!(sdk.is_wedged());

        super::super::reset_bus(&bus, identity).unwrap();
        assert!(!sdk.is_wedged());
        assert_eq!(bus.resets(), 1);
        assert!(camera.dequeue_buffer(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_rejected_feature() {
        let sdk = sdk();
        sdk.reject_feature("Gain");
        let mut camera = sdk.open(0, AccessMode::Exclusive).unwrap();
        assert!(camera.set_float("Gain", 3.0).is_err());
        camera.set_float("AnalogGain", 3.0).unwrap();
        assert_eq!(sdk.feature("AnalogGain"), Some(3.0));
        assert_eq!(sdk.feature("Gain"), None);
    }

    #[test]
    fn test_enumeration_requires_library() {
        let sdk = MockSdk::new(&MockConfig::default());
        assert!(sdk.refresh_device_list(Duration::ZERO).is_err());
    }
}
