//! Fakes shared by the unit tests: scripted position provider, camera,
//! detector, saver and navigator.

use crate::detector::{Candidate, DetectorError, FaceDetector};
use crate::flow::{PunchNavigator, PunchSaver, SaveError};
use crate::types::{PunchType, RawBox};
use async_trait::async_trait;
use punchgate_hw::{
    CameraBackend, CameraError, Facing, Frame, GeoProvider, PermissionState, PositionFix,
    PositionWatch, VideoStream, WatchError, WatchEvent, WatchOptions,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn fix_at(latitude: f64, longitude: f64, accuracy_m: f64) -> PositionFix {
    PositionFix {
        latitude,
        longitude,
        accuracy_m,
        captured_at_ms: 0,
    }
}

/// Coordinates `distance_m` due north of the given point.
pub fn offset_north(latitude: f64, longitude: f64, distance_m: f64) -> (f64, f64) {
    (latitude + (distance_m / 6_371_000.0).to_degrees(), longitude)
}

pub fn face(x: f64, y: f64, w: f64, h: f64) -> Candidate {
    Candidate {
        score: 0.95,
        bbox: RawBox::ltwh(x, y, w, h),
    }
}

pub type Script = Vec<(Duration, WatchEvent)>;

/// Position provider replaying scripted samples. Each watch takes the next
/// script; the last one repeats. Delays are relative to the previous event.
pub struct ScriptedGeo {
    available: bool,
    permission: PermissionState,
    permission_delay: Option<Duration>,
    watch_error: Option<WatchError>,
    close_after_script: bool,
    scripts: Mutex<VecDeque<Script>>,
    started: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedGeo {
    pub fn new(script: Script) -> Self {
        Self::with_scripts(vec![script])
    }

    pub fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            available: true,
            permission: PermissionState::Unknown,
            permission_delay: None,
            watch_error: None,
            close_after_script: false,
            scripts: Mutex::new(scripts.into()),
            started: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(vec![])
        }
    }

    pub fn with_permission(mut self, permission: PermissionState) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_permission_delay(mut self, delay: Duration) -> Self {
        self.permission_delay = Some(delay);
        self
    }

    pub fn with_watch_error(mut self, err: WatchError) -> Self {
        self.watch_error = Some(err);
        self
    }

    /// Close the sample channel once the script is exhausted.
    pub fn closing(mut self) -> Self {
        self.close_after_script = true;
        self
    }

    pub fn watches_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn active_watches(&self) -> usize {
        self.watches_started() - self.releases()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl GeoProvider for ScriptedGeo {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn permission(&self) -> PermissionState {
        if let Some(delay) = self.permission_delay {
            tokio::time::sleep(delay).await;
        }
        self.permission
    }

    fn watch(&self, _options: WatchOptions) -> Result<PositionWatch, WatchError> {
        if let Some(err) = &self.watch_error {
            return Err(err.clone());
        }
        self.started.fetch_add(1, Ordering::SeqCst);

        let script = self.next_script();
        let hold_open = !self.close_after_script;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            for (delay, event) in script {
                tokio::time::sleep(delay).await;
                if tx.send(event).is_err() {
                    return;
                }
            }
            if hold_open {
                std::future::pending::<()>().await;
            }
        });

        let released = self.released.clone();
        Ok(PositionWatch::new(rx, move || {
            task.abort();
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// In-memory video stream producing solid frames.
pub struct FakeStream {
    width: u32,
    height: u32,
    decodable: AtomicBool,
    live: AtomicBool,
    stops: AtomicUsize,
    sequence: AtomicU32,
}

impl FakeStream {
    fn build(width: u32, height: u32, decodable: bool) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            decodable: AtomicBool::new(decodable),
            live: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            sequence: AtomicU32::new(0),
        })
    }

    pub fn pending(width: u32, height: u32) -> Arc<Self> {
        Self::build(width, height, false)
    }

    pub fn decodable(width: u32, height: u32) -> Arc<Self> {
        Self::build(width, height, true)
    }

    pub fn make_decodable(&self) {
        self.decodable.store(true, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl VideoStream for FakeStream {
    fn is_decodable(&self) -> bool {
        self.live.load(Ordering::SeqCst) && self.decodable.load(Ordering::SeqCst)
    }

    fn current_frame(&self) -> Option<Frame> {
        if !self.is_decodable() {
            return None;
        }
        let mut frame = Frame::solid(self.width, self.height, [90, 120, 150]);
        frame.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Some(frame)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Camera backend handing out [`FakeStream`]s and remembering every one.
pub struct FakeCamera {
    failure: Option<CameraError>,
    latency: Duration,
    start_decodable: bool,
    opened: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, Duration::ZERO, true))
    }

    pub fn pending() -> Arc<Self> {
        Arc::new(Self::build(None, Duration::ZERO, false))
    }

    pub fn failing(err: CameraError) -> Arc<Self> {
        Arc::new(Self::build(Some(err), Duration::ZERO, true))
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self::build(None, latency, true))
    }

    fn build(failure: Option<CameraError>, latency: Duration, start_decodable: bool) -> Self {
        Self {
            failure,
            latency,
            start_decodable,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn live_streams(&self) -> usize {
        self.streams().iter().filter(|s| s.is_live()).count()
    }
}

#[async_trait]
impl CameraBackend for FakeCamera {
    async fn open(&self, _facing: Facing) -> Result<Arc<dyn VideoStream>, CameraError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let stream = FakeStream::build(640, 480, self.start_decodable);
        self.opened.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

type DetectResult = Result<Vec<Candidate>, DetectorError>;

/// Detector replaying scripted results; the last one repeats.
pub struct ScriptedDetector {
    results: Mutex<VecDeque<DetectResult>>,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn sequence(results: Vec<DetectResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(result: DetectResult) -> Arc<Self> {
        Self::sequence(vec![result])
    }

    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Candidate>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results.front().cloned().unwrap_or_else(|| Ok(vec![]))
        }
    }
}

/// Save collaborator recording every call and replaying scripted outcomes.
pub struct RecordingSaver {
    outcomes: Mutex<VecDeque<Result<(), SaveError>>>,
    latency: Duration,
    calls: Mutex<Vec<(String, PunchType)>>,
}

impl RecordingSaver {
    pub fn succeeding() -> Arc<Self> {
        Self::scripted(vec![Ok(())])
    }

    pub fn scripted(outcomes: Vec<Result<(), SaveError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(vec![Ok(())].into()),
            latency,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, PunchType)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PunchSaver for RecordingSaver {
    async fn save(&self, image: &str, punch_type: PunchType) -> Result<(), SaveError> {
        self.calls.lock().unwrap().push((image.to_string(), punch_type));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes.front().cloned().unwrap_or(Ok(()))
        }
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    successes: Mutex<Vec<PunchType>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn successes(&self) -> Vec<PunchType> {
        self.successes.lock().unwrap().clone()
    }
}

impl PunchNavigator for RecordingNavigator {
    fn punch_succeeded(&self, punch_type: PunchType) {
        self.successes.lock().unwrap().push(punch_type);
    }
}
