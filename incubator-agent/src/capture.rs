//! Camera collaborator and capture pipelines
//!
//! Thumbnail and preview captures run as four-stage pipelines attached to the
//! *begin thumbnail capture* and *begin preview capture* events:
//! `load-settings → capture → persist → announce`. A failing stage aborts the
//! rest of that capture only.

use chrono::{DateTime, Utc};
use event_bus::{Pipeline, SubscriptionId};
use incubator_state::models::{ChannelSettings, ImagingProfile};
use incubator_state::{
    CaptureKind, CaptureRequest, EventArgs, EventName, StateManager, StatusLevel, SystemStatus,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera busy")]
    Busy,

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Failed to store frame at {location}: {reason}")]
    Storage { location: String, reason: String },
}

/// Optical channel a capture uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Phase,
    Fluorescence,
}

impl Channel {
    pub fn for_kind(kind: CaptureKind) -> Self {
        match kind {
            CaptureKind::Experiment | CaptureKind::Dpc => Channel::Phase,
            CaptureKind::Gfp => Channel::Fluorescence,
        }
    }

    pub fn settings<'a>(&self, profile: &'a ImagingProfile) -> &'a ChannelSettings {
        match self {
            Channel::Phase => &profile.phase,
            Channel::Fluorescence => &profile.fluorescence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: CaptureKind,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// 8-bit grayscale, row major
    pub data: Vec<u8>,
}

pub trait Camera: Send + Sync {
    fn start_capture(&self, kind: CaptureKind, settings: &ChannelSettings) -> Result<Frame, CameraError>;
}

/// Where captured frames go; returns the stored location
pub trait FrameSink: Send + Sync {
    fn persist(&self, request: &CaptureRequest, frame: &Frame) -> Result<String, CameraError>;
}

/// Synthetic gradient frames scaled by exposure and gain
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    captures: AtomicU64,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            captures: AtomicU64::new(0),
        }
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

impl Camera for SimulatedCamera {
    fn start_capture(&self, kind: CaptureKind, settings: &ChannelSettings) -> Result<Frame, CameraError> {
        let scale = (settings.exposure.value * settings.gain.value).max(0.0);
        let offset = settings.brightness.value;
        let data = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x + y) as f64))
            .map(|v| (v * scale + offset).clamp(0.0, 255.0) as u8)
            .collect();

        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Frame {
            kind,
            width: self.width,
            height: self.height,
            captured_at: Utc::now(),
            data,
        })
    }
}

/// Keeps frames in memory, keyed by location
#[derive(Default)]
pub struct MemoryFrameSink {
    frames: Mutex<Vec<(String, Frame)>>,
}

impl MemoryFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locations(&self) -> Vec<String> {
        self.frames.lock().iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl FrameSink for MemoryFrameSink {
    fn persist(&self, request: &CaptureRequest, frame: &Frame) -> Result<String, CameraError> {
        let location = frame_location(request, frame);
        self.frames.lock().push((location.clone(), frame.clone()));
        Ok(location)
    }
}

/// Storage key of a frame
///
/// Scheduled thumbnails land under their experiment and slot; previews under
/// their kind and capture time.
pub fn frame_location(request: &CaptureRequest, frame: &Frame) -> String {
    match (&request.experiment_id, request.slot) {
        (Some(id), Some(slot)) => format!("experiments/{id}/thumbnails/{slot:06}.raw"),
        _ => format!(
            "previews/{}-{}.raw",
            request.kind.as_str(),
            frame.captured_at.format("%Y%m%dT%H%M%S%3f")
        ),
    }
}

/// Context threaded through a capture pipeline
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub request: Option<CaptureRequest>,
    pub settings: Option<ChannelSettings>,
    pub frame: Option<Frame>,
    pub location: Option<String>,
}

impl CaptureContext {
    pub fn seed(args: &EventArgs) -> Self {
        Self {
            request: match args {
                EventArgs::Capture(request) => Some(request.clone()),
                _ => None,
            },
            ..Self::default()
        }
    }
}

pub fn capture_pipeline(
    name: &str,
    state: StateManager,
    camera: Arc<dyn Camera>,
    sink: Arc<dyn FrameSink>,
) -> Pipeline<CaptureContext> {
    let registry = Arc::clone(state.registry());

    Pipeline::new(name)
        .stage("load-settings", move |ctx: &mut CaptureContext| {
            let kind = ctx.request.as_ref().ok_or("event carried no capture request")?.kind;
            let profile = state.snapshot::<ImagingProfile>()?;
            ctx.settings = Some(*Channel::for_kind(kind).settings(&profile));
            Ok(())
        })
        .stage("capture", move |ctx: &mut CaptureContext| {
            let kind = ctx.request.as_ref().ok_or("event carried no capture request")?.kind;
            let settings = ctx.settings.as_ref().ok_or("imaging settings not loaded")?;
            ctx.frame = Some(camera.start_capture(kind, settings)?);
            Ok(())
        })
        .stage("persist", move |ctx: &mut CaptureContext| {
            let request = ctx.request.as_ref().ok_or("event carried no capture request")?;
            let frame = ctx.frame.as_ref().ok_or("no frame captured")?;
            ctx.location = Some(sink.persist(request, frame)?);
            Ok(())
        })
        .stage("announce", move |ctx: &mut CaptureContext| {
            let kind = ctx.request.as_ref().map_or("unknown", |r| r.kind.as_str());
            let location = ctx.location.as_deref().unwrap_or_default();
            registry.status(SystemStatus::new(
                "camera",
                StatusLevel::Info,
                format!("Captured {kind} frame to {location}"),
            ));
            Ok(())
        })
}

/// Attach thumbnail and preview pipelines to their events
pub fn attach_capture(
    state: &StateManager,
    camera: Arc<dyn Camera>,
    sink: Arc<dyn FrameSink>,
) -> [SubscriptionId; 2] {
    let registry = state.registry();
    let thumbnail = Arc::new(capture_pipeline(
        "thumbnail",
        state.clone(),
        Arc::clone(&camera),
        Arc::clone(&sink),
    ));
    let preview = Arc::new(capture_pipeline("preview", state.clone(), camera, sink));

    [
        thumbnail.attach(registry.bus(EventName::BeginThumbnailCapture), 0, CaptureContext::seed),
        preview.attach(registry.bus(EventName::BeginPreviewCapture), 0, CaptureContext::seed),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::PipelineError;
    use incubator_state::models::{Device, IcbLimits};
    use incubator_state::Registry;

    struct BrokenCamera;

    impl Camera for BrokenCamera {
        fn start_capture(&self, _: CaptureKind, _: &ChannelSettings) -> Result<Frame, CameraError> {
            Err(CameraError::Busy)
        }
    }

    fn state() -> StateManager {
        StateManager::new(
            Arc::new(Registry::new()),
            Device::new("dev-1", "Bench A"),
            IcbLimits::default(),
        )
        .unwrap()
    }

    fn thumbnail_request() -> CaptureRequest {
        CaptureRequest {
            kind: CaptureKind::Experiment,
            experiment_id: Some("exp-1".into()),
            slot: Some(4),
        }
    }

    #[test]
    fn test_pipeline_persists_and_announces() {
        let state = state();
        let sink = Arc::new(MemoryFrameSink::new());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&statuses);
        state.registry().register(EventName::SystemStatusChanged, 0, move |args| {
            if let EventArgs::Status(status) = args {
                s.lock().push(status.message.clone());
            }
            Ok(())
        });

        let pipeline = capture_pipeline("thumbnail", state, Arc::new(SimulatedCamera::default()), sink.clone());
        let ctx = pipeline
            .begin(CaptureContext::seed(&EventArgs::Capture(thumbnail_request())))
            .unwrap();

        assert_eq!(ctx.location.as_deref(), Some("experiments/exp-1/thumbnails/000004.raw"));
        assert_eq!(sink.locations(), vec!["experiments/exp-1/thumbnails/000004.raw".to_string()]);
        assert_eq!(ctx.frame.unwrap().data.len(), 64 * 48);
        assert_eq!(
            *statuses.lock(),
            vec!["Captured experiment frame to experiments/exp-1/thumbnails/000004.raw".to_string()]
        );
    }

    #[test]
    fn test_camera_failure_stops_before_persist() {
        let state = state();
        let sink = Arc::new(MemoryFrameSink::new());
        let pipeline = capture_pipeline("preview", state, Arc::new(BrokenCamera), sink.clone());

        let request = CaptureRequest::new(CaptureKind::Gfp);
        match pipeline.begin(CaptureContext::seed(&EventArgs::Capture(request))) {
            Err(PipelineError::StageFailed { stage, .. }) => assert_eq!(stage, "capture"),
            other => panic!("expected capture stage failure, got {:?}", other.map(|_| ())),
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_without_request_fails_first_stage() {
        let pipeline = capture_pipeline(
            "thumbnail",
            state(),
            Arc::new(SimulatedCamera::default()),
            Arc::new(MemoryFrameSink::new()),
        );
        let err = pipeline.begin(CaptureContext::seed(&EventArgs::None)).unwrap_err();
        assert_eq!(err.index(), 0);
    }

    #[test]
    fn test_fluorescence_channel_for_gfp() {
        let profile = ImagingProfile::default();
        assert_eq!(Channel::for_kind(CaptureKind::Gfp).settings(&profile), &profile.fluorescence);
        assert_eq!(Channel::for_kind(CaptureKind::Dpc).settings(&profile), &profile.phase);
    }

    #[test]
    fn test_attached_pipelines_follow_events() {
        let state = state();
        let camera = Arc::new(SimulatedCamera::default());
        let sink = Arc::new(MemoryFrameSink::new());
        attach_capture(&state, camera.clone(), sink.clone());

        let registry = state.registry();
        registry.trigger(EventName::BeginThumbnailCapture, &EventArgs::Capture(thumbnail_request()));
        registry.trigger(
            EventName::BeginPreviewCapture,
            &EventArgs::Capture(CaptureRequest::new(CaptureKind::Dpc)),
        );

        assert_eq!(camera.captures(), 2);
        assert_eq!(sink.len(), 2);
        assert!(sink.locations()[1].starts_with("previews/dpc-capture-"));
    }
}
