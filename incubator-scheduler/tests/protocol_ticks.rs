//! Scheduler ticks against a live state manager

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use incubator_scheduler::{
    select_step, ProtocolScheduler, SchedulerError, SchedulerSettings, TickOutcome,
};
use incubator_state::models::{Device, Experiment, Icb, IcbLimits, Protocol, ProtocolStep, Setpoint};
use incubator_state::{CaptureKind, EventArgs, EventName, Registry, StateManager};
use parking_lot::Mutex;
use proptest::prelude::*;
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + ChronoDuration::seconds(secs)
}

fn tp_step(offset_secs: u64, tp: f64) -> ProtocolStep {
    ProtocolStep {
        offset_secs,
        tp: Some(Setpoint::new(tp)),
        cp: None,
        op: None,
    }
}

fn running(steps: Vec<ProtocolStep>, imaging_interval_secs: Option<u64>) -> (StateManager, ProtocolScheduler) {
    let state = StateManager::new(
        Arc::new(Registry::new()),
        Device::new("dev-1", "Bench A"),
        IcbLimits::default(),
    )
    .unwrap();
    assert!(state
        .update::<Protocol, _>(|p| {
            p.id = Some("proto-1".into());
            p.steps = steps;
            p.imaging_interval_secs = imaging_interval_secs;
        })
        .unwrap());
    assert!(state
        .update::<Experiment, _>(|e| e.start("exp-1", t0()))
        .unwrap());

    let scheduler = ProtocolScheduler::new(state.clone(), SchedulerSettings::default());
    (state, scheduler)
}

fn count(state: &StateManager, name: EventName) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    state.registry().register(name, 0, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    hits
}

#[test]
fn test_selects_latest_reached_step_and_commits_once() {
    let (state, scheduler) = running(vec![tp_step(0, 30.0), tp_step(60, 32.0), tp_step(120, 34.0)], None);
    let icb_changed = count(&state, EventName::IcbChanged);

    let first = scheduler.tick(at(90)).unwrap();
    assert_eq!(first.step, Some(1));
    assert!(first.setpoints_applied);
    assert_eq!(state.snapshot::<Icb>().unwrap().tp, Setpoint::new(32.0));

    let revision = state.revision::<Icb>().unwrap();
    let second = scheduler.tick(at(90)).unwrap();
    assert_eq!(second.step, Some(1));
    assert!(!second.setpoints_applied);
    assert_eq!(state.revision::<Icb>().unwrap(), revision);
    assert_eq!(icb_changed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missed_ticks_never_replay_earlier_step() {
    let (state, scheduler) = running(vec![tp_step(0, 30.0), tp_step(60, 32.0), tp_step(120, 34.0)], None);

    // First tick after a long gap lands directly on the last step
    let outcome = scheduler.tick(at(500)).unwrap();
    assert_eq!(outcome.step, Some(2));
    assert_eq!(state.snapshot::<Icb>().unwrap().tp, Setpoint::new(34.0));

    // A fresh scheduler (restart) converges on the same state without a commit
    let restarted = ProtocolScheduler::new(state.clone(), SchedulerSettings::default());
    assert!(!restarted.tick(at(501)).unwrap().setpoints_applied);
}

#[test]
fn test_idle_when_experiment_stopped() {
    let (state, scheduler) = running(vec![tp_step(0, 30.0)], Some(60));
    state.update::<Experiment, _>(|e| e.stop()).unwrap();

    assert_eq!(scheduler.tick(at(10)).unwrap(), TickOutcome::idle());
    assert_eq!(state.snapshot::<Icb>().unwrap().tp, Setpoint::new(37.0));
}

#[test]
fn test_one_capture_per_imaging_slot() {
    let (state, scheduler) = running(Vec::new(), Some(60));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&requests);
    state
        .registry()
        .register(EventName::BeginThumbnailCapture, 0, move |args| {
            if let EventArgs::Capture(request) = args {
                r.lock().push(request.clone());
            }
            Ok(())
        });

    let slots: Vec<Option<u64>> = [0, 30, 59, 61, 90, 185]
        .into_iter()
        .map(|secs| scheduler.tick(at(secs)).unwrap().capture_slot)
        .collect();
    assert_eq!(slots, vec![Some(0), None, None, Some(1), None, Some(3)]);

    let requests = requests.lock();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.kind == CaptureKind::Experiment));
    assert!(requests.iter().all(|r| r.experiment_id.as_deref() == Some("exp-1")));
    assert_eq!(requests[2].slot, Some(3));
}

#[test]
fn test_new_experiment_restarts_slot_tracking() {
    let (state, scheduler) = running(Vec::new(), Some(60));
    let captures = count(&state, EventName::BeginThumbnailCapture);

    scheduler.tick(at(5)).unwrap();
    state
        .update::<Experiment, _>(|e| e.start("exp-2", at(10)))
        .unwrap();
    let outcome = scheduler.tick(at(15)).unwrap();

    assert_eq!(outcome.capture_slot, Some(0));
    assert_eq!(captures.load(Ordering::SeqCst), 2);
}

#[test]
fn test_out_of_limits_step_reported() {
    // Protocol validation checks the setpoint itself; board limits apply on commit
    let (state, scheduler) = running(vec![tp_step(0, 50.0)], None);

    match scheduler.tick(at(1)) {
        Err(SchedulerError::StepRejected { step, source }) => {
            assert_eq!(step, 0);
            assert_eq!(source.field, "tp");
        }
        other => panic!("expected a rejected step, got {:?}", other),
    }
    assert_eq!(state.snapshot::<Icb>().unwrap().tp, Setpoint::new(37.0));
}

#[rstest]
#[case(0, Some(0))]
#[case(59, Some(0))]
#[case(60, Some(1))]
#[case(90, Some(1))]
#[case(120, Some(2))]
#[case(10_000, Some(2))]
fn test_select_step_cases(#[case] elapsed_secs: u64, #[case] expected: Option<usize>) {
    let steps = vec![tp_step(0, 30.0), tp_step(60, 32.0), tp_step(120, 34.0)];
    assert_eq!(select_step(&steps, Duration::from_secs(elapsed_secs)), expected);
}

proptest! {
    #[test]
    fn prop_selected_step_is_latest_reached(
        mut offsets in prop::collection::vec(0u64..1_000, 0..12),
        elapsed in 0u64..1_200,
    ) {
        offsets.sort_unstable();
        let steps: Vec<ProtocolStep> = offsets.iter().map(|&o| tp_step(o, 30.0)).collect();
        let elapsed = Duration::from_secs(elapsed);

        match select_step(&steps, elapsed) {
            Some(i) => {
                prop_assert!(steps[i].offset() <= elapsed);
                prop_assert!(steps[i + 1..].iter().all(|s| s.offset() > elapsed));
            }
            None => prop_assert!(steps.iter().all(|s| s.offset() > elapsed)),
        }
    }
}
