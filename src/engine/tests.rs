use super::*;
use super::conflict::now_ms;
use std::collections::HashSet;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

const H: Ms = 3_600_000; // 1 hour in ms
const W: Ms = 30 * 60_000; // default slot width

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("clinicslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = Engine::new(
        path.clone(),
        Arc::new(DoctorRoster::builtin()),
        EngineConfig::default(),
    )
    .unwrap();
    (engine, path)
}

fn reopen(path: &PathBuf) -> Engine {
    Engine::new(
        path.clone(),
        Arc::new(DoctorRoster::builtin()),
        EngineConfig::default(),
    )
    .unwrap()
}

/// A bucket-aligned instant `hours` from now, safely inside the horizon.
fn slot_in(hours: i64) -> Ms {
    (now_ms() + hours * H).div_euclid(W) * W + W
}

fn request(patient: &str, doctor: &str, at: Ms) -> NewAppointment {
    let doctor_type = DoctorRoster::builtin()
        .get(doctor)
        .map(|d| d.doctor_type)
        .unwrap_or(DoctorType::Cardiologist);
    NewAppointment {
        patient_id: patient.into(),
        doctor_id: doctor.into(),
        doctor_type,
        scheduled_at: at,
        reason: Some("annual checkup".into()),
        note: None,
    }
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_scenario() {
    let (engine, _) = new_engine("end_to_end.wal");
    let t0 = slot_in(24);

    let first = assert_ok!(engine.create_appointment(request("P1", "dr-green", t0)).await);
    assert_eq!(first.status, Status::Pending);

    let confirmed = assert_ok!(engine.confirm_appointment(first.id).await);
    assert_eq!(confirmed.status, Status::Scheduled);

    let err = assert_err!(engine.create_appointment(request("P2", "dr-green", t0)).await);
    assert_eq!(err, EngineError::Conflict(first.id));

    let cancelled = assert_ok!(
        engine
            .cancel_appointment(first.id, "doctor called into surgery")
            .await
    );
    assert_eq!(cancelled.status, Status::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("doctor called into surgery")
    );

    let third = assert_ok!(engine.create_appointment(request("P3", "dr-green", t0)).await);
    assert_eq!(third.status, Status::Pending);
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn create_fills_defaults() {
    let (engine, _) = new_engine("create_defaults.wal");
    let mut req = request("P1", "dr-lee", slot_in(3));
    req.reason = Some("  ".into());
    req.note = Some(" bring old ECG ".into());
    let appt = engine.create_appointment(req).await.unwrap();
    assert_eq!(appt.reason, None);
    assert_eq!(appt.note.as_deref(), Some("bring old ECG"));
    assert_eq!(appt.cancellation_reason, None);
    assert!(appt.created_at <= now_ms());
    assert_eq!(engine.get_appointment(appt.id).await.unwrap(), appt);
}

#[tokio::test]
async fn create_rejects_unknown_doctor() {
    let (engine, _) = new_engine("unknown_doctor.wal");
    let err = engine
        .create_appointment(request("P1", "dr-nobody", slot_in(2)))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DoctorNotFound("dr-nobody".into()));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn create_rejects_mismatched_doctor_type() {
    let (engine, _) = new_engine("mismatched_type.wal");
    let mut req = request("P1", "dr-green", slot_in(2));
    req.doctor_type = DoctorType::FamilyMedicine;
    let err = engine.create_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(engine.appointment_count(), 0);
}

#[tokio::test]
async fn horizon_boundary_one_second() {
    let (engine, _) = new_engine("horizon_boundary.wal");
    let lookahead = engine.config().max_lookahead_ms;

    let inside = now_ms() + lookahead - 1_000;
    assert_ok!(engine.create_appointment(request("P1", "dr-green", inside)).await);

    let beyond = now_ms() + lookahead + 1_000;
    let err = assert_err!(engine.create_appointment(request("P2", "dr-cameron", beyond)).await);
    assert!(matches!(err, EngineError::OutOfHorizon { .. }));
    assert_eq!(err.kind(), ErrorKind::OutOfHorizon);
}

#[tokio::test]
async fn create_in_past_rejected() {
    let (engine, _) = new_engine("create_past.wal");
    let err = engine
        .create_appointment(request("P1", "dr-green", now_ms() - H))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OutOfHorizon { .. }));
    assert_eq!(engine.appointment_count(), 0);
}

#[tokio::test]
async fn same_bucket_conflicts_other_bucket_does_not() {
    let (engine, _) = new_engine("bucket_conflict.wal");
    let t0 = slot_in(5);
    let first = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();

    // 10 minutes later is still the same 30-minute bucket.
    let err = engine
        .create_appointment(request("P2", "dr-green", t0 + 10 * 60_000))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict(first.id));

    assert_ok!(engine.create_appointment(request("P2", "dr-green", t0 + W)).await);
    // Same time, different doctor.
    assert_ok!(engine.create_appointment(request("P2", "dr-lee", t0)).await);
}

#[tokio::test]
async fn confirm_on_cancelled_is_invalid_and_unchanged() {
    let (engine, _) = new_engine("confirm_cancelled.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(4)))
        .await
        .unwrap();
    let cancelled = engine.cancel_appointment(appt.id, "patient ill").await.unwrap();

    let err = engine.confirm_appointment(appt.id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: appt.id,
            from: Status::Cancelled,
            action: Action::Confirm,
        }
    );
    assert_eq!(engine.get_appointment(appt.id).await.unwrap(), cancelled);
}

#[tokio::test]
async fn confirm_twice_is_invalid() {
    let (engine, _) = new_engine("confirm_twice.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(4)))
        .await
        .unwrap();
    engine.confirm_appointment(appt.id).await.unwrap();
    let err = engine.confirm_appointment(appt.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn confirm_unknown_is_not_found() {
    let (engine, _) = new_engine("confirm_unknown.wal");
    let id = Ulid::new();
    assert_eq!(
        engine.confirm_appointment(id).await.unwrap_err(),
        EngineError::AppointmentNotFound(id)
    );
}

#[tokio::test]
async fn cancel_with_empty_reason_keeps_status() {
    let (engine, _) = new_engine("cancel_empty_reason.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(6)))
        .await
        .unwrap();
    let err = engine.cancel_appointment(appt.id, "   ").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let stored = engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.cancellation_reason, None);
    assert!(!engine.check_availability("dr-green", appt.scheduled_at).is_available());
}

#[tokio::test]
async fn cancel_twice_is_invalid() {
    let (engine, _) = new_engine("cancel_twice.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(6)))
        .await
        .unwrap();
    engine.cancel_appointment(appt.id, "moved away").await.unwrap();
    let err = engine.cancel_appointment(appt.id, "again").await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: appt.id,
            from: Status::Cancelled,
            action: Action::Cancel,
        }
    );
    let stored = engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(stored.cancellation_reason.as_deref(), Some("moved away"));
}

#[tokio::test]
async fn cancel_releases_slot_immediately() {
    let (engine, _) = new_engine("cancel_release.wal");
    let t0 = slot_in(8);
    let appt = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    engine.confirm_appointment(appt.id).await.unwrap();
    assert_eq!(
        engine.check_availability("dr-green", t0),
        Availability::Conflict(appt.id)
    );

    engine.cancel_appointment(appt.id, "schedule clash").await.unwrap();
    assert_eq!(engine.check_availability("dr-green", t0), Availability::Available);
    assert_eq!(engine.active_slot_count(), 0);
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_moves_slot() {
    let (engine, _) = new_engine("reschedule_moves.wal");
    let t0 = slot_in(10);
    let t1 = t0 + 4 * W;
    let appt = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    engine.confirm_appointment(appt.id).await.unwrap();

    let moved = engine.reschedule_appointment(appt.id, t1, None).await.unwrap();
    assert_eq!(moved.scheduled_at, t1);
    assert_eq!(moved.status, Status::Scheduled);
    assert!(engine.check_availability("dr-green", t0).is_available());
    assert_eq!(engine.check_availability("dr-green", t1), Availability::Conflict(appt.id));
}

#[tokio::test]
async fn reschedule_within_own_bucket_succeeds() {
    let (engine, _) = new_engine("reschedule_same_bucket.wal");
    let t0 = slot_in(10);
    let appt = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    let moved = engine
        .reschedule_appointment(appt.id, t0 + 15 * 60_000, None)
        .await
        .unwrap();
    assert_eq!(moved.scheduled_at, t0 + 15 * 60_000);
    assert_eq!(engine.active_slot_count(), 1);
}

#[tokio::test]
async fn reschedule_conflict_leaves_record_unchanged() {
    let (engine, _) = new_engine("reschedule_conflict.wal");
    let t0 = slot_in(12);
    let t1 = t0 + 2 * W;
    let a = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    let b = engine.create_appointment(request("P2", "dr-green", t1)).await.unwrap();

    let err = engine.reschedule_appointment(a.id, t1, None).await.unwrap_err();
    assert_eq!(err, EngineError::Conflict(b.id));
    assert_eq!(engine.get_appointment(a.id).await.unwrap(), a);
    assert_eq!(engine.check_availability("dr-green", t0), Availability::Conflict(a.id));
}

#[tokio::test]
async fn reschedule_out_of_horizon_rejected() {
    let (engine, _) = new_engine("reschedule_horizon.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(12)))
        .await
        .unwrap();
    let too_far = now_ms() + engine.config().max_lookahead_ms + H;
    let err = engine.reschedule_appointment(appt.id, too_far, None).await.unwrap_err();
    assert!(matches!(err, EngineError::OutOfHorizon { .. }));
    assert_eq!(engine.get_appointment(appt.id).await.unwrap(), appt);
}

#[tokio::test]
async fn reschedule_cancelled_rejected() {
    let (engine, _) = new_engine("reschedule_cancelled.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-green", slot_in(12)))
        .await
        .unwrap();
    engine.cancel_appointment(appt.id, "no longer needed").await.unwrap();
    let err = engine
        .reschedule_appointment(appt.id, slot_in(20), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            action: Action::Reschedule,
            ..
        }
    ));
}

#[tokio::test]
async fn pending_doctor_change_refreshes_type() {
    let (engine, _) = new_engine("doctor_change_pending.wal");
    let t0 = slot_in(14);
    let appt = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    let moved = engine
        .reschedule_appointment(appt.id, t0, Some("dr-powell".into()))
        .await
        .unwrap();
    assert_eq!(moved.doctor_id, "dr-powell");
    assert_eq!(moved.doctor_type, DoctorType::FamilyMedicine);
    assert!(engine.check_availability("dr-green", t0).is_available());
    assert!(!engine.check_availability("dr-powell", t0).is_available());
}

#[tokio::test]
async fn scheduled_doctor_change_rejected() {
    let (engine, _) = new_engine("doctor_change_scheduled.wal");
    let t0 = slot_in(14);
    let appt = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    let confirmed = engine.confirm_appointment(appt.id).await.unwrap();

    let err = engine
        .reschedule_appointment(appt.id, t0 + W, Some("dr-lee".into()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: appt.id,
            from: Status::Scheduled,
            action: Action::ChangeDoctor,
        }
    );
    assert_eq!(engine.get_appointment(appt.id).await.unwrap(), confirmed);

    // Naming the current doctor is not a change.
    assert_ok!(
        engine
            .reschedule_appointment(appt.id, t0 + W, Some("dr-green".into()))
            .await
    );
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn patient_listing_latest_first() {
    let (engine, _) = new_engine("patient_listing.wal");
    let early = slot_in(2);
    let late = slot_in(30);
    let a = engine.create_appointment(request("P1", "dr-green", early)).await.unwrap();
    let b = engine.create_appointment(request("P1", "dr-lee", late)).await.unwrap();
    engine.create_appointment(request("P2", "dr-cruz", late)).await.unwrap();
    engine.cancel_appointment(a.id, "conflict at work").await.unwrap();

    let listed = engine.list_appointments_for_patient("P1").await;
    let ids: Vec<Ulid> = listed.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
    assert!(engine.list_appointments_for_patient("nobody").await.is_empty());
}

#[tokio::test]
async fn doctors_filtered_by_type() {
    let (engine, _) = new_engine("doctors_by_type.wal");
    assert_eq!(engine.list_doctors(None).len(), 9);
    let cardio = engine.list_doctors(Some(DoctorType::Cardiologist));
    assert_eq!(cardio.len(), 3);
    assert!(cardio.iter().all(|d| d.doctor_type == DoctorType::Cardiologist));
}

#[tokio::test]
async fn export_bundle_includes_doctor() {
    let (engine, _) = new_engine("export_bundle.wal");
    let appt = engine
        .create_appointment(request("P1", "dr-sharma", slot_in(9)))
        .await
        .unwrap();
    let bundle = engine.export_bundle(appt.id).await.unwrap();
    assert_eq!(bundle.appointment, appt);
    assert_eq!(bundle.doctor.name, "Hardik Sharma");

    let missing = Ulid::new();
    assert_eq!(
        engine.export_bundle(missing).await.unwrap_err(),
        EngineError::AppointmentNotFound(missing)
    );
}

#[tokio::test]
async fn counts_and_recent() {
    let (engine, _) = new_engine("counts_recent.wal");
    let a = engine.create_appointment(request("P1", "dr-green", slot_in(2))).await.unwrap();
    let b = engine.create_appointment(request("P2", "dr-lee", slot_in(2))).await.unwrap();
    let c = engine.create_appointment(request("P3", "dr-cruz", slot_in(2))).await.unwrap();
    engine.confirm_appointment(b.id).await.unwrap();
    engine.cancel_appointment(c.id, "double booked elsewhere").await.unwrap();

    let counts = engine.appointment_counts().await;
    assert_eq!(
        counts,
        StatusCounts {
            pending: 1,
            scheduled: 1,
            cancelled: 1
        }
    );
    assert_eq!(counts.total(), 3);

    let recent = engine.recent_appointments(2).await;
    assert_eq!(recent.len(), 2);
    assert!(recent[0].created_at >= recent[1].created_at);
    let everything = engine.recent_appointments(10).await;
    let ids: HashSet<Ulid> = everything.iter().map(|r| r.id).collect();
    assert_eq!(ids, HashSet::from([a.id, b.id, c.id]));
}

#[tokio::test]
async fn free_slots_skip_booked_buckets() {
    let (engine, _) = new_engine("free_slots.wal");
    let t0 = slot_in(20);
    engine.create_appointment(request("P1", "dr-green", t0 + W)).await.unwrap();

    let free = engine.free_slots("dr-green", t0, t0 + 4 * W).unwrap();
    assert_eq!(free, vec![Span::new(t0, t0 + W), Span::new(t0 + 2 * W, t0 + 4 * W)]);

    assert!(matches!(
        engine.free_slots("dr-nobody", t0, t0 + W),
        Err(EngineError::DoctorNotFound(_))
    ));
    assert!(matches!(
        engine.free_slots("dr-green", t0, t0),
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn free_slots_rejects_overflowing_window() {
    let (engine, _) = new_engine("free_slots_extreme.wal");
    assert!(matches!(
        engine.free_slots("dr-green", -i64::MAX, i64::MAX),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.free_slots("dr-green", i64::MIN, 0),
        Err(EngineError::Validation(_))
    ));

    // The widest allowed window at the very end of the timeline still works.
    let free = engine.free_slots("dr-green", i64::MAX - W, i64::MAX).unwrap();
    assert_eq!(free, vec![Span::new(i64::MAX - W, i64::MAX)]);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_one_wins() {
    let (engine, _) = new_engine("concurrent_creates.wal");
    let engine = Arc::new(engine);
    let t0 = slot_in(16);

    let e1 = engine.clone();
    let e2 = engine.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { e1.create_appointment(request("P1", "dr-green", t0)).await }),
        tokio::spawn(async move { e2.create_appointment(request("P2", "dr-green", t0)).await }),
    );
    let results = [r1.unwrap(), r2.unwrap()];

    let winners: Vec<&Appointment> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].status, Status::Pending);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(*loser, EngineError::Conflict(winners[0].id));
    assert_eq!(engine.appointment_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slot_invariant_under_contention() {
    let (engine, _) = new_engine("slot_invariant.wal");
    let engine = Arc::new(engine);
    let base = slot_in(40);
    let doctors = ["dr-green", "dr-lee", "dr-peter"];

    let mut tasks = Vec::new();
    for i in 0..120usize {
        let engine = engine.clone();
        let doctor = doctors[i % doctors.len()];
        // Four buckets per doctor, offsets inside the bucket vary.
        let at = base + ((i / 3) % 4) as Ms * W + (i % 7) as Ms * 60_000;
        tasks.push(tokio::spawn(async move {
            let created = engine
                .create_appointment(request(&format!("P{i}"), doctor, at))
                .await;
            if let Ok(appt) = &created
                && i % 5 == 0
            {
                let _ = engine.cancel_appointment(appt.id, "freed for test").await;
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let all = engine.recent_appointments(usize::MAX).await;
    let mut seen = HashSet::new();
    for appt in all.iter().filter(|a| a.status.is_active()) {
        assert!(
            seen.insert(appt.slot_key(W)),
            "two active appointments share a slot"
        );
    }
    assert_eq!(seen.len(), engine.active_slot_count());
}

#[tokio::test]
async fn slot_lock_timeout_is_infrastructure_error() {
    let path = test_wal_path("slot_timeout.wal");
    let config = EngineConfig {
        store_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = Engine::new(path, Arc::new(DoctorRoster::builtin()), config).unwrap();
    let t0 = slot_in(3);
    let key = SlotKey::new("dr-green", t0, W);
    let _held = engine.slot_locks.acquire(&key, Duration::from_secs(1)).await.unwrap();

    let err = engine
        .create_appointment(request("P1", "dr-green", t0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert_eq!(engine.appointment_count(), 0);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let (engine, path) = new_engine("replay_restores.wal");
    let t0 = slot_in(18);
    let t1 = t0 + 2 * W;
    let a = engine.create_appointment(request("P1", "dr-green", t0)).await.unwrap();
    let b = engine.create_appointment(request("P2", "dr-green", t1)).await.unwrap();
    engine.confirm_appointment(a.id).await.unwrap();
    engine.cancel_appointment(b.id, "travel").await.unwrap();
    let a = engine.reschedule_appointment(a.id, t1, None).await.unwrap();
    let b = engine.get_appointment(b.id).await.unwrap();
    drop(engine);

    let engine = reopen(&path);
    assert_eq!(engine.get_appointment(a.id).await.unwrap(), a);
    assert_eq!(engine.get_appointment(b.id).await.unwrap(), b);
    assert!(engine.check_availability("dr-green", t0).is_available());
    assert_eq!(engine.check_availability("dr-green", t1), Availability::Conflict(a.id));
    assert_eq!(engine.active_slot_count(), 1);
}

#[tokio::test]
async fn writes_after_torn_tail_survive_second_restart() {
    use std::io::Write;

    let (engine, path) = new_engine("torn_tail_restart.wal");
    let t0 = slot_in(26);
    let a = engine.create_appointment(request("P1", "dr-lee", t0)).await.unwrap();
    drop(engine);

    // A crash mid-frame leaves a partial record at the end of the log.
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[200u8, 0, 0, 0, 1, 2, 3]).unwrap();
    }

    let engine = reopen(&path);
    assert_eq!(engine.get_appointment(a.id).await.unwrap().id, a.id);
    let b = engine.create_appointment(request("P2", "dr-lee", t0 + W)).await.unwrap();
    engine.cancel_appointment(a.id, "feeling better").await.unwrap();
    drop(engine);

    let engine = reopen(&path);
    assert_eq!(engine.get_appointment(b.id).await.unwrap(), b);
    assert_eq!(
        engine.get_appointment(a.id).await.unwrap().status,
        Status::Cancelled
    );
    assert!(engine.check_availability("dr-lee", t0).is_available());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let (engine, path) = new_engine("compaction.wal");
    let t0 = slot_in(22);
    let mut ids = Vec::new();
    for i in 0..6 {
        let appt = engine
            .create_appointment(request(&format!("P{i}"), "dr-cameron", t0 + i * W))
            .await
            .unwrap();
        ids.push(appt.id);
    }
    engine.confirm_appointment(ids[0]).await.unwrap();
    engine.cancel_appointment(ids[1], "patient recovered").await.unwrap();
    assert!(engine.wal_appends_since_compact().await >= 8);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    let before = engine.recent_appointments(usize::MAX).await;
    drop(engine);

    let engine = reopen(&path);
    let after = engine.recent_appointments(usize::MAX).await;
    assert_eq!(before, after);
    assert_eq!(engine.active_slot_count(), 5);

    // The reopened log keeps accepting writes.
    engine.confirm_appointment(ids[2]).await.unwrap();
    drop(engine);
    let engine = reopen(&path);
    assert_eq!(
        engine.get_appointment(ids[2]).await.unwrap().status,
        Status::Scheduled
    );
}
