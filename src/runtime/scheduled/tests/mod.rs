//! Scheduled executor tests
//!
//! Timing assertions use generous upper bounds; lower bounds are exact
//! because the timer never fires early.


use crate::error::{RejectReason, TaskError};
use crate::runtime::executor::ExecutorService;
use crate::runtime::scheduled::{ScheduleMode, ScheduledConfig, ScheduledExecutor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_schedule_mode_period() {
    assert_eq!(ScheduleMode::OneShot.period(), None);
    assert!(ScheduleMode::FixedRate(Duration::from_millis(5)).is_periodic());
    assert_eq!(
        ScheduleMode::FixedDelay(Duration::from_millis(7)).period(),
        Some(Duration::from_millis(7))
    );
}

#[test]
fn test_one_shot_fires_after_delay() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let start = Instant::now();
    let handle = scheduler
        .schedule(move || start.elapsed(), Duration::from_millis(50))
        .unwrap();
    assert!(handle.delay() > Duration::ZERO);
    assert!(handle.delay() <= Duration::from_millis(50));
    let fired_after = handle.get().unwrap();
    assert!(fired_after >= Duration::from_millis(50));
    assert_eq!(handle.fire_count(), 1);
    assert_eq!(handle.delay(), Duration::ZERO);
}

#[test]
fn test_entries_fire_in_time_order() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = [60u64, 20, 40]
        .into_iter()
        .map(|ms| {
            let order = order.clone();
            scheduler
                .schedule(move || order.lock().push(ms), Duration::from_millis(ms))
                .unwrap()
        })
        .collect();
    for handle in &handles {
        handle.get().unwrap();
    }
    assert_eq!(*order.lock(), vec![20, 40, 60]);
}

#[test]
fn test_cancel_before_fire_removes_entry() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let handle = {
        let ran = ran.clone();
        scheduler
            .schedule(move || ran.store(true, Ordering::SeqCst), Duration::from_millis(80))
            .unwrap()
    };
    assert_eq!(scheduler.scheduled_count(), 1);
    assert!(handle.cancel(false));
    assert_eq!(scheduler.scheduled_count(), 0);
    thread::sleep(Duration::from_millis(120));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(handle.get(), Err(TaskError::Cancelled));
    assert_eq!(handle.fire_count(), 0);
}

#[test]
fn test_submit_runs_without_delay() {
    let scheduler = ScheduledExecutor::new(2).unwrap();
    let handle = scheduler.submit(|| "now").unwrap();
    assert_eq!(handle.get_timeout(Duration::from_secs(5)), Ok("now"));
}

#[test]
fn test_zero_period_rejected() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let err = scheduler
        .schedule_at_fixed_rate(|| (), Duration::ZERO, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidArgument(_)));
    assert!(scheduler
        .schedule_with_fixed_delay(|| (), Duration::ZERO, Duration::ZERO)
        .is_err());
}

#[test]
fn test_unreachable_fire_time_rejected() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    assert!(matches!(
        scheduler.schedule(|| 1, Duration::MAX),
        Err(TaskError::InvalidArgument(_))
    ));
    assert!(matches!(
        scheduler.schedule_at_fixed_rate(|| (), Duration::ZERO, Duration::MAX),
        Err(TaskError::InvalidArgument(_))
    ));
    assert_eq!(scheduler.scheduled_count(), 0);
}

#[test]
fn test_one_shot_counts_fire_when_run_ends() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let handle = scheduler
        .schedule(
            move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
                7
            },
            Duration::ZERO,
        )
        .unwrap();
    started_rx.recv().unwrap();
    assert_eq!(handle.fire_count(), 0);
    release_tx.send(()).unwrap();
    assert_eq!(handle.get(), Ok(7));
    assert_eq!(handle.fire_count(), 1);
}

#[test]
fn test_shutdown_keeps_one_shots_and_cancels_periodic() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let one_shot = scheduler.schedule(|| 11, Duration::from_millis(40)).unwrap();
    let periodic = scheduler
        .schedule_at_fixed_rate(|| (), Duration::from_secs(1), Duration::from_millis(5))
        .unwrap();
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
    assert!(periodic.is_cancelled());
    assert!(matches!(
        scheduler.schedule(|| 0, Duration::ZERO),
        Err(TaskError::Rejected(RejectReason::Shutdown))
    ));
    assert_eq!(one_shot.get(), Ok(11));
    assert!(scheduler.await_termination(Duration::from_secs(5)));
    assert!(scheduler.is_terminated());
}

#[test]
fn test_shutdown_can_drop_delayed_one_shots() {
    let scheduler = ScheduledExecutor::with_config(ScheduledConfig {
        run_delayed_after_shutdown: false,
        ..ScheduledConfig::default()
    })
    .unwrap();
    let one_shot = scheduler.schedule(|| 1, Duration::from_secs(10)).unwrap();
    scheduler.shutdown();
    assert_eq!(one_shot.get(), Err(TaskError::Cancelled));
    assert!(scheduler.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_now_cancels_everything() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let one_shot = scheduler.schedule(|| 1, Duration::from_secs(10)).unwrap();
    let periodic = scheduler
        .schedule_with_fixed_delay(|| (), Duration::from_secs(10), Duration::from_secs(1))
        .unwrap();
    let cancelled = scheduler.shutdown_now();
    assert!(cancelled.contains(&one_shot.id()));
    assert!(cancelled.contains(&periodic.id()));
    assert_eq!(one_shot.get(), Err(TaskError::Cancelled));
    assert!(periodic.is_cancelled());
    assert!(scheduler.await_termination(Duration::from_secs(5)));
}
