//! Scheduler unit tests


use crate::runtime::scheduler::{
    PoolStatsSnapshot, SchedulerConfig, SchedulerStats, StealStrategy, TaskId, TaskState,
    WorkerStatus,
};

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_next_is_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b.inner() > a.inner());
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(5).to_string(), "Task(5)");
        assert_eq!(TaskId::from(9), TaskId(9));
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_round_trip() {
        for state in [
            TaskState::Pending,
            TaskState::Forked,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Exceptional,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Forked.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Exceptional.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_worker_status_round_trip() {
        for status in [
            WorkerStatus::Idle,
            WorkerStatus::Running,
            WorkerStatus::Stealing,
            WorkerStatus::Parked,
            WorkerStatus::Exited,
        ] {
            assert_eq!(WorkerStatus::from_u8(status.as_u8()), status);
        }
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.steal_strategy, StealStrategy::Random);
        assert_eq!(config.idle_timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_scheduler_config_custom() {
        let config = SchedulerConfig {
            num_workers: 8,
            steal_strategy: StealStrategy::RoundRobin,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.clone().steal_strategy, StealStrategy::RoundRobin);
    }
}

#[cfg(test)]
mod scheduler_stats_tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn test_record_executed_by_state() {
        let stats = SchedulerStats::default();
        stats.record_executed(TaskState::Completed, Duration::from_micros(10));
        stats.record_executed(TaskState::Exceptional, Duration::from_micros(5));
        stats.record_executed(TaskState::Cancelled, Duration::ZERO);
        assert_eq!(stats.tasks_completed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.tasks_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.tasks_cancelled.load(Ordering::Relaxed), 1);
        assert_eq!(stats.total_exec_time_us.load(Ordering::Relaxed), 15);
    }

    #[test]
    fn test_snapshot_default_is_zero() {
        let snapshot = PoolStatsSnapshot::default();
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.exec_time, Duration::ZERO);
    }
}
