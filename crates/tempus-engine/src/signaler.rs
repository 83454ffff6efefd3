use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

use tempus_core::{SchedulerEvent, SchedulerSignaler};
use tempus_domain::{JobKey, TriggerKey};

/// 调度变更信号器实现
///
/// 唤醒路径是一个 `Notify` 加最早候选触发时间槽位；`notify_*` 家族把
/// 事件投递到监听通道，不要求低延迟。信号只打断调度循环的空转等待，
/// 从不打断执行中的作业。
pub struct SchedulingSignaler {
    notify: Notify,
    candidate: Mutex<Option<DateTime<Utc>>>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl SchedulingSignaler {
    pub fn new(events: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        Self {
            notify: Notify::new(),
            candidate: Mutex::new(None),
            events,
        }
    }

    /// 向事件通道投递事件，订阅方不存在时静默丢弃
    pub fn post(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    /// 等待信号或超时，被信号唤醒时返回 true
    pub async fn wait_for_signal(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    /// 取出并清空候选触发时间提示
    pub fn take_candidate(&self) -> Option<DateTime<Utc>> {
        self.candidate.lock().expect("候选时间槽锁已中毒").take()
    }
}

impl SchedulerSignaler for SchedulingSignaler {
    fn signal_scheduling_change(&self, candidate_earliest: Option<DateTime<Utc>>) {
        if let Some(t) = candidate_earliest {
            let mut slot = self.candidate.lock().expect("候选时间槽锁已中毒");
            *slot = Some(slot.map_or(t, |existing| existing.min(t)));
        }
        self.notify.notify_one();
    }

    fn notify_misfired(&self, trigger: &TriggerKey) {
        self.post(SchedulerEvent::TriggerMisfired(trigger.clone()));
    }

    fn notify_finalized(&self, trigger: &TriggerKey) {
        self.post(SchedulerEvent::TriggerFinalized(trigger.clone()));
    }

    fn notify_job_deleted(&self, job: &JobKey) {
        self.post(SchedulerEvent::JobDeleted(job.clone()));
    }

    fn notify_error(&self, message: &str) {
        self.post(SchedulerEvent::SchedulerError {
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let signaler = SchedulingSignaler::new(tx);
        signaler.signal_scheduling_change(None);
        assert!(signaler.wait_for_signal(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_signal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let signaler = SchedulingSignaler::new(tx);
        assert!(!signaler.wait_for_signal(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_candidate_keeps_earliest() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let signaler = SchedulingSignaler::new(tx);
        let early = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let late = early + chrono::Duration::seconds(60);
        signaler.signal_scheduling_change(Some(late));
        signaler.signal_scheduling_change(Some(early));
        assert_eq!(signaler.take_candidate(), Some(early));
        assert_eq!(signaler.take_candidate(), None);
    }

    #[tokio::test]
    async fn test_events_delivered_to_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signaler = SchedulingSignaler::new(tx);
        signaler.notify_misfired(&TriggerKey::with_default_group("t1"));
        match rx.recv().await {
            Some(SchedulerEvent::TriggerMisfired(key)) => assert_eq!(key.name, "t1"),
            other => panic!("期望 TriggerMisfired 事件，实际: {other:?}"),
        }
    }
}
