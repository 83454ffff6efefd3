//! 集群行为测试
//!
//! 共享同一个存储的多调度器实例：获取竞争恰好一方成功、签到记录
//! 维护、启动时回收自身崩溃遗留的在途触发并补触发恢复作业。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use tempus::{
    Clock, JobDetail, JobKey, JobStore, MemoryJobStore, ScheduleSpec, SchedulerBuilder,
    SchedulerConfig, SimpleSchedule, SystemClock, Trigger, TriggerKey,
};
use tempus_testing_utils::CountingJob;

fn shared_store(instance_id: &str) -> Arc<MemoryJobStore> {
    Arc::new(MemoryJobStore::new(
        instance_id.to_string(),
        Duration::milliseconds(200),
        Duration::seconds(60),
        Arc::new(SystemClock),
    ))
}

fn clustered_config(instance_id: &str) -> SchedulerConfig {
    let mut config = SchedulerConfig::embedded_default();
    config.instance_id = instance_id.to_string();
    config.cluster.clustered = true;
    config.cluster.check_in_interval_ms = 200;
    config
}

/// S5: 两个实例同时竞争同一个到期触发器，恰好一方获取成功
#[tokio::test]
async fn test_acquire_race_between_two_schedulers() {
    let store = shared_store("node-shared");
    let counting = CountingJob::new();

    let scheduler_a = SchedulerBuilder::embedded()
        .register_job("counting", counting.clone())
        .with_store(store.clone() as Arc<dyn JobStore>)
        .build()
        .await
        .unwrap();
    let scheduler_b = SchedulerBuilder::embedded()
        .register_job("counting", counting.clone())
        .with_store(store.clone() as Arc<dyn JobStore>)
        .build()
        .await
        .unwrap();

    let job = JobDetail::new(JobKey::with_default_group("j-race"), "counting");
    let trigger = Trigger::new(
        TriggerKey::with_default_group("t-race"),
        job.key.clone(),
        Utc::now() + Duration::milliseconds(150),
        ScheduleSpec::Simple(SimpleSchedule::one_shot()),
    );
    scheduler_a.schedule_job(job, trigger).await.unwrap();

    scheduler_a.start().unwrap();
    scheduler_b.start().unwrap();
    tokio::time::sleep(StdDuration::from_millis(800)).await;

    assert_eq!(counting.fire_count(), 1, "触发器必须恰好触发一次");
    assert!(store.fired_rows().await.is_empty());

    scheduler_a.shutdown(true).await.unwrap();
    scheduler_b.shutdown(true).await.unwrap();
}

/// 集群管理器按间隔维护本节点的签到记录
#[tokio::test]
async fn test_cluster_check_in_updates_state_record() {
    let store = shared_store("node-heartbeat");
    let scheduler = SchedulerBuilder::with_config(clustered_config("node-heartbeat"))
        .with_store(store.clone() as Arc<dyn JobStore>)
        .build()
        .await
        .unwrap();

    tokio::time::sleep(StdDuration::from_millis(150)).await;
    let states = store.scheduler_states().await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].instance_id, "node-heartbeat");
    let first_check_in = states[0].last_check_in;

    tokio::time::sleep(StdDuration::from_millis(500)).await;
    let states = store.scheduler_states().await;
    assert!(
        states[0].last_check_in > first_check_in,
        "签到时间必须持续刷新"
    );

    scheduler.shutdown(true).await.unwrap();
}

/// S4（启动自恢复形态）：上次崩溃遗留的 EXECUTING 记录在启动时被回收，
/// requests_recovery 的作业得到恰好一个恢复触发器并以原计划时间补触发
#[tokio::test]
async fn test_startup_recovery_refires_crashed_job() {
    let store = shared_store("node-a");
    let clock = SystemClock;

    // 模拟上一次进程：注册作业、获取并点火，然后"崩溃"（不完成）
    let job = JobDetail::new(JobKey::with_default_group("j-recover"), "counting")
        .requests_recovery(true)
        .durable(true);
    let trigger = {
        let mut t = Trigger::new(
            TriggerKey::with_default_group("t-recover"),
            job.key.clone(),
            clock.now(),
            ScheduleSpec::Simple(SimpleSchedule::one_shot()),
        );
        t.compute_first_fire_time(None).unwrap();
        t
    };
    let scheduled_at = trigger.next_fire_time.unwrap();
    store.store_job_and_trigger(&job, &trigger, false).await.unwrap();
    let acquired = store
        .acquire_next_triggers(clock.now() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    let fired = store.triggers_fired(&acquired).await.unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(store.fired_rows().await.len(), 1);

    // "重启"同一实例：启动恢复清理遗留记录并合成恢复触发器
    let counting = CountingJob::new();
    let mut config = SchedulerConfig::embedded_default();
    config.instance_id = "node-a".to_string();
    let scheduler = SchedulerBuilder::with_config(config)
        .register_job("counting", counting.clone())
        .with_store(store.clone() as Arc<dyn JobStore>)
        .build()
        .await
        .unwrap();

    assert!(store.fired_rows().await.is_empty(), "遗留在途记录必须被清理");

    scheduler.start().unwrap();
    tokio::time::sleep(StdDuration::from_millis(600)).await;

    let fires = counting.fires();
    assert_eq!(fires.len(), 1, "恢复作业必须恰好补触发一次");
    assert!(fires[0].recovering, "补触发的执行上下文必须标记为恢复");
    assert_eq!(
        fires[0].scheduled_fire_time, scheduled_at,
        "恢复触发器携带原计划触发时间"
    );

    scheduler.shutdown(true).await.unwrap();
}
