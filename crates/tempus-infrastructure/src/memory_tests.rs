//! 内存存储的契约测试
//!
//! 覆盖获取顺序、获取竞争、点火状态迁移、非并发阻塞、misfire 清扫、
//! 暂停分组记忆与故障实例恢复。

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use tempus_core::{Clock, JobStore};
use tempus_domain::{
    CompletedExecutionInstruction, FiredTriggerState, GroupMatcher, MisfireInstruction,
    SchedulerStateRecord, TriggerFiredResult, TriggerKey, TriggerState,
    KEY_RECOVERING_ORIG_FIRE_TIME, KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
    KEY_RECOVERING_TRIGGER_GROUP, KEY_RECOVERING_TRIGGER_NAME, RECOVERING_JOBS_GROUP,
};
use tempus_testing_utils::{job_detail, one_shot_trigger, repeating_trigger, ManualClock};

use crate::memory::MemoryJobStore;

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn new_store() -> (Arc<MemoryJobStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(MemoryJobStore::new(
        "node-test".to_string(),
        Duration::seconds(15),
        Duration::seconds(60),
        clock.clone() as Arc<dyn Clock>,
    ));
    (store, clock)
}

#[tokio::test]
async fn test_store_and_retrieve_round_trip() {
    let (store, _clock) = new_store();
    let mut job = job_detail("j1");
    job.data_map.insert("region", "cn-north");
    let trigger = one_shot_trigger("t1", &job.key, t0());

    store.store_job_and_trigger(&job, &trigger, false).await.unwrap();

    let read_job = store.retrieve_job(&job.key).await.unwrap().unwrap();
    assert_eq!(read_job, job);
    let read_trigger = store.retrieve_trigger(&trigger.key).await.unwrap().unwrap();
    assert_eq!(read_trigger, trigger);
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_duplicate_insert_without_replace_fails() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    let trigger = one_shot_trigger("t1", &job.key, t0());

    store.store_job_and_trigger(&job, &trigger, false).await.unwrap();
    let err = store
        .store_job_and_trigger(&job, &trigger, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tempus_core::SchedulerError::ObjectAlreadyExists(_)
    ));
    // replace = true 则允许覆盖
    store.store_job_and_trigger(&job, &trigger, true).await.unwrap();
}

#[tokio::test]
async fn test_missing_trigger_state_is_deleted() {
    let (store, _clock) = new_store();
    let state = store
        .get_trigger_state(&TriggerKey::with_default_group("nope"))
        .await
        .unwrap();
    assert_eq!(state, TriggerState::Deleted);
}

#[tokio::test]
async fn test_acquire_ordering_law() {
    // 排序律: (next_fire_time asc, priority desc, name asc)
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();

    let mut early = one_shot_trigger("early", &job.key, t0());
    early.compute_first_fire_time(None).unwrap();
    let mut high_prio = one_shot_trigger("prio", &job.key, t0() + Duration::seconds(5));
    high_prio.priority = 9;
    let a = one_shot_trigger("a", &job.key, t0() + Duration::seconds(5));
    let b = one_shot_trigger("b", &job.key, t0() + Duration::seconds(5));

    for trigger in [&b, &a, &high_prio, &early] {
        store.store_trigger(trigger, false).await.unwrap();
    }

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 10, Duration::zero())
        .await
        .unwrap();
    let names: Vec<&str> = acquired.iter().map(|t| t.key.name.as_str()).collect();
    assert_eq!(names, vec!["early", "prio", "a", "b"]);
}

#[tokio::test]
async fn test_acquire_respects_max_count_and_horizon() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    for i in 0..5 {
        let trigger = one_shot_trigger(
            &format!("t{i}"),
            &job.key,
            t0() + Duration::seconds(i),
        );
        store.store_trigger(&trigger, false).await.unwrap();
    }
    // 远在地平线之外的触发器
    let far = one_shot_trigger("far", &job.key, t0() + Duration::hours(1));
    store.store_trigger(&far, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 3, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 3);
    assert!(acquired.iter().all(|t| t.key.name != "far"));

    // 其余两个仍处于 WAITING
    let again = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 10, Duration::zero())
        .await
        .unwrap();
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_acquire_race_returns_each_trigger_once() {
    // 幂等律: 并发获取时每个触发器只交给一个调用方
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("only", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let horizon = t0() + Duration::seconds(30);
    let (a, b) = tokio::join!(
        store.acquire_next_triggers(horizon, 1, Duration::zero()),
        store.acquire_next_triggers(horizon, 1, Duration::zero()),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.len() + b.len(), 1, "触发器必须且只能被一方获取");
}

#[tokio::test]
async fn test_acquired_trigger_has_exactly_one_fired_row() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 5, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);

    let rows = store.fired_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].trigger_key, trigger.key);
    assert_eq!(rows[0].state, FiredTriggerState::Acquired);
    assert_eq!(rows[0].instance_id, "node-test");
    assert_eq!(rows[0].scheduled_at, t0());
}

#[tokio::test]
async fn test_release_acquired_trigger() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    store.release_acquired_trigger(&acquired[0]).await.unwrap();

    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Waiting
    );
    assert!(store.fired_rows().await.is_empty());
}

#[tokio::test]
async fn test_triggers_fired_advances_and_completes_one_shot() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    clock.advance(Duration::milliseconds(100));
    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    let results = store.triggers_fired(&acquired).await.unwrap();
    assert_eq!(results.len(), 1);
    let TriggerFiredResult::Fired(bundle) = &results[0] else {
        panic!("期望点火成功");
    };
    assert_eq!(bundle.scheduled_fire_time, t0());
    assert_eq!(bundle.next_fire_time, None);
    assert_eq!(bundle.trigger.previous_fire_time, Some(t0()));

    // 一次性触发器点火后即 COMPLETE
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Complete
    );
    // 已触发记录迁移到 EXECUTING
    let rows = store.fired_rows().await;
    assert_eq!(rows[0].state, FiredTriggerState::Executing);
}

#[tokio::test]
async fn test_triggers_fired_rejects_deleted_trigger() {
    let (store, _clock) = new_store();
    let job = job_detail("j1").durable(true);
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    // 获取与点火之间触发器被删除
    store.remove_trigger(&trigger.key).await.unwrap();

    let results = store.triggers_fired(&acquired).await.unwrap();
    assert!(matches!(&results[0], TriggerFiredResult::Rejected(k) if k == &trigger.key));
}

#[tokio::test]
async fn test_non_concurrent_job_blocks_peer_triggers() {
    // 不变式: 非并发作业执行期间，其余触发器必须处于 BLOCKED 族状态
    let (store, _clock) = new_store();
    let job = job_detail("j1").concurrent_execution_disallowed(true);
    store.store_job(&job, false).await.unwrap();
    let t1 = repeating_trigger("t1", &job.key, t0(), 1_000, tempus_domain::REPEAT_FOREVER);
    let t2 = repeating_trigger("t2", &job.key, t0() + Duration::milliseconds(500), 1_000, tempus_domain::REPEAT_FOREVER);
    store.store_trigger(&t1, false).await.unwrap();
    store.store_trigger(&t2, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].key, t1.key);

    let results = store.triggers_fired(&acquired).await.unwrap();
    let TriggerFiredResult::Fired(bundle) = &results[0] else {
        panic!("期望点火成功");
    };

    // 自身与同作业触发器都被阻塞
    assert_eq!(
        store.get_trigger_state(&t1.key).await.unwrap(),
        TriggerState::Blocked
    );
    assert_eq!(
        store.get_trigger_state(&t2.key).await.unwrap(),
        TriggerState::Blocked
    );

    // 执行期间获取不到同作业的任何触发器
    let during = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 10, Duration::zero())
        .await
        .unwrap();
    assert!(during.is_empty());

    // 执行完成后全部释放回 WAITING
    store
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();
    assert_eq!(
        store.get_trigger_state(&t1.key).await.unwrap(),
        TriggerState::Waiting
    );
    assert_eq!(
        store.get_trigger_state(&t2.key).await.unwrap(),
        TriggerState::Waiting
    );
    assert!(store.fired_rows().await.is_empty());
}

#[tokio::test]
async fn test_non_concurrent_batch_takes_single_trigger_per_job() {
    let (store, _clock) = new_store();
    let job = job_detail("j1").concurrent_execution_disallowed(true);
    store.store_job(&job, false).await.unwrap();
    let t1 = one_shot_trigger("t1", &job.key, t0());
    let t2 = one_shot_trigger("t2", &job.key, t0());
    store.store_trigger(&t1, false).await.unwrap();
    store.store_trigger(&t2, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 10, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1, "同一批内非并发作业只取一个触发器");
}

#[tokio::test]
async fn test_completed_one_shot_removes_trigger_and_gcs_job() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    let results = store.triggers_fired(&acquired).await.unwrap();
    let TriggerFiredResult::Fired(bundle) = &results[0] else {
        panic!("期望点火成功");
    };
    store
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();

    // 触发器与非持久作业都被删除
    assert!(store.retrieve_trigger(&trigger.key).await.unwrap().is_none());
    assert!(store.retrieve_job(&job.key).await.unwrap().is_none());
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Deleted
    );
}

#[tokio::test]
async fn test_durable_job_survives_last_trigger() {
    let (store, _clock) = new_store();
    let job = job_detail("j1").durable(true);
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    store.remove_trigger(&trigger.key).await.unwrap();
    assert!(store.retrieve_job(&job.key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_persist_job_data_after_execution() {
    let (store, _clock) = new_store();
    let job = job_detail("j1").persist_data_after_execution(true).durable(true);
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    let results = store.triggers_fired(&acquired).await.unwrap();
    let TriggerFiredResult::Fired(bundle) = &results[0] else {
        panic!("期望点火成功");
    };

    let mut updated_job = bundle.job.clone();
    updated_job.data_map.insert("last_offset", 42);
    store
        .triggered_job_complete(
            &bundle.trigger,
            &updated_job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();

    let stored = store.retrieve_job(&job.key).await.unwrap().unwrap();
    assert_eq!(stored.data_map.get_i64("last_offset"), Some(42));
}

#[tokio::test]
async fn test_misfire_sweep_fire_now_for_one_shot() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    // 超过 60 秒阈值
    clock.advance(Duration::seconds(90));
    let result = store
        .recover_misfires(Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(result.processed, 1);
    assert!(!result.has_more);
    assert_eq!(result.misfired, vec![trigger.key.clone()]);

    // SMART_POLICY 对一次性触发器解析为 FIRE_NOW
    let updated = store.retrieve_trigger(&trigger.key).await.unwrap().unwrap();
    assert_eq!(updated.next_fire_time, Some(clock.now()));
    assert_eq!(result.earliest_new_fire_time, Some(clock.now()));
}

#[tokio::test]
async fn test_misfire_sweep_skips_ignore_policy() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0())
        .with_misfire_instruction(MisfireInstruction::Ignore);
    store.store_trigger(&trigger, false).await.unwrap();

    clock.advance(Duration::seconds(90));
    let result = store
        .recover_misfires(Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(result.processed, 0);

    // 触发时间保持不变，仍可被获取
    let acquired = store
        .acquire_next_triggers(clock.now() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].next_fire_time, Some(t0()));
}

#[tokio::test]
async fn test_misfire_sweep_reports_has_more() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    for i in 0..5 {
        let trigger = one_shot_trigger(&format!("t{i}"), &job.key, t0());
        store.store_trigger(&trigger, false).await.unwrap();
    }
    clock.advance(Duration::seconds(90));
    let result = store
        .recover_misfires(Duration::seconds(60), 3)
        .await
        .unwrap();
    assert_eq!(result.processed, 3);
    assert!(result.has_more);
}

#[tokio::test]
async fn test_get_misfired_triggers_cutoff() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let stale = one_shot_trigger("stale", &job.key, t0());
    let fresh = one_shot_trigger("fresh", &job.key, t0() + Duration::seconds(120));
    store.store_trigger(&stale, false).await.unwrap();
    store.store_trigger(&fresh, false).await.unwrap();

    clock.advance(Duration::seconds(90));
    let cutoff = clock.now() - Duration::seconds(60);
    let misfired = store.get_misfired_triggers(cutoff, 10).await.unwrap();
    assert_eq!(misfired, vec![stale.key.clone()]);
}

#[tokio::test]
async fn test_paused_group_memory() {
    // 先记住暂停的分组模式，之后加入该分组的触发器直接 PAUSED
    let (store, _clock) = new_store();
    let affected = store
        .pause_triggers(&GroupMatcher::starts_with("g"))
        .await
        .unwrap();
    assert!(affected.is_empty());

    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let mut trigger = one_shot_trigger("t1", &job.key, t0());
    trigger.key = TriggerKey::new("t1", "gX");
    store.store_trigger(&trigger, false).await.unwrap();

    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Paused
    );
    assert_eq!(
        store.get_paused_trigger_groups().await.unwrap(),
        vec!["g*".to_string()]
    );

    // 恢复后重新入库的触发器回到 WAITING
    store
        .resume_triggers(&GroupMatcher::starts_with("g"))
        .await
        .unwrap();
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_resume_applies_misfire_policy() {
    let (store, clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();
    store.pause_trigger(&trigger.key).await.unwrap();

    clock.advance(Duration::seconds(120));
    store.resume_trigger(&trigger.key).await.unwrap();

    let updated = store.retrieve_trigger(&trigger.key).await.unwrap().unwrap();
    // 恢复时已超过阈值，FIRE_NOW 把触发时间拉到当前
    assert_eq!(updated.next_fire_time, Some(clock.now()));
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_pause_all_and_resume_all() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let t1 = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&t1, false).await.unwrap();

    store.pause_all().await.unwrap();
    assert_eq!(
        store.get_trigger_state(&t1.key).await.unwrap(),
        TriggerState::Paused
    );
    // pause_all 之后新增触发器也被暂停
    let t2 = one_shot_trigger("t2", &job.key, t0());
    store.store_trigger(&t2, false).await.unwrap();
    assert_eq!(
        store.get_trigger_state(&t2.key).await.unwrap(),
        TriggerState::Paused
    );

    store.resume_all().await.unwrap();
    assert_eq!(
        store.get_trigger_state(&t1.key).await.unwrap(),
        TriggerState::Waiting
    );
    assert_eq!(
        store.get_trigger_state(&t2.key).await.unwrap(),
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_recover_jobs_synthesizes_recovery_trigger() {
    // 恢复律: 崩溃实例的 requests_recovery 作业得到恰好一个恢复触发器
    let (store, clock) = new_store();
    let job = job_detail("j1").requests_recovery(true).durable(true);
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    clock.advance(Duration::milliseconds(50));
    let fired_at = clock.now();
    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    let results = store.triggers_fired(&acquired).await.unwrap();
    assert!(matches!(results[0], TriggerFiredResult::Fired(_)));
    store.check_in().await.unwrap();

    // 模拟本实例崩溃后另一节点执行清扫
    let report = store.recover_jobs("node-test").await.unwrap();
    assert_eq!(report.fired_rows_deleted, 1);
    assert_eq!(report.recovery_triggers.len(), 1);

    let recovery_key = &report.recovery_triggers[0];
    assert_eq!(recovery_key.group, RECOVERING_JOBS_GROUP);
    assert!(recovery_key.name.starts_with("recover_node-test_"));

    let recovery = store.retrieve_trigger(recovery_key).await.unwrap().unwrap();
    assert_eq!(recovery.job_key, job.key);
    assert_eq!(recovery.start_time, t0());
    assert_eq!(recovery.next_fire_time, Some(t0()));
    assert_eq!(recovery.misfire_instruction, MisfireInstruction::Ignore);

    // 四条恢复痕迹
    let data = &recovery.data_map;
    assert_eq!(
        data.get_string(KEY_RECOVERING_TRIGGER_NAME).as_deref(),
        Some("t1")
    );
    assert_eq!(
        data.get_string(KEY_RECOVERING_TRIGGER_GROUP).as_deref(),
        Some("DEFAULT")
    );
    assert_eq!(
        data.get_string(KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME)
            .as_deref(),
        Some(t0().timestamp_millis().to_string().as_str())
    );
    assert_eq!(
        data.get_string(KEY_RECOVERING_ORIG_FIRE_TIME).as_deref(),
        Some(fired_at.timestamp_millis().to_string().as_str())
    );

    // 在途记录与存活记录都被清理
    assert!(store.fired_rows().await.is_empty());
    assert!(store.scheduler_states().await.is_empty());
}

#[tokio::test]
async fn test_recover_jobs_restores_acquired_trigger() {
    let (store, _clock) = new_store();
    let job = job_detail("j1").durable(true);
    store.store_job(&job, false).await.unwrap();
    let trigger = repeating_trigger("t1", &job.key, t0(), 1_000, tempus_domain::REPEAT_FOREVER);
    store.store_trigger(&trigger, false).await.unwrap();

    let acquired = store
        .acquire_next_triggers(t0() + Duration::seconds(30), 1, Duration::zero())
        .await
        .unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Acquired
    );

    let report = store.recover_jobs("node-test").await.unwrap();
    assert_eq!(report.fired_rows_deleted, 1);
    assert!(report.recovery_triggers.is_empty());
    assert_eq!(report.restored_triggers, vec![trigger.key.clone()]);
    assert_eq!(
        store.get_trigger_state(&trigger.key).await.unwrap(),
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_find_failed_instances_with_tolerance() {
    let (store, clock) = new_store();
    store.check_in().await.unwrap();
    store
        .insert_scheduler_state_for_test(SchedulerStateRecord {
            instance_id: "node-a".to_string(),
            last_check_in: clock.now(),
            check_in_interval_ms: 15_000,
        })
        .await;

    // 一个签到间隔内无故障
    clock.advance(Duration::seconds(10));
    assert!(store.find_failed_instances().await.unwrap().is_empty());

    // 超过 间隔 + 容忍度（再一个间隔）后判定故障
    clock.advance(Duration::seconds(25));
    let failed = store.find_failed_instances().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].instance_id, "node-a");
}

#[tokio::test]
async fn test_check_in_excludes_self_from_failures() {
    let (store, clock) = new_store();
    store.check_in().await.unwrap();
    clock.advance(Duration::hours(1));
    // 自身过期不计入故障列表，签到由调用方周期性完成
    assert!(store.find_failed_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_keeps_scheduler_states() {
    let (store, _clock) = new_store();
    let job = job_detail("j1");
    store.store_job(&job, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();
    store.pause_triggers(&GroupMatcher::equals("DEFAULT")).await.unwrap();
    store.check_in().await.unwrap();

    store.clear_all_scheduling_data().await.unwrap();

    assert!(store.retrieve_job(&job.key).await.unwrap().is_none());
    assert!(store.retrieve_trigger(&trigger.key).await.unwrap().is_none());
    assert!(store.get_paused_trigger_groups().await.unwrap().is_empty());
    assert_eq!(store.scheduler_states().await.len(), 1);
}

#[tokio::test]
async fn test_replace_trigger_requires_same_job() {
    let (store, _clock) = new_store();
    let job1 = job_detail("j1");
    let job2 = job_detail("j2");
    store.store_job(&job1, false).await.unwrap();
    store.store_job(&job2, false).await.unwrap();
    let trigger = one_shot_trigger("t1", &job1.key, t0());
    store.store_trigger(&trigger, false).await.unwrap();

    let other_job_trigger = one_shot_trigger("t1", &job2.key, t0());
    assert!(store
        .replace_trigger(&trigger.key, &other_job_trigger)
        .await
        .is_err());

    let replacement = one_shot_trigger("t1", &job1.key, t0() + Duration::seconds(5));
    assert!(store.replace_trigger(&trigger.key, &replacement).await.unwrap());
    let stored = store.retrieve_trigger(&trigger.key).await.unwrap().unwrap();
    assert_eq!(stored.next_fire_time, Some(t0() + Duration::seconds(5)));

    // 不存在的触发器返回 false
    let missing = TriggerKey::with_default_group("missing");
    assert!(!store.replace_trigger(&missing, &replacement).await.unwrap());
}
