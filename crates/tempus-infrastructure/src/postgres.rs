use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};

use tempus_core::{
    Clock, InstanceRecoveryReport, JobStore, MisfireSweepResult, SchedulerError, SchedulerResult,
};
use tempus_domain::{
    CalendarSpec, CompletedExecutionInstruction, FiredTrigger, FiredTriggerState, GroupMatcher,
    JobDetail, JobKey, MisfireInstruction, SchedulerStateRecord, ScheduleSpec,
    SimpleSchedule, Trigger, TriggerFiredBundle, TriggerFiredResult, TriggerKey, TriggerState,
    KEY_RECOVERING_ORIG_FIRE_TIME, KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
    KEY_RECOVERING_TRIGGER_GROUP, KEY_RECOVERING_TRIGGER_NAME, RECOVERING_JOBS_GROUP,
};

use crate::migrations;

/// 所有调度写路径共用的粗粒度命名锁
const LOCK_TRIGGER_ACCESS: &str = "TRIGGER_ACCESS";
/// 仅在集群签到期间持有的命名锁
const LOCK_STATE_ACCESS: &str = "STATE_ACCESS";

const TRIGGER_COLUMNS: &str = "trigger_name, trigger_group, job_name, job_group, description, \
     calendar_name, priority, state, start_time, end_time, prev_fire_time, next_fire_time, \
     misfire_instruction, schedule, data_map, fire_instance_id";

const FIRED_COLUMNS: &str = "entry_id, trigger_name, trigger_group, job_name, job_group, \
     instance_id, state, fired_at, scheduled_at, priority, non_concurrent, requests_recovery";

/// PostgreSQL 作业存储
///
/// 每个逻辑操作都在一个事务里完成，写路径先以
/// `SELECT ... FOR UPDATE` 占住命名锁行再操作数据，锁随事务提交释放。
/// 多个节点共享同一个数据库即构成集群。
pub struct PostgresJobStore {
    pool: PgPool,
    instance_id: String,
    check_in_interval: Duration,
    misfire_threshold: Duration,
    clock: Arc<dyn Clock>,
    recovery_seq: AtomicU64,
}

impl PostgresJobStore {
    pub fn new(
        pool: PgPool,
        instance_id: String,
        check_in_interval: Duration,
        misfire_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let seed = clock.now().timestamp_millis().max(0) as u64;
        Self {
            pool,
            instance_id,
            check_in_interval,
            misfire_threshold,
            clock,
            recovery_seq: AtomicU64::new(seed),
        }
    }

    /// 按连接串建池并构造存储
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connection_timeout: std::time::Duration,
        instance_id: String,
        check_in_interval: Duration,
        misfire_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connection_timeout)
            .connect(url)
            .await?;
        Ok(Self::new(
            pool,
            instance_id,
            check_in_interval,
            misfire_threshold,
            clock,
        ))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 开启事务并占住命名锁行
    async fn begin_locked(&self, lock: &str) -> SchedulerResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT lock_name FROM tempus_locks WHERE lock_name = $1 FOR UPDATE")
            .bind(lock)
            .fetch_optional(&mut *tx)
            .await?;
        if row.is_none() {
            return Err(SchedulerError::persistence(format!(
                "命名锁行 {lock} 不存在，存储尚未初始化"
            )));
        }
        Ok(tx)
    }

    fn row_to_job(row: &PgRow) -> SchedulerResult<JobDetail> {
        let data_map: serde_json::Value = row.try_get("data_map")?;
        Ok(JobDetail {
            key: JobKey::new(
                row.try_get::<String, _>("job_name")?,
                row.try_get::<String, _>("job_group")?,
            ),
            description: row.try_get("description")?,
            job_type: row.try_get("job_type")?,
            data_map: serde_json::from_value(data_map)?,
            durable: row.try_get("durable")?,
            persist_data_after_execution: row.try_get("persist_data")?,
            concurrent_execution_disallowed: row.try_get("non_concurrent")?,
            requests_recovery: row.try_get("requests_recovery")?,
        })
    }

    fn row_to_trigger(row: &PgRow) -> SchedulerResult<(Trigger, TriggerState)> {
        let schedule: serde_json::Value = row.try_get("schedule")?;
        let data_map: serde_json::Value = row.try_get("data_map")?;
        let misfire: String = row.try_get("misfire_instruction")?;
        let trigger = Trigger {
            key: TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            ),
            job_key: JobKey::new(
                row.try_get::<String, _>("job_name")?,
                row.try_get::<String, _>("job_group")?,
            ),
            description: row.try_get("description")?,
            calendar_name: row.try_get("calendar_name")?,
            priority: row.try_get("priority")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            previous_fire_time: row.try_get("prev_fire_time")?,
            next_fire_time: row.try_get("next_fire_time")?,
            misfire_instruction: MisfireInstruction::parse(&misfire)?,
            schedule: serde_json::from_value(schedule)?,
            data_map: serde_json::from_value(data_map)?,
            fire_instance_id: row.try_get("fire_instance_id")?,
        };
        let state: TriggerState = row.try_get("state")?;
        Ok((trigger, state))
    }

    fn row_to_fired(row: &PgRow) -> SchedulerResult<FiredTrigger> {
        Ok(FiredTrigger {
            entry_id: row.try_get("entry_id")?,
            trigger_key: TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            ),
            job_key: JobKey::new(
                row.try_get::<String, _>("job_name")?,
                row.try_get::<String, _>("job_group")?,
            ),
            instance_id: row.try_get("instance_id")?,
            state: row.try_get("state")?,
            fired_at: row.try_get("fired_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            priority: row.try_get("priority")?,
            non_concurrent: row.try_get("non_concurrent")?,
            requests_recovery: row.try_get("requests_recovery")?,
        })
    }

    async fn upsert_job_tx(
        tx: &mut Transaction<'static, Postgres>,
        job: &JobDetail,
        replace: bool,
    ) -> SchedulerResult<()> {
        if !replace {
            let exists =
                sqlx::query("SELECT 1 FROM tempus_jobs WHERE job_name = $1 AND job_group = $2")
                    .bind(&job.key.name)
                    .bind(&job.key.group)
                    .fetch_optional(&mut **tx)
                    .await?;
            if exists.is_some() {
                return Err(SchedulerError::object_already_exists(job.key.to_string()));
            }
        }
        sqlx::query(
            r#"
            INSERT INTO tempus_jobs (job_name, job_group, description, job_type, data_map,
                                     durable, persist_data, non_concurrent, requests_recovery)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_name, job_group) DO UPDATE SET
                description = EXCLUDED.description,
                job_type = EXCLUDED.job_type,
                data_map = EXCLUDED.data_map,
                durable = EXCLUDED.durable,
                persist_data = EXCLUDED.persist_data,
                non_concurrent = EXCLUDED.non_concurrent,
                requests_recovery = EXCLUDED.requests_recovery
            "#,
        )
        .bind(&job.key.name)
        .bind(&job.key.group)
        .bind(&job.description)
        .bind(&job.job_type)
        .bind(serde_json::to_value(&job.data_map)?)
        .bind(job.durable)
        .bind(job.persist_data_after_execution)
        .bind(job.concurrent_execution_disallowed)
        .bind(job.requests_recovery)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn load_paused_matchers_tx(
        tx: &mut Transaction<'static, Postgres>,
        scope: &str,
    ) -> SchedulerResult<Vec<GroupMatcher>> {
        let rows = sqlx::query("SELECT matcher FROM tempus_paused_groups WHERE scope = $1")
            .bind(scope)
            .fetch_all(&mut **tx)
            .await?;
        let mut matchers = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("matcher")?;
            matchers.push(serde_json::from_value(value)?);
        }
        Ok(matchers)
    }

    async fn upsert_trigger_tx(
        tx: &mut Transaction<'static, Postgres>,
        trigger: &Trigger,
        replace: bool,
    ) -> SchedulerResult<()> {
        if !replace {
            let exists = sqlx::query(
                "SELECT 1 FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2",
            )
            .bind(&trigger.key.name)
            .bind(&trigger.key.group)
            .fetch_optional(&mut **tx)
            .await?;
            if exists.is_some() {
                return Err(SchedulerError::object_already_exists(
                    trigger.key.to_string(),
                ));
            }
        }
        let job_exists =
            sqlx::query("SELECT 1 FROM tempus_jobs WHERE job_name = $1 AND job_group = $2")
                .bind(&trigger.job_key.name)
                .bind(&trigger.job_key.group)
                .fetch_optional(&mut **tx)
                .await?;
        if job_exists.is_none() {
            return Err(SchedulerError::job_not_found(trigger.job_key.to_string()));
        }

        let trigger_paused = Self::load_paused_matchers_tx(tx, "TRIGGER")
            .await?
            .iter()
            .any(|m| m.matches(&trigger.key.group));
        let job_paused = Self::load_paused_matchers_tx(tx, "JOB")
            .await?
            .iter()
            .any(|m| m.matches(&trigger.job_key.group));
        let state = if trigger_paused || job_paused {
            TriggerState::Paused
        } else {
            TriggerState::Waiting
        };

        sqlx::query(
            r#"
            INSERT INTO tempus_triggers
                (trigger_name, trigger_group, job_name, job_group, description, calendar_name,
                 priority, state, start_time, end_time, prev_fire_time, next_fire_time,
                 misfire_instruction, schedule, data_map, fire_instance_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (trigger_name, trigger_group) DO UPDATE SET
                job_name = EXCLUDED.job_name,
                job_group = EXCLUDED.job_group,
                description = EXCLUDED.description,
                calendar_name = EXCLUDED.calendar_name,
                priority = EXCLUDED.priority,
                state = EXCLUDED.state,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                prev_fire_time = EXCLUDED.prev_fire_time,
                next_fire_time = EXCLUDED.next_fire_time,
                misfire_instruction = EXCLUDED.misfire_instruction,
                schedule = EXCLUDED.schedule,
                data_map = EXCLUDED.data_map,
                fire_instance_id = EXCLUDED.fire_instance_id
            "#,
        )
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(&trigger.job_key.name)
        .bind(&trigger.job_key.group)
        .bind(&trigger.description)
        .bind(&trigger.calendar_name)
        .bind(trigger.priority)
        .bind(state)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(trigger.previous_fire_time)
        .bind(trigger.next_fire_time)
        .bind(trigger.misfire_instruction.as_str())
        .bind(serde_json::to_value(&trigger.schedule)?)
        .bind(serde_json::to_value(&trigger.data_map)?)
        .bind(&trigger.fire_instance_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 回写触发器的调度进度（时间、调度状态与状态机状态）
    async fn update_trigger_progress_tx(
        tx: &mut Transaction<'static, Postgres>,
        trigger: &Trigger,
        state: TriggerState,
    ) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            UPDATE tempus_triggers
            SET state = $3, start_time = $4, prev_fire_time = $5, next_fire_time = $6,
                schedule = $7, fire_instance_id = $8
            WHERE trigger_name = $1 AND trigger_group = $2
            "#,
        )
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(state)
        .bind(trigger.start_time)
        .bind(trigger.previous_fire_time)
        .bind(trigger.next_fire_time)
        .bind(serde_json::to_value(&trigger.schedule)?)
        .bind(&trigger.fire_instance_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn load_calendar_tx(
        tx: &mut Transaction<'static, Postgres>,
        name: &str,
    ) -> SchedulerResult<Option<CalendarSpec>> {
        let row = sqlx::query("SELECT spec FROM tempus_calendars WHERE calendar_name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("spec")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn load_job_tx(
        tx: &mut Transaction<'static, Postgres>,
        key: &JobKey,
    ) -> SchedulerResult<Option<JobDetail>> {
        let row = sqlx::query(
            "SELECT job_name, job_group, description, job_type, data_map, durable, persist_data, \
             non_concurrent, requests_recovery FROM tempus_jobs WHERE job_name = $1 AND job_group = $2",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn load_trigger_tx(
        tx: &mut Transaction<'static, Postgres>,
        key: &TriggerKey,
    ) -> SchedulerResult<Option<(Trigger, TriggerState)>> {
        let row = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2"
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|r| Self::row_to_trigger(&r)).transpose()
    }

    async fn set_trigger_state_tx(
        tx: &mut Transaction<'static, Postgres>,
        key: &TriggerKey,
        state: TriggerState,
    ) -> SchedulerResult<()> {
        sqlx::query(
            "UPDATE tempus_triggers SET state = $3 WHERE trigger_name = $1 AND trigger_group = $2",
        )
        .bind(&key.name)
        .bind(&key.group)
        .bind(state)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 删除触发器并在非持久作业失去最后一个触发器时删除作业
    async fn remove_trigger_tx(
        tx: &mut Transaction<'static, Postgres>,
        key: &TriggerKey,
    ) -> SchedulerResult<bool> {
        let Some((trigger, _)) = Self::load_trigger_tx(tx, key).await? else {
            return Ok(false);
        };
        sqlx::query("DELETE FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2")
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut **tx)
            .await?;
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tempus_triggers WHERE job_name = $1 AND job_group = $2",
        )
        .bind(&trigger.job_key.name)
        .bind(&trigger.job_key.group)
        .fetch_one(&mut **tx)
        .await?;
        if remaining == 0 {
            sqlx::query(
                "DELETE FROM tempus_jobs WHERE job_name = $1 AND job_group = $2 AND durable = FALSE",
            )
            .bind(&trigger.job_key.name)
            .bind(&trigger.job_key.group)
            .execute(&mut **tx)
            .await?;
        }
        Ok(true)
    }

    /// 作业的在途执行全部结束后释放其被阻塞的触发器
    async fn unblock_job_triggers_tx(
        tx: &mut Transaction<'static, Postgres>,
        job_key: &JobKey,
    ) -> SchedulerResult<()> {
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'WAITING' \
             WHERE job_name = $1 AND job_group = $2 AND state = 'BLOCKED' AND next_fire_time IS NOT NULL",
        )
        .bind(&job_key.name)
        .bind(&job_key.group)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'COMPLETE' \
             WHERE job_name = $1 AND job_group = $2 AND state = 'BLOCKED' AND next_fire_time IS NULL",
        )
        .bind(&job_key.name)
        .bind(&job_key.group)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'PAUSED' \
             WHERE job_name = $1 AND job_group = $2 AND state = 'PAUSED_BLOCKED'",
        )
        .bind(&job_key.name)
        .bind(&job_key.group)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 对一个触发器应用 misfire 策略并回写
    async fn apply_misfire_tx(
        tx: &mut Transaction<'static, Postgres>,
        trigger: &mut Trigger,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let calendar = match &trigger.calendar_name {
            Some(name) => Self::load_calendar_tx(tx, name).await?,
            None => None,
        };
        let next = trigger.update_after_misfire(calendar.as_ref(), now)?;
        let state = if next.is_none() {
            TriggerState::Complete
        } else {
            TriggerState::Waiting
        };
        Self::update_trigger_progress_tx(tx, trigger, state).await?;
        Ok(next)
    }

    async fn resume_trigger_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &TriggerKey,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let Some((mut trigger, state)) = Self::load_trigger_tx(tx, key).await? else {
            return Ok(());
        };
        if !state.is_paused_variant() {
            return Ok(());
        }
        let job = Self::load_job_tx(tx, &trigger.job_key).await?;
        let non_concurrent = job.map(|j| j.concurrent_execution_disallowed).unwrap_or(false);
        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tempus_fired_triggers WHERE job_name = $1 AND job_group = $2",
        )
        .bind(&trigger.job_key.name)
        .bind(&trigger.job_key.group)
        .fetch_one(&mut **tx)
        .await?;

        if non_concurrent && running > 0 {
            Self::set_trigger_state_tx(tx, key, TriggerState::Blocked).await?;
            return Ok(());
        }

        let stale = trigger
            .next_fire_time
            .map(|t| t < now - self.misfire_threshold)
            .unwrap_or(false);
        if stale {
            debug!("触发器 {} 恢复时已错过触发，立即按 misfire 策略处理", key);
            Self::apply_misfire_tx(tx, &mut trigger, now).await?;
        } else {
            Self::set_trigger_state_tx(tx, key, TriggerState::Waiting).await?;
        }
        Ok(())
    }

    /// 暂停若干分组内的全部触发器
    async fn pause_groups_tx(
        tx: &mut Transaction<'static, Postgres>,
        groups: &[String],
        by_job_group: bool,
    ) -> SchedulerResult<()> {
        let column = if by_job_group { "job_group" } else { "trigger_group" };
        sqlx::query(&format!(
            "UPDATE tempus_triggers SET state = 'PAUSED_BLOCKED' \
             WHERE {column} = ANY($1) AND state = 'BLOCKED'"
        ))
        .bind(groups)
        .execute(&mut **tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE tempus_triggers SET state = 'PAUSED' \
             WHERE {column} = ANY($1) AND state IN ('WAITING', 'ACQUIRED')"
        ))
        .bind(groups)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 删除被 `matcher` 覆盖的已记住匹配器
    async fn forget_matchers_tx(
        tx: &mut Transaction<'static, Postgres>,
        scope: &str,
        matcher: &GroupMatcher,
    ) -> SchedulerResult<()> {
        let stored = Self::load_paused_matchers_tx(tx, scope).await?;
        for m in stored {
            let covered =
                &m == matcher || matches!(&m, GroupMatcher::Equals(g) if matcher.matches(g));
            if covered {
                sqlx::query(
                    "DELETE FROM tempus_paused_groups WHERE scope = $1 AND description = $2",
                )
                .bind(scope)
                .bind(m.describe())
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn remember_matcher_tx(
        tx: &mut Transaction<'static, Postgres>,
        scope: &str,
        matcher: &GroupMatcher,
    ) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO tempus_paused_groups (scope, description, matcher) VALUES ($1, $2, $3) \
             ON CONFLICT (scope, description) DO NOTHING",
        )
        .bind(scope)
        .bind(matcher.describe())
        .bind(serde_json::to_value(matcher)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn distinct_groups_tx(
        tx: &mut Transaction<'static, Postgres>,
        by_job_group: bool,
    ) -> SchedulerResult<Vec<String>> {
        let column = if by_job_group { "job_group" } else { "trigger_group" };
        let rows = sqlx::query(&format!("SELECT DISTINCT {column} AS g FROM tempus_triggers"))
            .fetch_all(&mut **tx)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("g").map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn initialize(&self) -> SchedulerResult<()> {
        migrations::run_postgres(&self.pool).await
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn store_job(&self, job: &JobDetail, replace: bool) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::upsert_job_tx(&mut tx, job, replace).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::upsert_trigger_tx(&mut tx, trigger, replace).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, job, trigger), fields(job = %job.key, trigger = %trigger.key))]
    async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
        replace: bool,
    ) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::upsert_job_tx(&mut tx, job, replace).await?;
        Self::upsert_trigger_tx(&mut tx, trigger, replace).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_job(&self, key: &JobKey) -> SchedulerResult<bool> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        sqlx::query("DELETE FROM tempus_triggers WHERE job_name = $1 AND job_group = $2")
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tempus_jobs WHERE job_name = $1 AND job_group = $2")
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> SchedulerResult<bool> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let existed = Self::remove_trigger_tx(&mut tx, key).await?;
        tx.commit().await?;
        Ok(existed)
    }

    async fn replace_trigger(
        &self,
        key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> SchedulerResult<bool> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let Some((old, _)) = Self::load_trigger_tx(&mut tx, key).await? else {
            return Ok(false);
        };
        if old.job_key != new_trigger.job_key {
            return Err(SchedulerError::InvalidTrigger(
                "替换触发器必须引用同一作业".to_string(),
            ));
        }
        sqlx::query("DELETE FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2")
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await?;
        Self::upsert_trigger_tx(&mut tx, new_trigger, true).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn retrieve_job(&self, key: &JobKey) -> SchedulerResult<Option<JobDetail>> {
        let row = sqlx::query(
            "SELECT job_name, job_group, description, job_type, data_map, durable, persist_data, \
             non_concurrent, requests_recovery FROM tempus_jobs WHERE job_name = $1 AND job_group = $2",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn retrieve_trigger(&self, key: &TriggerKey) -> SchedulerResult<Option<Trigger>> {
        let row = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2"
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::row_to_trigger(&r).map(|(t, _)| t)).transpose()
    }

    async fn get_triggers_for_job(&self, key: &JobKey) -> SchedulerResult<Vec<Trigger>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers WHERE job_name = $1 AND job_group = $2"
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Self::row_to_trigger(r).map(|(t, _)| t))
            .collect()
    }

    async fn get_trigger_state(&self, key: &TriggerKey) -> SchedulerResult<TriggerState> {
        let state: Option<TriggerState> = sqlx::query_scalar(
            "SELECT state FROM tempus_triggers WHERE trigger_name = $1 AND trigger_group = $2",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state.unwrap_or(TriggerState::Deleted))
    }

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &CalendarSpec,
        replace: bool,
        update_triggers: bool,
    ) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        if !replace {
            let exists =
                sqlx::query("SELECT 1 FROM tempus_calendars WHERE calendar_name = $1")
                    .bind(name)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_some() {
                return Err(SchedulerError::object_already_exists(name));
            }
        }
        sqlx::query(
            "INSERT INTO tempus_calendars (calendar_name, spec) VALUES ($1, $2) \
             ON CONFLICT (calendar_name) DO UPDATE SET spec = EXCLUDED.spec",
        )
        .bind(name)
        .bind(serde_json::to_value(calendar)?)
        .execute(&mut *tx)
        .await?;

        if update_triggers {
            let rows = sqlx::query(&format!(
                "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers WHERE calendar_name = $1"
            ))
            .bind(name)
            .fetch_all(&mut *tx)
            .await?;
            for row in rows {
                let (mut trigger, state) = Self::row_to_trigger(&row)?;
                let next = trigger.update_with_new_calendar(calendar)?;
                let new_state = if next.is_none() && state == TriggerState::Waiting {
                    TriggerState::Complete
                } else {
                    state
                };
                Self::update_trigger_progress_tx(&mut tx, &trigger, new_state).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn retrieve_calendar(&self, name: &str) -> SchedulerResult<Option<CalendarSpec>> {
        let row = sqlx::query("SELECT spec FROM tempus_calendars WHERE calendar_name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("spec")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(instance = %self.instance_id))]
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> SchedulerResult<Vec<Trigger>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let now = self.clock.now();
        let misfire_cutoff = now - self.misfire_threshold;
        let max_time = no_later_than + time_window;

        // 候选多取一些，给 misfire 处理与非并发跳过留余量
        let fetch_limit = (max_count as i64) * 2 + 10;
        let rows = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers \
             WHERE state = 'WAITING' AND next_fire_time <= $1 \
             ORDER BY next_fire_time ASC, priority DESC, trigger_name ASC \
             LIMIT $2"
        ))
        .bind(max_time)
        .bind(fetch_limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut acquired: Vec<Trigger> = Vec::new();
        let mut batch_job_keys: Vec<JobKey> = Vec::new();
        for row in rows {
            if acquired.len() >= max_count {
                break;
            }
            let (mut trigger, _) = Self::row_to_trigger(&row)?;

            // 已超过 misfire 阈值的先按策略处理
            let stale = trigger
                .next_fire_time
                .map(|t| t < misfire_cutoff)
                .unwrap_or(false);
            if stale && trigger.resolved_misfire_instruction() != MisfireInstruction::Ignore {
                let next = Self::apply_misfire_tx(&mut tx, &mut trigger, now).await?;
                match next {
                    None => continue,
                    Some(t) if t > max_time => continue,
                    Some(_) => {}
                }
            }

            let Some(job) = Self::load_job_tx(&mut tx, &trigger.job_key).await? else {
                warn!("触发器 {} 引用的作业不存在，置为 ERROR", trigger.key);
                Self::set_trigger_state_tx(&mut tx, &trigger.key, TriggerState::Error).await?;
                continue;
            };
            if job.concurrent_execution_disallowed && batch_job_keys.contains(&job.key) {
                continue;
            }

            let Some(scheduled_at) = trigger.next_fire_time else {
                continue;
            };
            let fired = FiredTrigger::acquired(&trigger, &job, &self.instance_id, now, scheduled_at);
            let updated = sqlx::query(
                "UPDATE tempus_triggers SET state = 'ACQUIRED', fire_instance_id = $3 \
                 WHERE trigger_name = $1 AND trigger_group = $2 AND state = 'WAITING'",
            )
            .bind(&trigger.key.name)
            .bind(&trigger.key.group)
            .bind(&fired.entry_id)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() != 1 {
                // 竞争失败，静默跳过
                continue;
            }
            sqlx::query(&format!(
                "INSERT INTO tempus_fired_triggers ({FIRED_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
            ))
            .bind(&fired.entry_id)
            .bind(&fired.trigger_key.name)
            .bind(&fired.trigger_key.group)
            .bind(&fired.job_key.name)
            .bind(&fired.job_key.group)
            .bind(&fired.instance_id)
            .bind(fired.state)
            .bind(fired.fired_at)
            .bind(fired.scheduled_at)
            .bind(fired.priority)
            .bind(fired.non_concurrent)
            .bind(fired.requests_recovery)
            .execute(&mut *tx)
            .await?;

            if job.concurrent_execution_disallowed {
                batch_job_keys.push(job.key.clone());
            }
            trigger.fire_instance_id = Some(fired.entry_id.clone());
            acquired.push(trigger);
        }
        tx.commit().await?;
        debug!("获取到 {} 个到期触发器", acquired.len());
        Ok(acquired)
    }

    async fn release_acquired_trigger(&self, trigger: &Trigger) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        if let Some(entry_id) = &trigger.fire_instance_id {
            sqlx::query("DELETE FROM tempus_fired_triggers WHERE entry_id = $1")
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'WAITING', fire_instance_id = NULL \
             WHERE trigger_name = $1 AND trigger_group = $2 AND state = 'ACQUIRED'",
        )
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, triggers), fields(count = triggers.len()))]
    async fn triggers_fired(
        &self,
        triggers: &[Trigger],
    ) -> SchedulerResult<Vec<TriggerFiredResult>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let now = self.clock.now();
        let mut results = Vec::with_capacity(triggers.len());

        for t in triggers {
            let loaded = Self::load_trigger_tx(&mut tx, &t.key).await?;
            let valid = matches!(
                &loaded,
                Some((trigger, TriggerState::Acquired))
                    if trigger.fire_instance_id == t.fire_instance_id
            );
            if !valid {
                // 本次获取对应的在途记录已无意义，一并清理
                if let Some(entry_id) = &t.fire_instance_id {
                    sqlx::query("DELETE FROM tempus_fired_triggers WHERE entry_id = $1")
                        .bind(entry_id)
                        .execute(&mut *tx)
                        .await?;
                }
                results.push(TriggerFiredResult::Rejected(t.key.clone()));
                continue;
            }
            let Some((mut trigger, _)) = loaded else {
                unreachable!("上面已确认触发器存在");
            };

            let calendar = match &trigger.calendar_name {
                Some(name) => match Self::load_calendar_tx(&mut tx, name).await? {
                    Some(cal) => Some(cal),
                    None => {
                        warn!("触发器 {} 引用的日历 {} 不存在，放弃点火", t.key, name);
                        if let Some(entry_id) = &trigger.fire_instance_id {
                            sqlx::query("DELETE FROM tempus_fired_triggers WHERE entry_id = $1")
                                .bind(entry_id)
                                .execute(&mut *tx)
                                .await?;
                        }
                        trigger.fire_instance_id = None;
                        Self::update_trigger_progress_tx(&mut tx, &trigger, TriggerState::Waiting)
                            .await?;
                        results.push(TriggerFiredResult::Rejected(t.key.clone()));
                        continue;
                    }
                },
                None => None,
            };
            let Some(job) = Self::load_job_tx(&mut tx, &trigger.job_key).await? else {
                Self::set_trigger_state_tx(&mut tx, &trigger.key, TriggerState::Error).await?;
                results.push(TriggerFiredResult::Rejected(t.key.clone()));
                continue;
            };

            let Some(scheduled_at) = trigger.next_fire_time else {
                results.push(TriggerFiredResult::Rejected(t.key.clone()));
                continue;
            };
            let prev_before = trigger.previous_fire_time;
            trigger.triggered(calendar.as_ref())?;
            let next = trigger.next_fire_time;

            let new_state = if next.is_none() {
                TriggerState::Complete
            } else if job.concurrent_execution_disallowed {
                TriggerState::Blocked
            } else {
                TriggerState::Waiting
            };
            Self::update_trigger_progress_tx(&mut tx, &trigger, new_state).await?;

            if job.concurrent_execution_disallowed {
                sqlx::query(
                    "UPDATE tempus_triggers SET state = 'BLOCKED' \
                     WHERE job_name = $1 AND job_group = $2 AND state IN ('WAITING', 'ACQUIRED') \
                       AND NOT (trigger_name = $3 AND trigger_group = $4)",
                )
                .bind(&job.key.name)
                .bind(&job.key.group)
                .bind(&trigger.key.name)
                .bind(&trigger.key.group)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "UPDATE tempus_triggers SET state = 'PAUSED_BLOCKED' \
                     WHERE job_name = $1 AND job_group = $2 AND state = 'PAUSED'",
                )
                .bind(&job.key.name)
                .bind(&job.key.group)
                .execute(&mut *tx)
                .await?;
            }

            let entry_id = trigger
                .fire_instance_id
                .clone()
                .expect("ACQUIRED 触发器必有触发标识");
            sqlx::query(
                "UPDATE tempus_fired_triggers SET state = 'EXECUTING', fired_at = $2 WHERE entry_id = $1",
            )
            .bind(&entry_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let recovering = trigger.key.group == RECOVERING_JOBS_GROUP;
            results.push(TriggerFiredResult::Fired(Box::new(TriggerFiredBundle {
                next_fire_time: next,
                previous_fire_time: prev_before,
                trigger,
                job,
                calendar,
                fire_instance_id: entry_id,
                fired_at: now,
                scheduled_fire_time: scheduled_at,
                recovering,
            })));
        }
        tx.commit().await?;
        Ok(results)
    }

    #[instrument(skip(self, trigger, job), fields(trigger = %trigger.key, instruction = ?instruction))]
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;

        if job.persist_data_after_execution {
            sqlx::query(
                "UPDATE tempus_jobs SET data_map = $3 WHERE job_name = $1 AND job_group = $2",
            )
            .bind(&job.key.name)
            .bind(&job.key.group)
            .bind(serde_json::to_value(&job.data_map)?)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(entry_id) = &trigger.fire_instance_id {
            sqlx::query("DELETE FROM tempus_fired_triggers WHERE entry_id = $1")
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }

        if job.concurrent_execution_disallowed {
            let running: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM tempus_fired_triggers WHERE job_name = $1 AND job_group = $2",
            )
            .bind(&job.key.name)
            .bind(&job.key.group)
            .fetch_one(&mut *tx)
            .await?;
            if running == 0 {
                Self::unblock_job_triggers_tx(&mut tx, &job.key).await?;
            }
        }

        match instruction {
            CompletedExecutionInstruction::NoInstruction
            | CompletedExecutionInstruction::ReExecuteJob => {}
            CompletedExecutionInstruction::SetTriggerComplete => {
                Self::set_trigger_state_tx(&mut tx, &trigger.key, TriggerState::Complete).await?;
            }
            CompletedExecutionInstruction::DeleteTrigger => {
                Self::remove_trigger_tx(&mut tx, &trigger.key).await?;
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                sqlx::query(
                    "UPDATE tempus_triggers SET state = 'COMPLETE' WHERE job_name = $1 AND job_group = $2",
                )
                .bind(&job.key.name)
                .bind(&job.key.group)
                .execute(&mut *tx)
                .await?;
            }
            CompletedExecutionInstruction::SetTriggerError => {
                Self::set_trigger_state_tx(&mut tx, &trigger.key, TriggerState::Error).await?;
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                sqlx::query(
                    "UPDATE tempus_triggers SET state = 'ERROR' WHERE job_name = $1 AND job_group = $2",
                )
                .bind(&job.key.name)
                .bind(&job.key.group)
                .execute(&mut *tx)
                .await?;
            }
        }

        // 不再有后续触发的触发器随完成一起移除
        if let Some((stored, state)) = Self::load_trigger_tx(&mut tx, &trigger.key).await? {
            if state == TriggerState::Complete && stored.next_fire_time.is_none() {
                Self::remove_trigger_tx(&mut tx, &trigger.key).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_misfired_triggers(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<TriggerKey>> {
        let rows = sqlx::query(
            "SELECT trigger_name, trigger_group FROM tempus_triggers \
             WHERE state = 'WAITING' AND next_fire_time < $1 AND misfire_instruction <> 'IGNORE_MISFIRE' \
             ORDER BY next_fire_time ASC, priority DESC, trigger_name ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(TriggerKey::new(
                    r.try_get::<String, _>("trigger_name")?,
                    r.try_get::<String, _>("trigger_group")?,
                ))
            })
            .collect()
    }

    async fn recover_misfires(
        &self,
        threshold: Duration,
        max_count: usize,
    ) -> SchedulerResult<MisfireSweepResult> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let now = self.clock.now();
        let cutoff = now - threshold;

        let rows = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM tempus_triggers \
             WHERE state = 'WAITING' AND next_fire_time < $1 AND misfire_instruction <> 'IGNORE_MISFIRE' \
             ORDER BY next_fire_time ASC, priority DESC, trigger_name ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(max_count as i64 + 1)
        .fetch_all(&mut *tx)
        .await?;

        let has_more = rows.len() > max_count;
        let mut result = MisfireSweepResult {
            has_more,
            ..Default::default()
        };
        for row in rows.into_iter().take(max_count) {
            let (mut trigger, _) = Self::row_to_trigger(&row)?;
            // SMART_POLICY 在 SQL 里筛不掉解析为 IGNORE 的显式指令，这里复查
            if trigger.resolved_misfire_instruction() == MisfireInstruction::Ignore {
                continue;
            }
            let key = trigger.key.clone();
            let next = Self::apply_misfire_tx(&mut tx, &mut trigger, now).await?;
            result.processed += 1;
            match next {
                None => result.completed.push(key),
                Some(t) => {
                    result.misfired.push(key);
                    result.earliest_new_fire_time = Some(
                        result
                            .earliest_new_fire_time
                            .map_or(t, |earliest| earliest.min(t)),
                    );
                }
            }
        }
        tx.commit().await?;
        Ok(result)
    }

    async fn check_in(&self) -> SchedulerResult<SchedulerStateRecord> {
        let mut tx = self.begin_locked(LOCK_STATE_ACCESS).await?;
        let record = SchedulerStateRecord {
            instance_id: self.instance_id.clone(),
            last_check_in: self.clock.now(),
            check_in_interval_ms: self.check_in_interval.num_milliseconds(),
        };
        sqlx::query(
            "INSERT INTO tempus_scheduler_state (instance_id, last_check_in, check_in_interval_ms) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (instance_id) DO UPDATE SET \
                 last_check_in = EXCLUDED.last_check_in, \
                 check_in_interval_ms = EXCLUDED.check_in_interval_ms",
        )
        .bind(&record.instance_id)
        .bind(record.last_check_in)
        .bind(record.check_in_interval_ms)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn find_failed_instances(&self) -> SchedulerResult<Vec<SchedulerStateRecord>> {
        let rows = sqlx::query(
            "SELECT instance_id, last_check_in, check_in_interval_ms \
             FROM tempus_scheduler_state WHERE instance_id <> $1",
        )
        .bind(&self.instance_id)
        .fetch_all(&self.pool)
        .await?;
        let now = self.clock.now();
        let tolerance = self.check_in_interval.num_milliseconds();
        let mut failed = Vec::new();
        for row in rows {
            let record = SchedulerStateRecord {
                instance_id: row.try_get("instance_id")?,
                last_check_in: row.try_get("last_check_in")?,
                check_in_interval_ms: row.try_get("check_in_interval_ms")?,
            };
            if record.is_failed(now, tolerance) {
                failed.push(record);
            }
        }
        Ok(failed)
    }

    #[instrument(skip(self), fields(failed_instance = %instance_id))]
    async fn recover_jobs(&self, instance_id: &str) -> SchedulerResult<InstanceRecoveryReport> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let rows = sqlx::query(&format!(
            "SELECT {FIRED_COLUMNS} FROM tempus_fired_triggers WHERE instance_id = $1"
        ))
        .bind(instance_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut report = InstanceRecoveryReport {
            instance_id: instance_id.to_string(),
            fired_rows_deleted: 0,
            recovery_triggers: Vec::new(),
            restored_triggers: Vec::new(),
        };
        let mut jobs_to_unblock: Vec<JobKey> = Vec::new();

        for row in rows {
            let fired = Self::row_to_fired(&row)?;

            if fired.requests_recovery {
                if let Some(job) = Self::load_job_tx(&mut tx, &fired.job_key).await? {
                    let seq = self.recovery_seq.fetch_add(1, Ordering::SeqCst);
                    let key = TriggerKey::new(
                        format!("recover_{instance_id}_{seq}"),
                        RECOVERING_JOBS_GROUP,
                    );
                    let mut data = job.data_map.clone();
                    data.insert(KEY_RECOVERING_TRIGGER_NAME, fired.trigger_key.name.clone());
                    data.insert(KEY_RECOVERING_TRIGGER_GROUP, fired.trigger_key.group.clone());
                    data.insert(
                        KEY_RECOVERING_ORIG_FIRE_TIME,
                        fired.fired_at.timestamp_millis().to_string(),
                    );
                    data.insert(
                        KEY_RECOVERING_ORIG_SCHEDULED_FIRE_TIME,
                        fired.scheduled_at.timestamp_millis().to_string(),
                    );
                    let mut recovery = Trigger::new(
                        key.clone(),
                        job.key.clone(),
                        fired.scheduled_at,
                        ScheduleSpec::Simple(SimpleSchedule::one_shot()),
                    )
                    .with_priority(fired.priority)
                    .with_misfire_instruction(MisfireInstruction::Ignore)
                    .with_data_map(data);
                    recovery.compute_first_fire_time(None)?;
                    Self::upsert_trigger_tx(&mut tx, &recovery, false).await?;
                    report.recovery_triggers.push(key);
                } else {
                    warn!(
                        "实例 {} 的在途触发 {} 引用的作业 {} 已不存在，无法恢复",
                        instance_id, fired.entry_id, fired.job_key
                    );
                }
            }

            if let Some((mut stored, state)) = Self::load_trigger_tx(&mut tx, &fired.trigger_key).await? {
                match fired.state {
                    FiredTriggerState::Acquired => {
                        if state == TriggerState::Acquired {
                            stored.fire_instance_id = None;
                            Self::update_trigger_progress_tx(&mut tx, &stored, TriggerState::Waiting)
                                .await?;
                        }
                    }
                    FiredTriggerState::Executing => {
                        if fired.non_concurrent {
                            jobs_to_unblock.push(fired.job_key.clone());
                        }
                        if state == TriggerState::Blocked {
                            let to = if stored.next_fire_time.is_some() {
                                TriggerState::Waiting
                            } else {
                                TriggerState::Complete
                            };
                            stored.fire_instance_id = None;
                            Self::update_trigger_progress_tx(&mut tx, &stored, to).await?;
                        }
                    }
                }
                report.restored_triggers.push(fired.trigger_key.clone());
            }

            sqlx::query("DELETE FROM tempus_fired_triggers WHERE entry_id = $1")
                .bind(&fired.entry_id)
                .execute(&mut *tx)
                .await?;
            report.fired_rows_deleted += 1;
        }

        for job_key in jobs_to_unblock {
            let running: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM tempus_fired_triggers WHERE job_name = $1 AND job_group = $2",
            )
            .bind(&job_key.name)
            .bind(&job_key.group)
            .fetch_one(&mut *tx)
            .await?;
            if running == 0 {
                Self::unblock_job_triggers_tx(&mut tx, &job_key).await?;
            }
        }

        sqlx::query("DELETE FROM tempus_scheduler_state WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(report)
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'PAUSED_BLOCKED' \
             WHERE trigger_name = $1 AND trigger_group = $2 AND state = 'BLOCKED'",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'PAUSED' \
             WHERE trigger_name = $1 AND trigger_group = $2 AND state IN ('WAITING', 'ACQUIRED')",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn resume_trigger(&self, key: &TriggerKey) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let now = self.clock.now();
        self.resume_trigger_tx(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::remember_matcher_tx(&mut tx, "TRIGGER", matcher).await?;
        let mut groups: Vec<String> = Self::distinct_groups_tx(&mut tx, false)
            .await?
            .into_iter()
            .filter(|g| matcher.matches(g))
            .collect();
        if let GroupMatcher::Equals(g) = matcher {
            if !groups.contains(g) {
                groups.push(g.clone());
            }
        }
        if !groups.is_empty() {
            Self::pause_groups_tx(&mut tx, &groups, false).await?;
        }
        tx.commit().await?;
        Ok(groups)
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::forget_matchers_tx(&mut tx, "TRIGGER", matcher).await?;
        let now = self.clock.now();
        let rows = sqlx::query(
            "SELECT trigger_name, trigger_group FROM tempus_triggers \
             WHERE state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut groups: Vec<String> = Vec::new();
        for row in rows {
            let key = TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            );
            if matcher.matches(&key.group) {
                if !groups.contains(&key.group) {
                    groups.push(key.group.clone());
                }
                self.resume_trigger_tx(&mut tx, &key, now).await?;
            }
        }
        tx.commit().await?;
        Ok(groups)
    }

    async fn pause_job(&self, key: &JobKey) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'PAUSED_BLOCKED' \
             WHERE job_name = $1 AND job_group = $2 AND state = 'BLOCKED'",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE tempus_triggers SET state = 'PAUSED' \
             WHERE job_name = $1 AND job_group = $2 AND state IN ('WAITING', 'ACQUIRED')",
        )
        .bind(&key.name)
        .bind(&key.group)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn resume_job(&self, key: &JobKey) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        let now = self.clock.now();
        let rows = sqlx::query(
            "SELECT trigger_name, trigger_group FROM tempus_triggers \
             WHERE job_name = $1 AND job_group = $2 AND state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .bind(&key.name)
        .bind(&key.group)
        .fetch_all(&mut *tx)
        .await?;
        for row in rows {
            let tk = TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            );
            self.resume_trigger_tx(&mut tx, &tk, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pause_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::remember_matcher_tx(&mut tx, "JOB", matcher).await?;
        let mut groups: Vec<String> = Self::distinct_groups_tx(&mut tx, true)
            .await?
            .into_iter()
            .filter(|g| matcher.matches(g))
            .collect();
        if let GroupMatcher::Equals(g) = matcher {
            if !groups.contains(g) {
                groups.push(g.clone());
            }
        }
        if !groups.is_empty() {
            Self::pause_groups_tx(&mut tx, &groups, true).await?;
        }
        tx.commit().await?;
        Ok(groups)
    }

    async fn resume_jobs(&self, matcher: &GroupMatcher) -> SchedulerResult<Vec<String>> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        Self::forget_matchers_tx(&mut tx, "JOB", matcher).await?;
        let now = self.clock.now();
        let rows = sqlx::query(
            "SELECT trigger_name, trigger_group, job_group FROM tempus_triggers \
             WHERE state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut groups: Vec<String> = Vec::new();
        for row in rows {
            let job_group: String = row.try_get("job_group")?;
            if !matcher.matches(&job_group) {
                continue;
            }
            if !groups.contains(&job_group) {
                groups.push(job_group.clone());
            }
            let tk = TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            );
            self.resume_trigger_tx(&mut tx, &tk, now).await?;
        }
        tx.commit().await?;
        Ok(groups)
    }

    async fn pause_all(&self) -> SchedulerResult<()> {
        self.pause_triggers(&GroupMatcher::Any).await?;
        Ok(())
    }

    async fn resume_all(&self) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        sqlx::query("DELETE FROM tempus_paused_groups")
            .execute(&mut *tx)
            .await?;
        let now = self.clock.now();
        let rows = sqlx::query(
            "SELECT trigger_name, trigger_group FROM tempus_triggers \
             WHERE state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .fetch_all(&mut *tx)
        .await?;
        for row in rows {
            let tk = TriggerKey::new(
                row.try_get::<String, _>("trigger_name")?,
                row.try_get::<String, _>("trigger_group")?,
            );
            self.resume_trigger_tx(&mut tx, &tk, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_paused_trigger_groups(&self) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT description FROM tempus_paused_groups WHERE scope = 'TRIGGER'",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("description").map_err(Into::into))
            .collect()
    }

    async fn clear_all_scheduling_data(&self) -> SchedulerResult<()> {
        let mut tx = self.begin_locked(LOCK_TRIGGER_ACCESS).await?;
        for table in [
            "tempus_fired_triggers",
            "tempus_triggers",
            "tempus_jobs",
            "tempus_calendars",
            "tempus_paused_groups",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
