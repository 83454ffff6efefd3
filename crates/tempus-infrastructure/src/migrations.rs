//! 内嵌的数据库结构迁移
//!
//! 嵌入本库的产品可在启动时调用 [`run_postgres`] 建表，重复调用安全。
//! 表结构使用固定的 `tempus_` 前缀；列名与方言细节不构成对外契约。

use sqlx::PgPool;

use tempus_errors::SchedulerResult;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tempus_jobs (
        job_name          VARCHAR(200) NOT NULL,
        job_group         VARCHAR(200) NOT NULL,
        description       TEXT,
        job_type          VARCHAR(250) NOT NULL,
        data_map          JSONB        NOT NULL DEFAULT '{}'::jsonb,
        durable           BOOLEAN      NOT NULL DEFAULT FALSE,
        persist_data      BOOLEAN      NOT NULL DEFAULT FALSE,
        non_concurrent    BOOLEAN      NOT NULL DEFAULT FALSE,
        requests_recovery BOOLEAN      NOT NULL DEFAULT FALSE,
        PRIMARY KEY (job_name, job_group)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_triggers (
        trigger_name        VARCHAR(200) NOT NULL,
        trigger_group       VARCHAR(200) NOT NULL,
        job_name            VARCHAR(200) NOT NULL,
        job_group           VARCHAR(200) NOT NULL,
        description         TEXT,
        calendar_name       VARCHAR(200),
        priority            INTEGER      NOT NULL DEFAULT 5,
        state               VARCHAR(20)  NOT NULL,
        start_time          TIMESTAMPTZ  NOT NULL,
        end_time            TIMESTAMPTZ,
        prev_fire_time      TIMESTAMPTZ,
        next_fire_time      TIMESTAMPTZ,
        misfire_instruction VARCHAR(60)  NOT NULL,
        schedule            JSONB        NOT NULL,
        data_map            JSONB        NOT NULL DEFAULT '{}'::jsonb,
        fire_instance_id    VARCHAR(40),
        PRIMARY KEY (trigger_name, trigger_group)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tempus_triggers_acquire
        ON tempus_triggers (state, next_fire_time)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tempus_triggers_job
        ON tempus_triggers (job_name, job_group)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_fired_triggers (
        entry_id          VARCHAR(40)  PRIMARY KEY,
        trigger_name      VARCHAR(200) NOT NULL,
        trigger_group     VARCHAR(200) NOT NULL,
        job_name          VARCHAR(200) NOT NULL,
        job_group         VARCHAR(200) NOT NULL,
        instance_id       VARCHAR(200) NOT NULL,
        state             VARCHAR(20)  NOT NULL,
        fired_at          TIMESTAMPTZ  NOT NULL,
        scheduled_at      TIMESTAMPTZ  NOT NULL,
        priority          INTEGER      NOT NULL,
        non_concurrent    BOOLEAN      NOT NULL,
        requests_recovery BOOLEAN      NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tempus_fired_instance
        ON tempus_fired_triggers (instance_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tempus_fired_job
        ON tempus_fired_triggers (job_name, job_group)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_calendars (
        calendar_name VARCHAR(200) PRIMARY KEY,
        spec          JSONB        NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_paused_groups (
        scope       VARCHAR(10)  NOT NULL,
        description VARCHAR(220) NOT NULL,
        matcher     JSONB        NOT NULL,
        PRIMARY KEY (scope, description)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_scheduler_state (
        instance_id          VARCHAR(200) PRIMARY KEY,
        last_check_in        TIMESTAMPTZ  NOT NULL,
        check_in_interval_ms BIGINT       NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tempus_locks (
        lock_name VARCHAR(40) PRIMARY KEY
    )
    "#,
    r#"
    INSERT INTO tempus_locks (lock_name)
    VALUES ('TRIGGER_ACCESS'), ('STATE_ACCESS')
    ON CONFLICT (lock_name) DO NOTHING
    "#,
];

/// 建立全部表结构与命名锁行，可重复执行
pub async fn run_postgres(pool: &PgPool) -> SchedulerResult<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
