//! Reference Redis-backed reliable queue (§4.1). Tasks are serialized as
//! JSON in a hash; a sorted set keyed by `scheduled_at` (millis since epoch)
//! provides ordering. Claiming is `ZRANGEBYSCORE … LIMIT 1` followed by a
//! `ZREM` — the `ZREM` return value is the single-claim guarantee: if it
//! returns 0, another worker already took this task.

use crate::backend::{QueueBackend, QueueStats};
use aeth_core::task::{Task, TaskStatus};
use aeth_core::{AethError, TaskId};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const SCHEDULE_KEY: &str = "aeth:tasks:schedule";
const DATA_KEY: &str = "aeth:tasks:data";

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(addr: &str) -> Result<Self, AethError> {
        let client = redis::Client::open(addr)
            .map_err(|e| AethError::unavailable(format!("invalid redis address {addr}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AethError::unavailable(format!("connecting to redis: {e}")))?;
        Ok(Self { conn })
    }

    fn unavailable(e: impl std::fmt::Display) -> AethError {
        AethError::unavailable(format!("redis: {e}"))
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn enqueue(&self, task: Task) -> Result<(), AethError> {
        let mut conn = self.conn.clone();
        let score = task.scheduled_at.timestamp_millis();
        let payload = serde_json::to_string(&task)
            .map_err(|e| AethError::internal(format!("serializing task: {e}")))?;
        let id = task.id.to_string();

        let _: () = conn
            .hset(DATA_KEY, &id, &payload)
            .await
            .map_err(Self::unavailable)?;
        let _: () = conn
            .zadd(SCHEDULE_KEY, &id, score)
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Task>, AethError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        let candidates: Vec<String> = conn
            .zrangebyscore_limit(SCHEDULE_KEY, i64::MIN, now, 0, 1)
            .await
            .map_err(Self::unavailable)?;
        let Some(id) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let removed: i64 = conn
            .zrem(SCHEDULE_KEY, &id)
            .await
            .map_err(Self::unavailable)?;
        if removed == 0 {
            // Another worker claimed it between our read and our ZREM.
            return Ok(None);
        }

        let payload: Option<String> = conn.hget(DATA_KEY, &id).await.map_err(Self::unavailable)?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let mut task: Task =
            serde_json::from_str(&payload).map_err(|e| AethError::internal(format!("{e}")))?;
        task.status = TaskStatus::Active;
        task.started_at = Some(Utc::now());

        let updated = serde_json::to_string(&task)
            .map_err(|e| AethError::internal(format!("serializing task: {e}")))?;
        let _: () = conn
            .hset(DATA_KEY, &id, &updated)
            .await
            .map_err(Self::unavailable)?;

        Ok(Some(task))
    }

    async fn settle(&self, task: Task) -> Result<(), AethError> {
        let mut conn = self.conn.clone();
        let id = task.id.to_string();
        let payload = serde_json::to_string(&task)
            .map_err(|e| AethError::internal(format!("serializing task: {e}")))?;
        let _: () = conn
            .hset(DATA_KEY, &id, &payload)
            .await
            .map_err(Self::unavailable)?;

        if matches!(task.status, TaskStatus::Retrying | TaskStatus::Pending) {
            let score = task.scheduled_at.timestamp_millis();
            let _: () = conn
                .zadd(SCHEDULE_KEY, &id, score)
                .await
                .map_err(Self::unavailable)?;
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, AethError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .hget(DATA_KEY, id.to_string())
            .await
            .map_err(Self::unavailable)?;
        let payload = payload.ok_or_else(|| AethError::not_found(format!("task {id} not found")))?;
        serde_json::from_str(&payload).map_err(|e| AethError::internal(format!("{e}")))
    }

    async fn stats(&self) -> Result<QueueStats, AethError> {
        let mut conn = self.conn.clone();
        let all: Vec<String> = conn.hvals(DATA_KEY).await.map_err(Self::unavailable)?;
        let mut stats = QueueStats::default();
        for raw in all {
            let Ok(task) = serde_json::from_str::<Task>(&raw) else {
                continue;
            };
            match task.status {
                TaskStatus::Pending | TaskStatus::Scheduled => stats.pending += 1,
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Retrying => stats.retrying += 1,
            }
        }
        Ok(stats)
    }
}
