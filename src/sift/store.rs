use crate::sift::cache::CacheEntry;
use crate::sift::event::{NewEvent, RawEvent, Session, parse_timestamp};
use crate::sift::projects::{Activity, Project};
use crate::sift::util::content_hash;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const SIFT_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Events, sessions and the processing-run ledger.
pub trait EventStore {
    fn ungrouped_events(&self) -> Result<Vec<RawEvent>, StoreError>;
    /// Insert a session row and assign every member event to it as one unit.
    fn create_session(
        &self,
        event_ids: &[i64],
        start_time: &str,
        end_time: &str,
    ) -> Result<i64, StoreError>;
    fn unprocessed_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError>;
    fn unprocessed_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError>;
    fn session_events(&self, session_id: i64) -> Result<Vec<RawEvent>, StoreError>;
    /// Mark a session and all of its events processed in one transaction.
    fn mark_session_processed(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
    fn mark_events_processed(&self, event_ids: &[i64]) -> Result<usize, StoreError>;
    fn last_completed_run_end(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    fn begin_run(
        &self,
        total_events: usize,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;
    fn complete_run(
        &self,
        run_id: i64,
        processed_count: usize,
        tokens_used: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    fn fail_run(&self, run_id: i64, error: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Rows behind the summary cache.
pub trait SummaryStore {
    fn fresh_summary(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError>;
    fn upsert_summary(&self, entry: &CacheEntry) -> Result<(), StoreError>;
    fn delete_summaries_at_or_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Existing projects and the findings recorded against them.
pub trait ProjectRegistry {
    fn projects(&self) -> Result<Vec<Project>, StoreError>;
    fn technologies(&self) -> Result<Vec<String>, StoreError>;
    /// Returns false when a project with that name already exists.
    fn create_project(&self, project: &Project, at: DateTime<Utc>) -> Result<bool, StoreError>;
    fn touch_project(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    fn record_activity(
        &self,
        project_name: &str,
        activity: &Activity,
        session_id: Option<i64>,
    ) -> Result<(), StoreError>;
    fn activities_for(&self, project_name: &str) -> Result<Vec<Activity>, StoreError>;
    fn record_technology(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    fn record_tweet_draft(
        &self,
        project_name: Option<&str>,
        description: &str,
        tweet_text: &str,
        session_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at_epoch: i64,
    pub ended_at_epoch: Option<i64>,
    pub total_events: i64,
    pub processed_count: i64,
    pub tokens_used: i64,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisCall<'a> {
    pub task: &'a str,
    pub model: &'a str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_secs: f64,
    pub error: Option<&'a str>,
}

/// SQLite-backed implementation of every storage seam. The connection sits
/// behind a mutex so one store can be shared across enrichment threads.
pub struct SiftStore {
    conn: Mutex<Connection>,
}

const EVENT_COLUMNS: &str =
    "id, source, event_type, payload_json, occurred_at, session_id, processed";

impl SiftStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SIFT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SIFT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            conn.execute_batch(include_str!("../../migrations/0001_sift_schema.sql"))?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        if current < 2 {
            let conn = self.conn()?;
            conn.execute_batch(include_str!("../../migrations/0002_session_start_epoch.sql"))?;
            conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
        }

        Ok(())
    }

    /// Insert a collector event. Returns `None` when an identical event
    /// (same source, type, payload and timestamp) was already stored.
    pub fn insert_event(&self, event: &NewEvent, now: DateTime<Utc>) -> Result<Option<i64>, StoreError> {
        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let hash = content_hash(&[
            &event.source,
            &event.event_type,
            &payload_json,
            &event.occurred_at,
        ]);
        let occurred_epoch = parse_timestamp(&event.occurred_at).map(|ts| ts.timestamp());

        let conn = self.conn()?;
        let changes = conn.execute(
            "
            INSERT OR IGNORE INTO events (
                content_hash,
                source,
                event_type,
                payload_json,
                occurred_at,
                occurred_at_epoch,
                ingested_at_epoch
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                hash,
                event.source,
                event.event_type,
                payload_json,
                event.occurred_at,
                occurred_epoch,
                now.timestamp(),
            ],
        )?;
        if changes == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    pub fn unprocessed_event_count(&self) -> Result<i64, StoreError> {
        Ok(self.conn()?.query_row(
            "SELECT COUNT(*) FROM events WHERE processed = 0",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn session_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?)
    }

    pub fn summary_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM summary_cache", [], |row| row.get(0))?)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT id, started_at_epoch, ended_at_epoch, total_events,
                   processed_count, tokens_used, status, error_message
            FROM processing_runs
            ORDER BY id DESC
            LIMIT ?1
            ",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                started_at_epoch: row.get(1)?,
                ended_at_epoch: row.get(2)?,
                total_events: row.get(3)?,
                processed_count: row.get(4)?,
                tokens_used: row.get(5)?,
                status: row.get(6)?,
                error_message: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn log_analysis_call(
        &self,
        call: &AnalysisCall<'_>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            INSERT INTO analysis_calls (
                task, model, input_tokens, output_tokens, duration_secs, error, at_epoch
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                call.task,
                call.model,
                call.input_tokens as i64,
                call.output_tokens as i64,
                call.duration_secs,
                call.error,
                at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Names with recorded activity that are not registered projects.
    pub fn candidate_project_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT DISTINCT project_name
            FROM activities
            WHERE project_name NOT IN (SELECT name FROM projects)
            ORDER BY project_name ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn analysis_call_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM analysis_calls", [], |row| row.get(0))?)
    }

    pub fn tweet_draft_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM tweet_drafts", [], |row| row.get(0))?)
    }

    fn query_events(
        &self,
        sql: &str,
        args: &[rusqlite::types::Value],
    ) -> Result<Vec<RawEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), event_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Result<RawEvent, StoreError>> {
    let payload_json: String = row.get(3)?;
    let payload = match serde_json::from_str(&payload_json) {
        Ok(value) => value,
        Err(err) => return Ok(Err(StoreError::Serialization(err.to_string()))),
    };
    Ok(Ok(RawEvent {
        id: row.get(0)?,
        source: row.get(1)?,
        event_type: row.get(2)?,
        payload,
        occurred_at: row.get(4)?,
        session_id: row.get(5)?,
        processed: row.get::<_, i64>(6)? != 0,
    }))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        event_count: row.get::<_, i64>(3)?.max(0) as usize,
        processed: row.get::<_, i64>(4)? != 0,
    })
}

fn to_json(values: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(values).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn from_json(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(epoch, 0)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

impl EventStore for SiftStore {
    fn ungrouped_events(&self) -> Result<Vec<RawEvent>, StoreError> {
        self.query_events(
            &format!(
                "
                SELECT {EVENT_COLUMNS}
                FROM events
                WHERE processed = 0 AND session_id IS NULL
                ORDER BY COALESCE(occurred_at_epoch, ingested_at_epoch) ASC, id ASC
                "
            ),
            &[],
        )
    }

    fn create_session(
        &self,
        event_ids: &[i64],
        start_time: &str,
        end_time: &str,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "
            INSERT INTO sessions (
                start_time, end_time, start_epoch, event_count, processed, created_at_epoch
            )
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            ",
            params![
                start_time,
                end_time,
                parse_timestamp(start_time).map(|ts| ts.timestamp()),
                event_ids.len() as i64,
                Utc::now().timestamp()
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(event_ids.len() + 1);
        args.push(session_id.into());
        args.extend(event_ids.iter().map(|id| rusqlite::types::Value::from(*id)));
        tx.execute(
            &format!(
                "UPDATE events SET session_id = ? WHERE session_id IS NULL AND id IN ({})",
                placeholders(event_ids.len())
            ),
            params_from_iter(args.iter()),
        )?;
        tx.commit()?;
        Ok(session_id)
    }

    fn unprocessed_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError> {
        self.query_events(
            &format!(
                "
                SELECT {EVENT_COLUMNS}
                FROM events
                WHERE processed = 0
                ORDER BY COALESCE(occurred_at_epoch, ingested_at_epoch) ASC, id ASC
                LIMIT ?
                "
            ),
            &[(limit as i64).into()],
        )
    }

    fn unprocessed_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT id, start_time, end_time, event_count, processed
            FROM sessions
            WHERE processed = 0
            ORDER BY COALESCE(start_epoch, created_at_epoch) ASC, id ASC
            LIMIT ?1
            ",
        )?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn session_events(&self, session_id: i64) -> Result<Vec<RawEvent>, StoreError> {
        self.query_events(
            &format!(
                "
                SELECT {EVENT_COLUMNS}
                FROM events
                WHERE session_id = ?
                ORDER BY COALESCE(occurred_at_epoch, ingested_at_epoch) ASC, id ASC
                "
            ),
            &[session_id.into()],
        )
    }

    fn mark_session_processed(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE sessions SET processed = 1, processed_at = ?1 WHERE id = ?2 AND processed = 0",
            params![at.to_rfc3339(), session_id],
        )?;
        let events = tx.execute(
            "UPDATE events SET processed = 1 WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(if updated == 0 { 0 } else { events })
    }

    fn mark_events_processed(&self, event_ids: &[i64]) -> Result<usize, StoreError> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        Ok(conn.execute(
            &format!(
                "UPDATE events SET processed = 1 WHERE id IN ({})",
                placeholders(event_ids.len())
            ),
            params_from_iter(event_ids.iter()),
        )?)
    }

    fn last_completed_run_end(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let epoch: Option<i64> = self
            .conn()?
            .query_row(
                "
                SELECT ended_at_epoch
                FROM processing_runs
                WHERE status = 'completed' AND ended_at_epoch IS NOT NULL
                ORDER BY ended_at_epoch DESC
                LIMIT 1
                ",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(epoch.and_then(from_epoch))
    }

    fn begin_run(
        &self,
        total_events: usize,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "
            INSERT INTO processing_runs (started_at_epoch, total_events, model_used)
            VALUES (?1, ?2, ?3)
            ",
            params![at.timestamp(), total_events as i64, model],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(
        &self,
        run_id: i64,
        processed_count: usize,
        tokens_used: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            UPDATE processing_runs
            SET ended_at_epoch = ?1,
                processed_count = ?2,
                tokens_used = ?3,
                status = 'completed'
            WHERE id = ?4
            ",
            params![
                at.timestamp(),
                processed_count as i64,
                tokens_used as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    fn fail_run(&self, run_id: i64, error: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            UPDATE processing_runs
            SET ended_at_epoch = ?1,
                status = 'failed',
                error_message = ?2
            WHERE id = ?3
            ",
            params![at.timestamp(), error, run_id],
        )?;
        Ok(())
    }
}

impl SummaryStore for SiftStore {
    fn fresh_summary(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                "
                SELECT cache_key, title, value, cached_at_epoch
                FROM summary_cache
                WHERE cache_key = ?1 AND cached_at_epoch > ?2
                ",
                params![key, cutoff.timestamp()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(key, title, value, cached_at)| {
            Some(CacheEntry {
                key,
                title,
                value,
                cached_at: from_epoch(cached_at)?,
            })
        }))
    }

    fn upsert_summary(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            INSERT INTO summary_cache (cache_key, title, value, cached_at_epoch)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(cache_key) DO UPDATE SET
                title=excluded.title,
                value=excluded.value,
                cached_at_epoch=excluded.cached_at_epoch
            ",
            params![
                entry.key,
                entry.title,
                entry.value,
                entry.cached_at.timestamp()
            ],
        )?;
        Ok(())
    }

    fn delete_summaries_at_or_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.conn()?.execute(
            "DELETE FROM summary_cache WHERE cached_at_epoch <= ?1",
            params![cutoff.timestamp()],
        )?)
    }
}

impl ProjectRegistry for SiftStore {
    fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT name, description, keywords_json, tags_json, repos_json, path, active
            FROM projects
            ORDER BY name ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, description, keywords, tags, repos, path, active) = row?;
            out.push(Project {
                name,
                description,
                keywords: from_json(&keywords)?,
                tags: from_json(&tags)?,
                repos: from_json(&repos)?,
                path,
                active: active != 0,
            });
        }
        Ok(out)
    }

    fn technologies(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM technologies ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn create_project(&self, project: &Project, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let changes = self.conn()?.execute(
            "
            INSERT OR IGNORE INTO projects (
                name, description, keywords_json, tags_json, repos_json, path, active,
                created_at_epoch, last_activity_epoch
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ",
            params![
                project.name,
                project.description,
                to_json(&project.keywords)?,
                to_json(&project.tags)?,
                to_json(&project.repos)?,
                project.path,
                i64::from(project.active),
                at.timestamp(),
            ],
        )?;
        Ok(changes > 0)
    }

    fn touch_project(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE projects SET last_activity_epoch = ?1 WHERE name = ?2",
            params![at.timestamp(), name],
        )?;
        Ok(())
    }

    fn record_activity(
        &self,
        project_name: &str,
        activity: &Activity,
        session_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            INSERT INTO activities (
                project_name, description, activity_type, occurred_at,
                technologies_json, session_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                project_name,
                activity.description,
                activity.kind,
                activity.occurred_at,
                to_json(&activity.technologies)?,
                session_id,
            ],
        )?;
        Ok(())
    }

    fn activities_for(&self, project_name: &str) -> Result<Vec<Activity>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT description, activity_type, occurred_at, technologies_json
            FROM activities
            WHERE project_name = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map(params![project_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (description, kind, occurred_at, technologies) = row?;
            out.push(Activity {
                description,
                kind,
                occurred_at,
                technologies: from_json(&technologies)?,
            });
        }
        Ok(out)
    }

    fn record_technology(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO technologies (name, first_seen_epoch) VALUES (?1, ?2)",
            params![name, at.timestamp()],
        )?;
        Ok(())
    }

    fn record_tweet_draft(
        &self,
        project_name: Option<&str>,
        description: &str,
        tweet_text: &str,
        session_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            INSERT INTO tweet_drafts (
                project_name, description, tweet_text, session_id, created_at_epoch
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![project_name, description, tweet_text, session_id, at.timestamp()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).single().expect("valid ts")
    }

    fn new_event(at: &str, marker: &str) -> NewEvent {
        NewEvent {
            source: "github".into(),
            event_type: "commit".into(),
            payload: json!({"message": marker}),
            occurred_at: at.into(),
        }
    }

    #[test]
    fn migration_creates_tables() {
        let store = SiftStore::open_in_memory().expect("open store");
        assert_eq!(store.schema_version().expect("version"), SIFT_SCHEMA_VERSION);
        assert_eq!(store.session_count().expect("count"), 0);
    }

    #[test]
    fn pending_sessions_follow_instants_not_text() {
        let store = SiftStore::open_in_memory().expect("open store");
        // 10:00+05:00 is 05:00Z, earlier than 07:00Z despite sorting later as text.
        let utc_id = store
            .insert_event(&new_event("2024-01-15T07:00:00Z", "utc"), ts())
            .expect("insert")
            .expect("new");
        let offset_id = store
            .insert_event(&new_event("2024-01-15T10:00:00+05:00", "offset"), ts())
            .expect("insert")
            .expect("new");
        let later = store
            .create_session(&[utc_id], "2024-01-15T07:00:00Z", "2024-01-15T07:00:00Z")
            .expect("session");
        let earlier = store
            .create_session(&[offset_id], "2024-01-15T10:00:00+05:00", "2024-01-15T10:00:00+05:00")
            .expect("session");
        let ids: Vec<i64> = store
            .unprocessed_sessions(10)
            .expect("sessions")
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![earlier, later]);
    }

    #[test]
    fn insert_event_dedupes_identical_payloads() {
        let store = SiftStore::open_in_memory().expect("open store");
        let first = store
            .insert_event(&new_event("2024-01-15T10:00:00Z", "a"), ts())
            .expect("insert");
        let again = store
            .insert_event(&new_event("2024-01-15T10:00:00Z", "a"), ts())
            .expect("insert");
        assert!(first.is_some());
        assert!(again.is_none());
        assert_eq!(store.unprocessed_event_count().expect("count"), 1);
    }

    #[test]
    fn ungrouped_events_are_time_ordered() {
        let store = SiftStore::open_in_memory().expect("open store");
        store
            .insert_event(&new_event("2024-01-15T12:00:00Z", "late"), ts())
            .expect("insert");
        store
            .insert_event(&new_event("2024-01-15T09:00:00Z", "early"), ts())
            .expect("insert");
        let events = store.ungrouped_events().expect("query");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["message"], "early");
        assert_eq!(events[1].payload["message"], "late");
    }

    #[test]
    fn create_session_assigns_members_and_hides_them_from_grouping() {
        let store = SiftStore::open_in_memory().expect("open store");
        let a = store
            .insert_event(&new_event("2024-01-15T10:00:00Z", "a"), ts())
            .expect("insert")
            .expect("id");
        let b = store
            .insert_event(&new_event("2024-01-15T10:10:00Z", "b"), ts())
            .expect("insert")
            .expect("id");

        let session_id = store
            .create_session(&[a, b], "2024-01-15T10:00:00Z", "2024-01-15T10:10:00Z")
            .expect("create session");

        assert!(store.ungrouped_events().expect("query").is_empty());
        let members = store.session_events(session_id).expect("members");
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|e| e.session_id == Some(session_id)));

        let sessions = store.unprocessed_sessions(10).expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].event_count, 2);
    }

    #[test]
    fn mark_session_processed_is_idempotent() {
        let store = SiftStore::open_in_memory().expect("open store");
        let a = store
            .insert_event(&new_event("2024-01-15T10:00:00Z", "a"), ts())
            .expect("insert")
            .expect("id");
        let session_id = store
            .create_session(&[a], "2024-01-15T10:00:00Z", "2024-01-15T10:00:00Z")
            .expect("create session");

        assert_eq!(store.mark_session_processed(session_id, ts()).expect("mark"), 1);
        assert_eq!(store.mark_session_processed(session_id, ts()).expect("mark"), 0);
        assert_eq!(store.unprocessed_event_count().expect("count"), 0);
        assert!(store.unprocessed_sessions(10).expect("sessions").is_empty());
    }

    #[test]
    fn run_ledger_reports_latest_completed_end() {
        let store = SiftStore::open_in_memory().expect("open store");
        assert!(store.last_completed_run_end().expect("query").is_none());

        let failed = store.begin_run(3, "local", ts()).expect("begin");
        store.fail_run(failed, "boom", ts() + Duration::hours(2)).expect("fail");
        assert!(store.last_completed_run_end().expect("query").is_none());

        let ok = store.begin_run(3, "local", ts()).expect("begin");
        store.complete_run(ok, 3, 1200, ts() + Duration::hours(1)).expect("complete");
        assert_eq!(
            store.last_completed_run_end().expect("query"),
            Some(ts() + Duration::hours(1))
        );

        let runs = store.recent_runs(5).expect("runs");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[1].error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn project_registry_roundtrip() {
        let store = SiftStore::open_in_memory().expect("open store");
        let project = Project {
            name: "home-automation".into(),
            description: "sensors".into(),
            keywords: vec!["mqtt".into()],
            tags: vec!["iot".into()],
            repos: vec!["me/home".into()],
            path: Some("/src/home".into()),
            active: true,
        };
        assert!(store.create_project(&project, ts()).expect("create"));
        assert!(!store.create_project(&project, ts()).expect("create twice"));
        assert_eq!(store.projects().expect("list"), vec![project]);

        store
            .record_activity(
                "home-automation",
                &Activity {
                    description: "wired mqtt broker".into(),
                    kind: "development".into(),
                    occurred_at: "2024-01-15T10:00:00Z".into(),
                    technologies: vec!["mqtt".into()],
                },
                Some(1),
            )
            .expect("activity");
        assert_eq!(store.activities_for("home-automation").expect("list").len(), 1);
        assert!(store.candidate_project_names().expect("candidates").is_empty());

        store
            .record_activity(
                "garden-log",
                &Activity {
                    description: "logged soil readings".into(),
                    kind: "research".into(),
                    occurred_at: "2024-01-16T10:00:00Z".into(),
                    technologies: Vec::new(),
                },
                None,
            )
            .expect("candidate activity");
        assert_eq!(
            store.candidate_project_names().expect("candidates"),
            vec!["garden-log".to_string()]
        );
    }
}
