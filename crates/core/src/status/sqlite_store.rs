//! SQLite-backed status store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::run::{RunContext, RunOutcome, RunPhase, TierStatus};

use super::{RunFilter, RunRecord, StatusError, StatusStore};

/// SQLite-backed status store.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteStatusStore {
    /// Create a new SQLite status store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StatusError> {
        let conn = Connection::open(path).map_err(|e| StatusError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite status store (useful for testing).
    pub fn in_memory() -> Result<Self, StatusError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StatusError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StatusError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                plan TEXT,
                payload TEXT NOT NULL,
                phase TEXT NOT NULL,
                cursor TEXT,
                outcome TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_client_id ON runs(client_id);
            CREATE INDEX IF NOT EXISTS idx_runs_phase ON runs(phase);
            CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);

            CREATE TABLE IF NOT EXISTS tier_statuses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                tier_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                aggregate TEXT NOT NULL,
                data TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                UNIQUE(run_id, tier_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tier_statuses_run_id ON tier_statuses(run_id);
            "#,
        )
        .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StatusError> {
        self.conn
            .lock()
            .map_err(|_| StatusError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &RunFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(phase) = filter.phase {
            conditions.push("phase = ?");
            params.push(Box::new(phase.as_str()));
        }

        if let Some(ref client_id) = filter.client_id {
            conditions.push("client_id = ?");
            params.push(Box::new(client_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RunRecord> {
        let run_id: String = row.get(0)?;
        let client_id: String = row.get(1)?;
        let plan: Option<String> = row.get(2)?;
        let payload_json: String = row.get(3)?;
        let phase_str: String = row.get(4)?;
        let cursor: Option<String> = row.get(5)?;
        let outcome_json: Option<String> = row.get(6)?;
        let created_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;
        let finished_at_str: Option<String> = row.get(9)?;

        let phase = RunPhase::parse(&phase_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown phase: {}", phase_str).into(),
            )
        })?;

        let payload = serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null);
        let outcome: Option<RunOutcome> =
            outcome_json.and_then(|json| serde_json::from_str(&json).ok());

        Ok(RunRecord {
            run_id,
            client_id,
            plan,
            payload,
            phase,
            cursor,
            outcome,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            finished_at: finished_at_str.as_deref().map(parse_timestamp),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const RUN_COLUMNS: &str =
    "run_id, client_id, plan, payload, phase, cursor, outcome, created_at, updated_at, finished_at";

impl StatusStore for SqliteStatusStore {
    fn create_run(&self, ctx: &RunContext) -> Result<RunRecord, StatusError> {
        let conn = self.conn()?;
        let now = Utc::now();

        let payload_json = serde_json::to_string(&ctx.payload)
            .map_err(|e| StatusError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO runs (run_id, client_id, plan, payload, phase, cursor, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ctx.run_id,
                ctx.client_id,
                ctx.plan,
                payload_json,
                RunPhase::Initializing.as_str(),
                ctx.cursor,
                ctx.created_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| StatusError::Database(e.to_string()))?;

        Ok(RunRecord {
            run_id: ctx.run_id.clone(),
            client_id: ctx.client_id.clone(),
            plan: ctx.plan.clone(),
            payload: ctx.payload.clone(),
            phase: RunPhase::Initializing,
            cursor: ctx.cursor.clone(),
            outcome: None,
            created_at: ctx.created_at,
            updated_at: now,
            finished_at: None,
        })
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StatusError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM runs WHERE run_id = ?", RUN_COLUMNS),
            params![run_id],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StatusError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM runs {} ORDER BY created_at DESC, run_id LIMIT ? OFFSET ?",
            RUN_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(|e| StatusError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn count_runs(&self, filter: &RunFilter) -> Result<i64, StatusError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM runs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| StatusError::Database(e.to_string()))
    }

    fn update_phase(
        &self,
        run_id: &str,
        phase: RunPhase,
        cursor: Option<&str>,
    ) -> Result<(), StatusError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE runs SET phase = ?, cursor = COALESCE(?, cursor), updated_at = ? WHERE run_id = ?",
                params![phase.as_str(), cursor, Utc::now().to_rfc3339(), run_id],
            )
            .map_err(|e| StatusError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(StatusError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn finish_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<(), StatusError> {
        let conn = self.conn()?;
        let outcome_json =
            serde_json::to_string(outcome).map_err(|e| StatusError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE runs SET phase = ?, outcome = ?, updated_at = ?, finished_at = ? WHERE run_id = ?",
                params![outcome.phase().as_str(), outcome_json, now, now, run_id],
            )
            .map_err(|e| StatusError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(StatusError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn record_tier(&self, run_id: &str, status: &TierStatus) -> Result<(), StatusError> {
        let conn = self.conn()?;
        let data_json =
            serde_json::to_string(status).map_err(|e| StatusError::Serialization(e.to_string()))?;

        let result = conn.execute(
            "INSERT INTO tier_statuses (run_id, tier_id, sequence, aggregate, data, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                run_id,
                status.tier_id,
                status.sequence,
                status.label(),
                data_json,
                status.recorded_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StatusError::DuplicateTier {
                    run_id: run_id.to_string(),
                    tier_id: status.tier_id.clone(),
                })
            }
            Err(e) => Err(StatusError::Database(e.to_string())),
        }
    }

    fn tier_history(&self, run_id: &str) -> Result<Vec<TierStatus>, StatusError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT data FROM tier_statuses WHERE run_id = ? ORDER BY sequence, id")
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))
            .map_err(|e| StatusError::Database(e.to_string()))?;

        let mut history = Vec::new();
        for row in rows {
            let json = row.map_err(|e| StatusError::Database(e.to_string()))?;
            let status: TierStatus = serde_json::from_str(&json)
                .map_err(|e| StatusError::Serialization(e.to_string()))?;
            history.push(status);
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{Artifact, ItemOutcome, ItemResult, RunSeed};
    use crate::step::FailureClass;
    use serde_json::json;

    fn create_test_store() -> SqliteStatusStore {
        SqliteStatusStore::in_memory().unwrap()
    }

    fn ctx(run_id: &str, client_id: &str) -> RunContext {
        RunContext::new(
            run_id,
            RunSeed::new(client_id)
                .with_plan("standard")
                .with_payload(json!({"lang": "en"})),
        )
    }

    fn tier(id: &str, sequence: u32) -> TierStatus {
        TierStatus::from_outcomes(
            id,
            sequence,
            vec![ItemOutcome {
                item_id: "item-1".to_string(),
                attempts: 1,
                result: ItemResult::Succeeded {
                    output: json!({"ok": true}),
                },
            }],
            vec![],
            false,
        )
    }

    #[test]
    fn test_create_and_get_run() {
        let store = create_test_store();
        let created = store.create_run(&ctx("run-1", "client-a")).unwrap();
        assert_eq!(created.phase, RunPhase::Initializing);

        let fetched = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(fetched.client_id, "client-a");
        assert_eq!(fetched.plan.as_deref(), Some("standard"));
        assert_eq!(fetched.payload, json!({"lang": "en"}));
        assert!(fetched.outcome.is_none());
    }

    #[test]
    fn test_get_unknown_run() {
        let store = create_test_store();
        assert!(store.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_phase_keeps_cursor_when_none() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "c")).unwrap();

        store
            .update_phase("run-1", RunPhase::Publishing, Some("tier1"))
            .unwrap();
        store
            .update_phase("run-1", RunPhase::Deciding, None)
            .unwrap();

        let record = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(record.phase, RunPhase::Deciding);
        assert_eq!(record.cursor.as_deref(), Some("tier1"));
    }

    #[test]
    fn test_update_phase_unknown_run() {
        let store = create_test_store();
        let err = store
            .update_phase("nope", RunPhase::SelectingTier, None)
            .unwrap_err();
        assert!(matches!(err, StatusError::NotFound(_)));
    }

    #[test]
    fn test_finish_run_stores_outcome() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "c")).unwrap();

        let outcome = RunOutcome::Completed {
            artifact: Artifact {
                artifact_ref: "/out/c/run-1.json".to_string(),
                bytes: 42,
                sha256: "ab".repeat(32),
            },
            failed_tiers: vec![],
        };
        store.finish_run("run-1", &outcome).unwrap();

        let record = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(record.phase, RunPhase::Completed);
        assert_eq!(record.outcome, Some(outcome));
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_tier_history_is_append_only() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "c")).unwrap();

        store.record_tier("run-1", &tier("tier1", 1)).unwrap();
        store.record_tier("run-1", &tier("tier2", 2)).unwrap();

        let err = store.record_tier("run-1", &tier("tier1", 3)).unwrap_err();
        assert!(matches!(err, StatusError::DuplicateTier { .. }));

        let history = store.tier_history("run-1").unwrap();
        let ids: Vec<_> = history.iter().map(|s| s.tier_id.as_str()).collect();
        assert_eq!(ids, vec!["tier1", "tier2"]);
    }

    #[test]
    fn test_same_tier_id_in_different_runs() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "c")).unwrap();
        store.create_run(&ctx("run-2", "c")).unwrap();

        store.record_tier("run-1", &tier("tier1", 1)).unwrap();
        store.record_tier("run-2", &tier("tier1", 1)).unwrap();

        assert_eq!(store.tier_history("run-1").unwrap().len(), 1);
        assert_eq!(store.tier_history("run-2").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_tier_roundtrip() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "c")).unwrap();

        let status = TierStatus::from_outcomes(
            "tier1",
            1,
            vec![ItemOutcome {
                item_id: "x".to_string(),
                attempts: 3,
                result: ItemResult::Failed {
                    error: crate::step::StepError::transient("timeout").exhausted(3),
                },
            }],
            vec![],
            false,
        );
        store.record_tier("run-1", &status).unwrap();

        let history = store.tier_history("run-1").unwrap();
        assert_eq!(history[0], status);
        assert_eq!(
            history[0].outcomes[0].failure_class(),
            Some(FailureClass::AttemptsExhausted)
        );
    }

    #[test]
    fn test_list_and_count_with_filters() {
        let store = create_test_store();
        store.create_run(&ctx("run-1", "alice")).unwrap();
        store.create_run(&ctx("run-2", "alice")).unwrap();
        store.create_run(&ctx("run-3", "bob")).unwrap();
        store
            .update_phase("run-2", RunPhase::SelectingTier, None)
            .unwrap();

        let all = store.list_runs(&RunFilter::new()).unwrap();
        assert_eq!(all.len(), 3);

        let alice = RunFilter::new().with_client_id("alice");
        assert_eq!(store.count_runs(&alice).unwrap(), 2);

        let selecting = RunFilter::new().with_phase(RunPhase::SelectingTier);
        let runs = store.list_runs(&selecting).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-2");

        let page = store.list_runs(&RunFilter::new().with_limit(2)).unwrap();
        assert_eq!(page.len(), 2);
        let rest = store
            .list_runs(&RunFilter::new().with_limit(2).with_offset(2))
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");

        {
            let store = SqliteStatusStore::new(&path).unwrap();
            store.create_run(&ctx("run-1", "c")).unwrap();
            store.record_tier("run-1", &tier("tier1", 1)).unwrap();
        }

        let store = SqliteStatusStore::new(&path).unwrap();
        assert!(store.get_run("run-1").unwrap().is_some());
        assert_eq!(store.tier_history("run-1").unwrap().len(), 1);
    }
}
