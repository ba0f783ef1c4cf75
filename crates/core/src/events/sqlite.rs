use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{DomainEvent, EventError, EventFilter, EventRecord, EventStore};

/// SQLite-backed event store
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Create a new SQLite event store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, EventError> {
        let conn = Connection::open(path).map_err(|e| EventError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite event store (useful for testing)
    pub fn in_memory() -> Result<Self, EventError> {
        let conn = Connection::open_in_memory().map_err(|e| EventError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), EventError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS domain_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                run_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_domain_events_timestamp ON domain_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_domain_events_run_id ON domain_events(run_id);
            CREATE INDEX IF NOT EXISTS idx_domain_events_event_type ON domain_events(event_type);
            "#,
        )
        .map_err(|e| EventError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EventError> {
        self.conn
            .lock()
            .map_err(|_| EventError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref run_id) = filter.run_id {
            conditions.push("run_id = ?");
            params.push(Box::new(run_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError> {
        let conn = self.conn()?;

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO domain_events (timestamp, event_type, run_id, data) VALUES (?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.run_id,
                data_json,
            ],
        )
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, event_type, run_id, data FROM domain_events {} ORDER BY id ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let id: i64 = row.get(0)?;
                let timestamp_str: String = row.get(1)?;
                let event_type: String = row.get(2)?;
                let run_id: Option<String> = row.get(3)?;
                let data_json: String = row.get(4)?;

                Ok((id, timestamp_str, event_type, run_id, data_json))
            })
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, event_type, run_id, data_json) =
                row_result.map_err(|e| EventError::Database(e.to_string()))?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| EventError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            let data: DomainEvent = serde_json::from_str(&data_json)
                .map_err(|e| EventError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                id,
                timestamp,
                event_type,
                run_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, EventError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM domain_events {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::TierAggregate;

    fn create_test_store() -> SqliteEventStore {
        SqliteEventStore::in_memory().unwrap()
    }

    fn record(event: DomainEvent) -> EventRecord {
        EventRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            run_id: event.run_id().map(String::from),
            data: event,
        }
    }

    fn tier_completed(run_id: &str, tier_id: &str) -> EventRecord {
        record(DomainEvent::TierCompleted {
            run_id: run_id.to_string(),
            tier_id: tier_id.to_string(),
            aggregate: TierAggregate::Success,
        })
    }

    #[test]
    fn test_insert_and_query() {
        let store = create_test_store();
        let id = store
            .insert(&record(DomainEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc".to_string(),
            }))
            .unwrap();
        assert!(id > 0);

        let results = store.query(&EventFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].event_type, "service_started");
    }

    #[test]
    fn test_query_by_run_id_in_order() {
        let store = create_test_store();
        store.insert(&tier_completed("run-1", "tier1")).unwrap();
        store.insert(&tier_completed("run-2", "tier1")).unwrap();
        store.insert(&tier_completed("run-1", "tier2")).unwrap();

        let results = store
            .query(&EventFilter::new().with_run_id("run-1"))
            .unwrap();
        assert_eq!(results.len(), 2);
        match (&results[0].data, &results[1].data) {
            (
                DomainEvent::TierCompleted { tier_id: a, .. },
                DomainEvent::TierCompleted { tier_id: b, .. },
            ) => {
                assert_eq!(a, "tier1");
                assert_eq!(b, "tier2");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_query_by_event_type() {
        let store = create_test_store();
        store.insert(&tier_completed("run-1", "tier1")).unwrap();
        store
            .insert(&record(DomainEvent::RunCompleted {
                run_id: "run-1".to_string(),
                artifact_ref: "/out/a.json".to_string(),
            }))
            .unwrap();

        let filter = EventFilter::new().with_event_type("run_completed");
        assert_eq!(store.query(&filter).unwrap().len(), 1);
        assert_eq!(store.count(&filter).unwrap(), 1);
        assert_eq!(store.count(&EventFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_pagination() {
        let store = create_test_store();
        for i in 0..5 {
            store
                .insert(&tier_completed("run-1", &format!("tier{}", i)))
                .unwrap();
        }

        let filter = EventFilter::new().with_limit(2).with_offset(4);
        assert_eq!(store.query(&filter).unwrap().len(), 1);
        let filter = EventFilter::new().with_limit(2).with_offset(0);
        assert_eq!(store.query(&filter).unwrap().len(), 2);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");

        let store = SqliteEventStore::new(&db_path).unwrap();
        store.insert(&tier_completed("run-1", "tier1")).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.query(&EventFilter::new()).unwrap().len(), 1);
    }
}
