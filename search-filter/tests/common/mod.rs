//! Shared fixtures: the same four documents as SQLite rows and as vector payloads.

#![allow(dead_code)]

use search_filter::{shadow, SqlValue, StructuredFilter};
use serde_json::{json, Value};
use sqlx::{Row, Sqlite, SqlitePool};

pub struct TestDocument {
    pub id: &'static str,
    pub channel_id: &'static str,
    pub content: &'static str,
    pub timestamp: i64,
    pub processed: bool,
    pub metadata: Value,
}

impl TestDocument {
    /// Payload as stored in the vector index: root fields at the top level, metadata
    /// nested under `metadata` with array-length shadow fields.
    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "id": self.id,
            "channel_id": self.channel_id,
            "content": self.content,
            "timestamp": self.timestamp,
            "processed": self.processed,
            "metadata": self.metadata.clone(),
        });
        if let Value::Object(map) = &mut payload {
            shadow::mirror_array_lengths(map);
        }
        payload
    }
}

pub fn documents() -> Vec<TestDocument> {
    vec![
        TestDocument {
            id: "1",
            channel_id: "general",
            content: "Deploy finished for release 2.4",
            timestamp: 1_704_067_200, // 2024-01-01
            processed: false,
            metadata: json!({
                "priority": 9,
                "tags": ["urgent", "deploy"],
                "lang": "en",
                "author": {"name": "alice"},
                "score": 0.75
            }),
        },
        TestDocument {
            id: "2",
            channel_id: "alerts",
            content: "Disk alert on node-3",
            timestamp: 1_706_745_600, // 2024-02-01
            processed: true,
            metadata: json!({
                "priority": 3,
                "tags": ["ops"],
                "lang": "de",
                "score": 0.5
            }),
        },
        TestDocument {
            id: "3",
            channel_id: "random",
            content: "Lunch menu: 100% vegan_options",
            timestamp: 1_709_251_200, // 2024-03-01
            processed: false,
            metadata: json!({
                "priority": 7,
                "lang": "en",
                "author": {"name": "bob"}
            }),
        },
        TestDocument {
            id: "4",
            channel_id: "alerts",
            content: "",
            timestamp: 1_711_929_600, // 2024-04-01
            processed: false,
            metadata: json!({"tags": [], "lang": null}),
        },
    ]
}

pub fn all_ids() -> Vec<String> {
    documents().iter().map(|doc| doc.id.to_string()).collect()
}

/// In-memory database holding [`documents`] in the default schema.
pub async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::query(
        "CREATE TABLE documents (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            metadata TEXT NOT NULL
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    for doc in documents() {
        sqlx::query(
            "INSERT INTO documents (id, channel_id, content, timestamp, processed, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(doc.id)
        .bind(doc.channel_id)
        .bind(doc.content)
        .bind(doc.timestamp)
        .bind(i64::from(doc.processed))
        .bind(doc.metadata.to_string())
        .execute(&pool)
        .await
        .unwrap();
    }
    pool
}

/// Runs `SELECT id ... WHERE <sql>` with `params` bound in placeholder order.
pub async fn query_ids(pool: &SqlitePool, sql: &str, params: Vec<SqlValue>) -> Vec<String> {
    let statement = format!("SELECT id FROM documents WHERE {} ORDER BY id", sql);
    let mut query = sqlx::query::<Sqlite>(&statement);
    for param in params {
        query = match param {
            SqlValue::String(s) => query.bind(s),
            SqlValue::Integer(i) => query.bind(i),
            SqlValue::Float(f) => query.bind(f),
        };
    }
    query
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("id"))
        .collect()
}

/// Ids of the documents whose payload the filter accepts; `None` accepts everything.
pub fn payload_ids(filter: &Option<StructuredFilter>) -> Vec<String> {
    documents()
        .iter()
        .map(TestDocument::payload)
        .filter(|payload| filter.as_ref().map_or(true, |f| f.matches(payload)))
        .filter_map(|payload| payload["id"].as_str().map(str::to_string))
        .collect()
}
