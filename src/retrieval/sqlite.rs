//! SQLite-backed persistent policy index using the `sqlite-vec` extension.

use std::os::raw::c_char;
use std::path::Path;
use std::sync::Arc;
use std::sync::Once;

use tokio_rusqlite::{Connection, ffi};
use tracing::instrument;

use super::{Embedder, PolicyDocument, PolicyIndex, RetrievalError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS policies (
    doc_id    TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL,
    version   TEXT NOT NULL,
    chunk_id  TEXT NOT NULL,
    content   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS policy_embeddings (
    doc_id    TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
";

/// Durable vector index over policy rules.
///
/// Vectors persist in a SQLite file across process restarts; cosine distance
/// comes from the `sqlite-vec` extension registered process-wide on first
/// open.
pub struct SqlitePolicyIndex {
    conn: Connection,
    embedder: Arc<dyn Embedder>,
}

impl SqlitePolicyIndex {
    #[instrument(skip(path, embedder))]
    pub async fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrievalError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| storage("open", err))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| storage("init", err))?;
        Ok(Self { conn, embedder })
    }

    fn register_sqlite_vec() -> Result<(), RetrievalError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                )
                    -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    std::mem::transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!("failed to register sqlite-vec extension (code {rc})"))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(|message| RetrievalError::Storage {
                operation: "register".into(),
                message,
            })
    }
}

fn storage(operation: &str, err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Storage {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

fn embedding_json(embedding: &[f32]) -> Result<String, RetrievalError> {
    serde_json::to_string(embedding).map_err(|err| storage("encode", err))
}

#[async_trait::async_trait]
impl PolicyIndex for SqlitePolicyIndex {
    async fn upsert(&self, docs: Vec<PolicyDocument>) -> Result<(), RetrievalError> {
        if docs.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let mut rows = Vec::with_capacity(docs.len());
        for (doc, embedding) in docs.into_iter().zip(embeddings) {
            rows.push((doc, embedding_json(&embedding)?));
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (doc, embedding) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO policies \
                         (doc_id, policy_id, version, chunk_id, content) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        (
                            &doc.doc_id,
                            &doc.policy_id,
                            &doc.version,
                            &doc.chunk_id,
                            &doc.content,
                        ),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute(
                        "INSERT OR REPLACE INTO policy_embeddings (doc_id, embedding) \
                         VALUES (?1, vec_f32(?2))",
                        (&doc.doc_id, embedding),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| storage("upsert", err))
    }

    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<(PolicyDocument, f32)>, RetrievalError> {
        let query_embedding = self
            .embedder
            .embed(std::slice::from_ref(&text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding {
                message: "embedder returned no vector for the query".into(),
            })?;
        let embedding = embedding_json(&query_embedding)?;
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT p.doc_id, p.policy_id, p.version, p.chunk_id, p.content, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                         FROM policies p \
                         JOIN policy_embeddings e ON p.doc_id = e.doc_id \
                         ORDER BY distance ASC \
                         LIMIT {top_k}"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&embedding], |row| {
                        let doc = PolicyDocument {
                            doc_id: row.get(0)?,
                            policy_id: row.get(1)?,
                            version: row.get(2)?,
                            chunk_id: row.get(3)?,
                            content: row.get(4)?,
                        };
                        let distance: f32 = row.get(5)?;
                        Ok((doc, 1.0 - distance))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| storage("query", err))
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM policy_embeddings", [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute("DELETE FROM policies", [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| storage("clear", err))
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM policies", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| storage("count", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::HashEmbedder;

    async fn open_index(dir: &tempfile::TempDir) -> SqlitePolicyIndex {
        SqlitePolicyIndex::open(
            dir.path().join("policies.db"),
            Arc::new(HashEmbedder::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = open_index(&dir).await;
            index
                .upsert(vec![PolicyDocument::from_rule(
                    "POL-1",
                    "v1",
                    "monto elevado fuera de horario → CHALLENGE",
                )])
                .await
                .unwrap();
        }
        let index = open_index(&dir).await;
        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.query("monto elevado", 2).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.policy_id, "POL-1");
    }

    #[tokio::test]
    async fn clear_then_bulk_upsert_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index
            .upsert(vec![PolicyDocument::from_rule("POL-OLD", "v1", "obsoleta")])
            .await
            .unwrap();
        index.clear().await.unwrap();
        index
            .upsert(vec![
                PolicyDocument::from_rule("POL-A", "v2", "regla a"),
                PolicyDocument::from_rule("POL-B", "v2", "regla b"),
            ])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
        let hits = index.query("regla a", 5).await.unwrap();
        assert!(hits.iter().all(|(doc, _)| doc.policy_id != "POL-OLD"));
    }
}
