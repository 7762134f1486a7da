use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

static SQLITE_VEC_REGISTERED: Once = Once::new();

/// Registers the `sqlite-vec` loadable extension with sqlite's
/// auto-extension mechanism so every connection opened afterwards (by any
/// pool, in this process) gets `vec0`/`vec_distance_cosine` for free.
/// `sqlite3_auto_extension` applies process-wide and must run before the
/// first connection is made, so this is called once, lazily, the first time
/// a collection file is opened.
fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_REGISTERED.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSource {
    Ocr,
    Vision,
    Combined,
}

impl VectorSource {
    fn as_str(&self) -> &'static str {
        match self {
            VectorSource::Ocr => "ocr",
            VectorSource::Vision => "vision",
            VectorSource::Combined => "combined",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "vision" => VectorSource::Vision,
            "combined" => VectorSource::Combined,
            _ => VectorSource::Ocr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub recording_id: String,
    pub t_offset: f64,
    pub source: VectorSource,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub recording_id: Option<String>,
}

struct Collection {
    pool: SqlitePool,
    dim: usize,
}

/// One sqlite file per embedding model (`emb:<model>`), loaded with the
/// `sqlite-vec` extension. Keeping dimension-per-file means deleting a
/// collection is just deleting a file (§4.3).
pub struct VectorStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

fn collection_file(root: &Path, name: &str) -> PathBuf {
    let safe_name: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    root.join(format!("{safe_name}.db"))
}

impl VectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    async fn open_collection_file(&self, name: &str) -> Result<SqlitePool> {
        ensure_sqlite_vec_registered();
        let path = collection_file(&self.root, name);
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&url)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(pool)
    }

    pub async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            if existing.dim != dim {
                return Err(Error::ConstraintViolation(format!(
                    "collection {name} already has dimension {}, requested {dim}",
                    existing.dim
                )));
            }
            return Ok(());
        }

        let pool = self.open_collection_file(name).await?;
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vectors USING vec0(id TEXT PRIMARY KEY, embedding FLOAT[{dim}])"
        ))
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_metadata (id TEXT PRIMARY KEY, recording_id TEXT NOT NULL, t_offset REAL NOT NULL, source TEXT NOT NULL)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_metadata_recording ON vector_metadata (recording_id)",
        )
        .execute(&pool)
        .await?;

        collections.insert(name.to_string(), Arc::new(Collection { pool, dim }));
        Ok(())
    }

    async fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection {name}")))
    }

    pub async fn upsert(
        &self,
        collection: &str,
        records: &[(String, Vec<f32>, VectorMetadata)],
    ) -> Result<()> {
        let col = self.get_collection(collection).await?;
        let mut tx = col.pool.begin().await?;
        for (id, vector, metadata) in records {
            if vector.len() != col.dim {
                return Err(Error::ConstraintViolation(format!(
                    "vector for {id} has dimension {}, collection expects {}",
                    vector.len(),
                    col.dim
                )));
            }
            let blob = vector_to_blob(vector);
            sqlx::query("INSERT OR REPLACE INTO vectors (id, embedding) VALUES (?, ?)")
                .bind(id)
                .bind(blob)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT OR REPLACE INTO vector_metadata (id, recording_id, t_offset, source) VALUES (?,?,?,?)",
            )
            .bind(id)
            .bind(&metadata.recording_id)
            .bind(metadata.t_offset)
            .bind(metadata.source.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>> {
        let col = self.get_collection(collection).await?;
        if vector.len() != col.dim {
            return Err(Error::ConstraintViolation(format!(
                "query vector has dimension {}, collection expects {}",
                vector.len(),
                col.dim
            )));
        }
        let blob = vector_to_blob(vector);

        let mut sql = String::from(
            r#"
            SELECT v.id as id, vec_distance_cosine(v.embedding, ?) as distance,
                   m.recording_id as recording_id, m.t_offset as t_offset, m.source as source
            FROM vectors v
            JOIN vector_metadata m ON m.id = v.id
            "#,
        );
        if filter.recording_id.is_some() {
            sql.push_str(" WHERE m.recording_id = ?");
        }
        sql.push_str(" ORDER BY distance ASC, v.id ASC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(blob);
        if let Some(rid) = &filter.recording_id {
            query = query.bind(rid);
        }
        query = query.bind(k as i64);

        let rows = query.fetch_all(&col.pool).await?;
        rows.iter()
            .map(|row| {
                let distance: f32 = row.try_get("distance")?;
                Ok(VectorHit {
                    id: row.try_get("id")?,
                    score: 1.0 - distance,
                    metadata: VectorMetadata {
                        recording_id: row.try_get("recording_id")?,
                        t_offset: row.try_get("t_offset")?,
                        source: VectorSource::parse(row.try_get::<String, _>("source")?.as_str()),
                    },
                })
            })
            .collect()
    }

    pub async fn delete_by_filter(&self, collection: &str, filter: &VectorFilter) -> Result<()> {
        let col = match self.get_collection(collection).await {
            Ok(c) => c,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(rid) = &filter.recording_id {
            let ids: Vec<String> = sqlx::query("SELECT id FROM vector_metadata WHERE recording_id = ?")
                .bind(rid)
                .fetch_all(&col.pool)
                .await?
                .iter()
                .map(|r| r.try_get::<String, _>("id"))
                .collect::<std::result::Result<_, _>>()?;
            let mut tx = col.pool.begin().await?;
            for id in ids {
                sqlx::query("DELETE FROM vectors WHERE id = ?")
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM vector_metadata WHERE id = ?")
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Deletes the on-disk file backing a collection entirely.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(col) = collections.remove(name) {
            col.pool.close().await;
        }
        let path = collection_file(&self.root, name);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn collection_name_for_model(model: &str) -> String {
    format!("emb:{model}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VectorStore::new(tmp.path());
        store.ensure_collection("emb:test", 4).await.unwrap();
        let err = store.ensure_collection("emb:test", 8).await.unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn collection_name_matches_convention() {
        assert_eq!(collection_name_for_model("bge-small"), "emb:bge-small");
    }
}
