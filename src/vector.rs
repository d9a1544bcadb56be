//! Vector store adapters for chunk embeddings

use crate::config::VectorStoreConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Metadata stored alongside each embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub document_id: String,
    pub domain: String,
    pub ordinal: u32,
    pub section_path: Vec<String>,
}

/// One embedding with its payload
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// Result of a k-NN query
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub chunk_id: String,
    /// Similarity in [0, 1]
    pub similarity: f32,
    pub payload: VectorPayload,
}

/// Server-side filter applied before ranking
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub domain: Option<String>,
    pub document_id: Option<String>,
}

impl VectorFilter {
    fn matches(&self, payload: &VectorPayload) -> bool {
        if let Some(domain) = &self.domain {
            if &payload.domain != domain {
                return false;
            }
        }
        if let Some(document_id) = &self.document_id {
            if &payload.document_id != document_id {
                return false;
            }
        }
        true
    }
}

/// Vector store statistics
#[derive(Debug, Clone, Serialize)]
pub struct VectorStats {
    pub points: usize,
    pub documents: usize,
    pub dimension: usize,
}

/// Vector store adapter: upsert/query embeddings with payload metadata
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Initialize backing storage
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace points; one embedding per chunk
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// k-NN similarity query, ranked by similarity descending
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Remove all points of one document; idempotent
    async fn delete_by_document(&self, document_id: &str) -> Result<u64>;

    /// Number of stored points
    async fn count(&self) -> Result<usize>;

    /// Remove everything; idempotent
    async fn clear(&self) -> Result<()>;

    /// Get store statistics
    async fn stats(&self) -> Result<VectorStats>;

    /// Cheap readiness probe
    async fn health_check(&self) -> Result<()>;
}

/// Calculate cosine similarity between two vectors, clamped to [0, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(0.0, 1.0)
}

fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(StoreError::InvalidDimension { expected, actual }.into());
    }
    Ok(())
}

fn rank(mut results: Vec<ScoredPoint>, k: usize) -> Vec<ScoredPoint> {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k);
    results
}

/// In-memory vector store, brute-force cosine ranking
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<String, VectorPoint>>,
    dimension: usize,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            dimension,
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, new_points: Vec<VectorPoint>) -> Result<()> {
        for point in &new_points {
            check_dimension(self.dimension, point.vector.len())?;
        }
        let mut points = self.points.write().await;
        for point in new_points {
            points.insert(point.chunk_id.clone(), point);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        check_dimension(self.dimension, vector.len())?;

        let points = self.points.read().await;
        let results: Vec<ScoredPoint> = points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|p| ScoredPoint {
                chunk_id: p.chunk_id.clone(),
                similarity: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        Ok(rank(results, k))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let mut points = self.points.write().await;
        let before = points.len();
        points.retain(|_, p| p.payload.document_id != document_id);
        Ok((before - points.len()) as u64)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }

    async fn clear(&self) -> Result<()> {
        self.points.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStats> {
        let points = self.points.read().await;
        let documents = points
            .values()
            .map(|p| p.payload.document_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        Ok(VectorStats {
            points: points.len(),
            documents,
            dimension: self.dimension,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// SQLite-backed vector store
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dimension: usize,
}

impl SqliteVectorStore {
    /// Connect and prepare the embeddings table
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_ref()
            .ok_or(StoreError::NotInitialized)?;

        info!("Initializing SQLite vector store at {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                section_path TEXT NOT NULL DEFAULT '[]',
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_document ON embeddings(document_id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            dimension: config.embedding_dimension,
        })
    }

    /// Serialize embedding for storage
    pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding
            .iter()
            .flat_map(|f| f.to_le_bytes().to_vec())
            .collect()
    }

    /// Deserialize embedding from storage
    pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn payload_from_row(row: &sqlx::sqlite::SqliteRow) -> VectorPayload {
        let section_path: String = row.get("section_path");
        VectorPayload {
            document_id: row.get("document_id"),
            domain: row.get("domain"),
            ordinal: row.get::<i64, _>("ordinal") as u32,
            section_path: serde_json::from_str(&section_path).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        for point in &points {
            check_dimension(self.dimension, point.vector.len())?;
        }

        for point in points {
            let blob = Self::serialize_embedding(&point.vector);
            let section_path = serde_json::to_string(&point.payload.section_path)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO embeddings
                    (chunk_id, document_id, domain, ordinal, section_path, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&point.chunk_id)
            .bind(&point.payload.document_id)
            .bind(&point.payload.domain)
            .bind(point.payload.ordinal as i64)
            .bind(&section_path)
            .bind(&blob)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        check_dimension(self.dimension, vector.len())?;

        // Brute-force scan; acceptable at the corpus sizes this store serves
        let rows = sqlx::query("SELECT * FROM embeddings")
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::new();
        for row in rows {
            let payload = Self::payload_from_row(&row);
            if let Some(f) = filter {
                if !f.matches(&payload) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("embedding");
            let embedding = Self::deserialize_embedding(&blob);
            results.push(ScoredPoint {
                chunk_id: row.get("chunk_id"),
                similarity: cosine_similarity(vector, &embedding),
                payload,
            });
        }

        debug!("vector query matched {} candidates", results.len());
        Ok(rank(results, k))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM embeddings")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) as points, COUNT(DISTINCT document_id) as documents FROM embeddings",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(VectorStats {
            points: row.get::<i64, _>("points") as usize,
            documents: row.get::<i64, _>("documents") as usize,
            dimension: self.dimension,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(chunk_id: &str, document_id: &str, domain: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            chunk_id: chunk_id.to_string(),
            vector,
            payload: VectorPayload {
                document_id: document_id.to_string(),
                domain: domain.to_string(),
                ordinal: 0,
                section_path: vec![],
            },
        }
    }

    fn padded(prefix: Vec<f32>) -> Vec<f32> {
        let mut v = prefix;
        v.resize(8, 0.0);
        v
    }

    #[tokio::test]
    async fn test_memory_store_query_ranking() {
        let store = InMemoryVectorStore::new(8);
        store
            .upsert(vec![
                point("d:0", "d", "general", padded(vec![1.0, 0.0])),
                point("d:1", "d", "general", padded(vec![0.9, 0.1])),
                point("d:2", "d", "general", padded(vec![0.0, 1.0])),
            ])
            .await
            .unwrap();

        let results = store
            .query(&padded(vec![1.0, 0.0]), 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "d:0");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn test_memory_store_domain_filter() {
        let store = InMemoryVectorStore::new(8);
        store
            .upsert(vec![
                point("a:0", "a", "general", padded(vec![1.0])),
                point("b:0", "b", "automotive", padded(vec![1.0])),
            ])
            .await
            .unwrap();

        let filter = VectorFilter {
            domain: Some("automotive".to_string()),
            document_id: None,
        };
        let results = store
            .query(&padded(vec![1.0]), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "b:0");
    }

    #[tokio::test]
    async fn test_memory_store_dimension_mismatch() {
        let store = InMemoryVectorStore::new(8);
        let err = store
            .upsert(vec![point("a:0", "a", "general", vec![1.0, 2.0])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataIntegrity);
    }

    #[tokio::test]
    async fn test_memory_store_delete_by_document() {
        let store = InMemoryVectorStore::new(8);
        store
            .upsert(vec![
                point("a:0", "a", "general", padded(vec![1.0])),
                point("a:1", "a", "general", padded(vec![0.5])),
                point("b:0", "b", "general", padded(vec![1.0])),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_document("a").await.unwrap(), 2);
        assert_eq!(store.delete_by_document("a").await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let config = VectorStoreConfig {
            mode: "sqlite".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            embedding_dimension: 8,
        };
        let store = SqliteVectorStore::connect(&config).await.unwrap();

        store
            .upsert(vec![
                point("doc:0", "doc", "general", padded(vec![1.0, 0.0])),
                point("doc:1", "doc", "general", padded(vec![0.0, 1.0])),
            ])
            .await
            .unwrap();

        let results = store
            .query(&padded(vec![1.0, 0.0]), 1, None)
            .await
            .unwrap();
        assert_eq!(results[0].chunk_id, "doc:0");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.points, 2);
        assert_eq!(stats.documents, 1);

        assert_eq!(store.delete_by_document("doc").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_embedding_serialization() {
        let embedding = vec![1.5, -2.3, 0.0, 42.1];
        let serialized = SqliteVectorStore::serialize_embedding(&embedding);
        let deserialized = SqliteVectorStore::deserialize_embedding(&serialized);

        assert_eq!(embedding.len(), deserialized.len());
        for (orig, deser) in embedding.iter().zip(deserialized.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(cosine_similarity(&a, &b), 1.0);
        assert_eq!(cosine_similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_cosine_similarity_stays_in_range() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..100 {
            let a: Vec<f32> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
            let b: Vec<f32> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
            let sim = cosine_similarity(&a, &b);
            assert!((0.0..=1.0).contains(&sim));
        }
    }
}
