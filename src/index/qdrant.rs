//! Qdrant REST backend for the vector index.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{EmbeddedChunk, IndexError, ScoredChunk, VectorIndex, sort_hits};
use crate::types::DocumentId;

/// Vector index backed by a Qdrant collection over HTTP.
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantIndex {
    /// Construct a client for the given Qdrant instance and collection.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: &str,
    ) -> Result<Self, IndexError> {
        let client = Client::builder().user_agent("ragpipe/0.1").build()?;
        let base_url = normalize_base_url(base_url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(url = %base_url, collection, "Initialized Qdrant HTTP client");

        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
        })
    }

    /// Create the backing collection when it is missing.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), IndexError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response).await?;
        tracing::debug!(collection = %self.collection, vector_size, "Collection created");

        for (field, schema) in [("document_id", "keyword"), ("active", "bool")] {
            let body = json!({ "field_name": field, "field_schema": schema });
            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() && response.status() != StatusCode::CONFLICT {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(field, %status, body, "Failed to ensure payload index");
            }
        }
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexError::UnexpectedStatus { status, body })
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), IndexError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    async fn count_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )
            .json(&json!({
                "filter": document_filter(document_id),
                "exact": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::UnexpectedStatus { status, body });
        }

        let payload: CountResponse = response.json().await?;
        Ok(payload.result.count)
    }
}

/// Deterministic point id for a chunk, derived from its document and ordinal.
///
/// Qdrant point ids must be UUIDs or integers; deriving them from the chunk
/// coordinates makes re-ingestion an in-place replace.
fn point_id(document_id: DocumentId, ordinal: usize) -> Uuid {
    Uuid::new_v5(&document_id, ordinal.to_string().as_bytes())
}

fn document_filter(document_id: DocumentId) -> Value {
    json!({
        "must": [
            { "key": "document_id", "match": { "value": document_id.to_string() } }
        ]
    })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        document_id: DocumentId,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let point_count = chunks.len();
        let points: Vec<Value> = chunks
            .into_iter()
            .map(|chunk| {
                let id = point_id(document_id, chunk.ordinal);
                json!({
                    "id": id.to_string(),
                    "vector": chunk.vector,
                    "payload": {
                        "chunk_id": chunk.id,
                        "document_id": chunk.document_id.to_string(),
                        "document": chunk.document,
                        "ordinal": chunk.ordinal,
                        "text": chunk.text,
                        "page": chunk.page,
                        "images": chunk.images,
                        "token_len": chunk.token_len,
                        "active": false,
                    },
                })
            })
            .collect();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;
        self.ensure_success(response).await?;
        tracing::debug!(
            collection = %self.collection,
            document = %document_id,
            points = point_count,
            "Chunks indexed"
        );
        Ok(())
    }

    async fn set_document_active(
        &self,
        document_id: DocumentId,
        active: bool,
    ) -> Result<(), IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/payload", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({
                "payload": { "active": active },
                "filter": document_filter(document_id),
            }))
            .send()
            .await?;
        self.ensure_success(response).await
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError> {
        let count = self.count_by_document(document_id).await?;

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": document_filter(document_id) }))
            .send()
            .await?;
        self.ensure_success(response).await?;
        tracing::debug!(
            collection = %self.collection,
            document = %document_id,
            points = count,
            "Chunks deleted"
        );
        Ok(count)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        active_only: bool,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let mut body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
        });
        if active_only
            && let Some(object) = body.as_object_mut()
        {
            object.insert(
                "filter".into(),
                json!({
                    "must": [
                        { "key": "active", "match": { "value": true } }
                    ]
                }),
            );
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut hits = points
            .into_iter()
            .map(scored_chunk_from_point)
            .collect::<Result<Vec<_>, _>>()?;

        // Qdrant orders by score alone; re-sort for the ascending-id tie-break.
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

fn scored_chunk_from_point(point: QueryPoint) -> Result<ScoredChunk, IndexError> {
    let payload = point
        .payload
        .ok_or_else(|| IndexError::MalformedPayload("point without payload".into()))?;

    let field = |name: &str| -> Result<Value, IndexError> {
        payload
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::MalformedPayload(format!("missing field '{name}'")))
    };

    let document_id: DocumentId = field("document_id")?
        .as_str()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| IndexError::MalformedPayload("invalid document_id".into()))?;

    let images = match payload.get("images") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    Ok(ScoredChunk {
        id: field("chunk_id")?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| IndexError::MalformedPayload("invalid chunk_id".into()))?,
        document_id,
        document: field("document")?
            .as_str()
            .map(str::to_string)
            .unwrap_or_default(),
        ordinal: field("ordinal")?.as_u64().unwrap_or(0) as usize,
        text: field("text")?
            .as_str()
            .map(str::to_string)
            .unwrap_or_default(),
        page: field("page")?.as_u64().unwrap_or(0) as u32,
        images,
        token_len: payload
            .get("token_len")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        score: point.score,
    })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}
