use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::config::SCAN_PAGE_SIZE;
use crate::error::BackendError;
use crate::models::{ChunkMetadata, EmbeddingDocument, RetrievedChunk};
use crate::traits::DocumentIndex;

/// Document/vector store client speaking the Qdrant REST API. Upsert-only;
/// the vector is part of the first write, so no document ever exists
/// without one.
#[derive(Clone)]
pub struct QdrantDocumentStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantDocumentStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, BackendError> {
        Url::parse(endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    /// Probe the collection, create it when absent.
    pub async fn ensure_collection(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/collections/{}", self.endpoint, self.collection))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Request(format!(
                "collection setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn scroll_page(
        &self,
        filter: Option<Value>,
        limit: usize,
        cursor: Option<Value>,
    ) -> Result<(Vec<EmbeddingDocument>, Option<Value>), BackendError> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        if let Some(cursor) = cursor {
            body["offset"] = cursor;
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/scroll",
                self.endpoint, self.collection
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = parsed
            .pointer("/result/next_page_offset")
            .filter(|value| !value.is_null())
            .cloned();

        let documents = points.iter().filter_map(document_from_point).collect();
        Ok((documents, next))
    }

    fn batch_filter(batch_id: &str) -> Value {
        json!({
            "must": [
                {"key": "metadata.batch_id", "match": {"value": batch_id}}
            ]
        })
    }
}

#[async_trait]
impl DocumentIndex for QdrantDocumentStore {
    async fn upsert_documents(&self, documents: &[EmbeddingDocument]) -> Result<(), BackendError> {
        if documents.is_empty() {
            return Ok(());
        }

        let points = documents
            .iter()
            .map(|document| {
                if document.vector.len() != self.vector_size {
                    return Err(BackendError::Request(format!(
                        "embedding dimension {} != {}",
                        document.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": document.id,
                    "vector": document.vector,
                    "payload": {
                        "text": document.text,
                        "metadata": document.metadata,
                    },
                }))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<EmbeddingDocument>, BackendError> {
        let response = self
            .client
            .get(format!(
                "{}/collections/{}/points/{}",
                self.endpoint, self.collection, id
            ))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result")
            .and_then(document_from_point))
    }

    async fn batch_documents(
        &self,
        batch_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EmbeddingDocument>, BackendError> {
        // the scroll API pages by cursor, not numeric offset; fetch
        // offset + limit and skip client-side (linear in offset)
        let (documents, _) = self
            .scroll_page(Some(Self::batch_filter(batch_id)), offset + limit, None)
            .await?;

        Ok(documents.into_iter().skip(offset).take(limit).collect())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        if query_vector.len() != self.vector_size {
            return Err(BackendError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in &hits {
            let Some(metadata) = metadata_from_payload(hit.pointer("/payload")) else {
                continue;
            };
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit.pointer("/score").and_then(Value::as_f64);

            result.push(RetrievedChunk {
                text,
                metadata,
                score,
            });
        }

        Ok(result)
    }

    async fn scan_documents(&self) -> Result<Vec<EmbeddingDocument>, BackendError> {
        let mut documents = Vec::new();
        let mut cursor = None;

        loop {
            let (page, next) = self.scroll_page(None, SCAN_PAGE_SIZE, cursor).await?;
            documents.extend(page);
            match next {
                Some(offset) => cursor = Some(offset),
                None => break,
            }
        }

        Ok(documents)
    }

    async fn search_text(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<EmbeddingDocument>, BackendError> {
        let needle = term.to_lowercase();
        let matches = self
            .scan_documents()
            .await?
            .into_iter()
            .filter(|document| {
                let record = &document.metadata.record;
                [
                    record.item_desc.as_deref(),
                    record.vendor.as_deref(),
                    record.manufacturer.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect();

        Ok(matches)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/collections/{}", self.endpoint, self.collection))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::NotReady(format!(
                "collection {} answered {}",
                self.collection,
                response.status()
            )));
        }

        Ok(())
    }
}

fn document_from_point(point: &Value) -> Option<EmbeddingDocument> {
    let id = match point.pointer("/id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return None,
    };

    let metadata = metadata_from_payload(point.pointer("/payload"))?;
    let text = point
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let vector = point
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Some(EmbeddingDocument {
        id,
        vector,
        text,
        metadata,
    })
}

fn metadata_from_payload(payload: Option<&Value>) -> Option<ChunkMetadata> {
    payload
        .and_then(|value| value.get("metadata"))
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}
