use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How many texts are sent to the embedder per call. A failed sub-batch is
/// skipped, not retried, so the window also bounds the blast radius of one
/// embedding failure.
pub const EMBED_SUB_BATCH: usize = 32;

/// How many documents are upserted per store call. Sub-batches are
/// independent network calls; one failing does not stop the rest.
pub const UPSERT_SUB_BATCH: usize = 64;

/// Page size used when scanning the document store.
pub const SCAN_PAGE_SIZE: usize = 256;

/// Years below this are treated as unparsed rather than trusted.
pub const MIN_YEAR: i32 = 1900;

/// Upper bound for the `limit` query parameter on paged read surfaces.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Closed set of retrieval strategies. Selected once by configuration,
/// never negotiated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Case-insensitive substring match on vendor/facility-type columns in
    /// the relational store. Row order, no ranking.
    Keyword,
    /// The document store's native distance operator.
    NativeVector,
    /// Full client-side cosine scan over every stored document. O(n) per
    /// query with no index; acceptable only at small scale.
    CosineScan,
}

impl FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "vector" | "native_vector" => Ok(Self::NativeVector),
            "scan" | "cosine_scan" => Ok(Self::CosineScan),
            other => Err(format!(
                "unknown retrieval strategy {other:?} (expected keyword, vector, or scan)"
            )),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword => write!(f, "keyword"),
            Self::NativeVector => write!(f, "vector"),
            Self::CosineScan => write!(f, "scan"),
        }
    }
}

/// Closed set of embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic local character-trigram embedder.
    Hashing,
    /// OpenAI-compatible embeddings endpoint.
    Remote,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hashing" | "local" => Ok(Self::Hashing),
            "remote" | "http" => Ok(Self::Remote),
            other => Err(format!(
                "unknown embedding provider {other:?} (expected hashing or remote)"
            )),
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashing => write!(f, "hashing"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EmbeddingProvider, RetrievalStrategy};

    #[test]
    fn strategies_parse_from_aliases() {
        assert_eq!(
            "keyword".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::Keyword
        );
        assert_eq!(
            "Vector".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::NativeVector
        );
        assert_eq!(
            "cosine_scan".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::CosineScan
        );
        assert!("hnsw".parse::<RetrievalStrategy>().is_err());
    }

    #[test]
    fn providers_parse_from_aliases() {
        assert_eq!(
            "local".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Hashing
        );
        assert_eq!(
            "remote".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Remote
        );
        assert!("onnx".parse::<EmbeddingProvider>().is_err());
    }
}
