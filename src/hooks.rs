//! External collaborators
//!
//! The engine never fetches or compresses data itself. Callers inject a
//! `Fetcher` for preload/warm-up and a `Compressor` for compression tasks.

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::PutOptions;
use crate::error::Result;

// == Fetcher ==
/// A value produced by the fetch collaborator, with optional write options.
#[derive(Debug, Clone)]
pub struct FetchedValue {
    pub payload: Value,
    pub options: PutOptions,
}

impl FetchedValue {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            options: PutOptions::default(),
        }
    }
}

/// Source of values for preload tasks and warm-up.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<FetchedValue>;
}

// == Compressor ==
/// Compression hook. Output is only accepted when it is no larger than the
/// input.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn name(&self) -> &str;
}

/// Leaves data untouched; compression tasks then free nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
