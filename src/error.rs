//! Typed errors for the library surface.
//!
//! Construction-time problems are [`ConfigError`], iteration signals are
//! [`BatchError`], and file/vocabulary problems are [`DataError`]. The binary
//! wraps all of them in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid scheduler, model or decoding configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("maxi-batch size must be greater than zero")]
    ZeroMaxibatchSize,

    #[error("at least one corpus pool is required")]
    NoPools,

    #[error("batch size {batch_size} exceeds the corpus size ({corpus_size} instances)")]
    BatchLargerThanCorpus { batch_size: usize, corpus_size: usize },

    #[error("maxi-batch of {total} instances cannot be split evenly across {num_pools} pools")]
    IndivisibleShare { total: usize, num_pools: usize },

    #[error("pool {pool} holds {size} instances but must supply {share} per maxi-batch")]
    PoolTooSmall { pool: usize, size: usize, share: usize },

    #[error("field `{field}` has {len} instances, expected {expected}")]
    MisalignedField {
        field: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("pools disagree on which optional fields are present")]
    MixedShapes,

    #[error("{side}-language one-hot has width {found}, model expects {expected}")]
    LanguageWidth {
        side: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("beam width must be greater than zero")]
    ZeroBeamWidth,

    #[error("{found} start tokens supplied for a batch of {expected}")]
    StartTokens { expected: usize, found: usize },

    #[error("invalid model configuration: {0}")]
    Model(String),
}

/// Non-batch outcomes of [`crate::data::scheduler::BatchScheduler::next_batch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The epoch is exhausted; the scheduler has already reset its counter.
    #[error("end of epoch")]
    EpochDone,

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

/// Failures while loading vocabularies or corpus files.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse vocabulary {path}: {source}")]
    VocabFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("reserved token `{token}` must map to id {expected}, found {found:?}")]
    ReservedId {
        token: &'static str,
        expected: u32,
        found: Option<u32>,
    },

    #[error("vocabulary ids are not contiguous: id {0} is missing")]
    SparseIds(u32),

    #[error("parallel files differ in length: {left} vs {right} lines")]
    LineCountMismatch { left: usize, right: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages_name_the_offender() {
        let err = ConfigError::PoolTooSmall {
            pool: 1,
            size: 100,
            share: 640,
        };
        let msg = err.to_string();
        assert!(msg.contains("pool 1"));
        assert!(msg.contains("640"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;
        let err = DataError::io(
            "missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("missing.txt"));
        assert!(err.source().is_some());
    }
}
