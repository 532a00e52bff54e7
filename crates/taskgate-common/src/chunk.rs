use serde::{Deserialize, Serialize};

/// One bounded segment of a larger document. `index` fixes the reassembly
/// order regardless of completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// Number of bytes at the head of `text` copied from the tail of the
    /// previous chunk, always on a char boundary. Zero for the first chunk.
    pub overlap_with_previous: usize,
}

impl Chunk {
    /// The chunk text with the engineered overlap stripped; concatenating
    /// these across all chunks reproduces the source document.
    pub fn owned_text(&self) -> &str {
        &self.text[self.overlap_with_previous..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailureKind {
    Timeout,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ChunkResult {
    Success { content: String, tokens_used: u64 },
    Failed { error: String, kind: ChunkFailureKind },
}

/// Outcome of dispatching a single chunk, correlated back by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub outcome: ChunkResult,
}

impl ChunkOutcome {
    pub fn success(index: usize, content: String, tokens_used: u64) -> Self {
        Self {
            index,
            outcome: ChunkResult::Success { content, tokens_used },
        }
    }

    pub fn failure(index: usize, error: String, kind: ChunkFailureKind) -> Self {
        Self {
            index,
            outcome: ChunkResult::Failed { error, kind },
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ChunkResult::Success { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            ChunkResult::Success { content, .. } => Some(content),
            ChunkResult::Failed { .. } => None,
        }
    }

    pub fn tokens_used(&self) -> u64 {
        match &self.outcome {
            ChunkResult::Success { tokens_used, .. } => *tokens_used,
            ChunkResult::Failed { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ChunkResult::Success { .. } => None,
            ChunkResult::Failed { error, .. } => Some(error),
        }
    }
}
