//! Conversation memory and issue similarity index for Ticketline.
//!
//! - [`ConversationStore`]: bounded, per-session turn history kept in process.
//! - [`VectorIndex`]: pre-computed issue embeddings searched by cosine
//!   similarity, built offline by [`IndexBuilder`].

pub mod conversation;
pub mod embedding;
pub mod index;
pub mod types;

pub use conversation::ConversationStore;
pub use embedding::{build_embedder, Embedder, HttpEmbedder};
#[cfg(feature = "local-embeddings")]
pub use embedding::FastEmbedder;
pub use index::{cosine_similarity, IndexBuilder, IndexFile, VectorIndex};
pub use types::{
    IndexConfig, IndexDocument, IndexStats, IndexedRecord, MemoryConfig, ScoredRecord,
    SessionInfo, SimilarityOutcome,
};
