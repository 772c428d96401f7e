//! Counting and caching core for the generalized language modeling
//! toolkit: turns a tokenised corpus into sharded, chunked n-gram stores
//! and serves them back through hash-map and completion-trie caches.

pub mod aggregator;
pub mod argmax;
pub mod cache;
pub mod driver;
pub mod error;
pub mod index;
pub mod markers;
pub mod pattern;
pub mod querycache;
pub mod sequencer;
pub mod store;

pub use error::{GlamtkError, Result};
pub use index::WordIndex;
pub use pattern::{Pattern, PatternElem, Token};
pub use store::{CorpusStats, CountRecord, PatternStore};
