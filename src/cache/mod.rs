//! Two-tier result cache
//!
//! L0 (`intent`) matches requests by a fingerprint of their core entities.
//! L1 (`semantic`) matches normalized briefs by embedding distance and owns
//! the report artifacts.

pub mod artifacts;
pub mod intent;
pub mod key;
pub mod kv;
pub mod semantic;
pub mod vector;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use intent::{IntentCache, IntentEntities, IntentKey};
pub use key::CacheKey;
pub use kv::{build_kv_store, InMemoryKvStore, KvStore, PgKvStore};
pub use semantic::{PutOutcome, SemanticCache, SemanticHit};
pub use vector::{InMemoryVectorIndex, Neighbor, VectorIndex};
