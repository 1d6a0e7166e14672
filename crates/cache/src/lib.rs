//! Context assembly and compaction: turns+steps of a `Trace` incrementally
//! assembled into an LLM message window (`ao_domain::aggregate::RuntimeContext`),
//! with token estimation/calibration and two-tier compaction.

pub mod compaction;
pub mod manager;
pub mod stable_json;
pub mod token_estimator;

pub use compaction::{finalize_turn_to_result_card, llm_assisted_compact, local_compact, should_compact};
pub use manager::CacheManager;
pub use stable_json::{stable_hash, to_stable_json};
