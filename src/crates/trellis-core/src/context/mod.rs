//! Context-window management: token counting and history compaction.

pub mod compactor;
pub mod token_counter;

pub use compactor::{
    compact_if_needed, truncate_to_threshold, CompactionConfig, CompactionReport,
    CompactionStrategy, CustomCompactor,
};
pub use token_counter::{
    build_summarization_prompt, count_messages, split_messages_for_compaction, CharTokenCounter,
    CompactionSplit, TokenCounter, DEFAULT_CONTEXT_LIMIT, DEFAULT_SUMMARIZE_PROMPT,
};
