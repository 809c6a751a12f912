//! Token 估算与成本模型模块：按模型价格表计算调用成本与缓存节省。
//!
//! # Token Estimation and Cost Model Module
//!
//! Maps `(model, input tokens, output tokens)` to an estimated monetary cost,
//! and estimates token counts for cached payloads so cache hits can report
//! the spend they avoided.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token counting implementations |
//! | [`CharacterEstimator`] | Character-based approximation (4 chars ≈ 1 token) |
//! | [`PricingTable`] | Model → per-million-token prices with a conservative fallback |
//! | [`ModelPricing`] | Pricing information per model |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::tokens::{CharacterEstimator, PricingTable, TokenCounter};
//!
//! let counter = CharacterEstimator::new();
//! let tokens = counter.count("Hello, how are you?") as u64;
//!
//! let table = PricingTable::builtin();
//! let cost = table.cost("gpt-4o-mini", tokens, 100);
//! assert!(cost > 0.0);
//! assert_eq!(table.cost("gpt-4o-mini", 0, 0), 0.0);
//! ```

mod counter;
mod pricing;

pub use counter::{CharacterEstimator, TokenCounter};
pub use pricing::{
    ModelPricing, PricingTable, DEFAULT_INPUT_PER_MILLION,
    DEFAULT_OUTPUT_PER_MILLION,
};
