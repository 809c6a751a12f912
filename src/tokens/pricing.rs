//! Model pricing and cost estimation.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token prices for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".into()
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_per_million: input,
            output_per_million: output,
            currency: default_currency(),
        }
    }

    /// `(input * price_in + output * price_out) / 1e6`
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }

    /// Blended unit cost used to order backends for the `cheapest` strategy.
    pub fn unit_cost(&self) -> f64 {
        self.input_per_million + self.output_per_million
    }
}

/// Rate applied to models missing from the table. Unknown models sort after
/// most built-in ones under `cheapest`.
pub const DEFAULT_INPUT_PER_MILLION: f64 = 10.0;
pub const DEFAULT_OUTPUT_PER_MILLION: f64 = 30.0;

static BUILTIN_PRICES: Lazy<Vec<ModelPricing>> = Lazy::new(|| {
    vec![
        ModelPricing::new("gpt-4o-mini", 0.15, 0.60),
        ModelPricing::new("gpt-4o", 2.50, 10.00),
        ModelPricing::new("gpt-4-turbo", 10.00, 30.00),
        ModelPricing::new("gpt-4", 30.00, 60.00),
        ModelPricing::new("gpt-3.5-turbo", 0.50, 1.50),
        ModelPricing::new("o1-mini", 3.00, 12.00),
        ModelPricing::new("o1", 15.00, 60.00),
        ModelPricing::new("claude-3-5-sonnet", 3.00, 15.00),
        ModelPricing::new("claude-3-5-haiku", 0.80, 4.00),
        ModelPricing::new("claude-3-opus", 15.00, 75.00),
        ModelPricing::new("claude-3-haiku", 0.25, 1.25),
        ModelPricing::new("gemini-1.5-pro", 1.25, 5.00),
        ModelPricing::new("gemini-1.5-flash", 0.075, 0.30),
        ModelPricing::new("llama-3.1-70b", 0.59, 0.79),
        ModelPricing::new("llama-3.1-8b", 0.05, 0.08),
        ModelPricing::new("mixtral-8x7b", 0.24, 0.24),
        ModelPricing::new("deepseek-chat", 0.14, 0.28),
    ]
});

/// Static model → price table with a conservative fallback.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Table preloaded with the built-in prices.
    pub fn builtin() -> Self {
        let entries = BUILTIN_PRICES
            .iter()
            .map(|p| (p.model.clone(), p.clone()))
            .collect();
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace a price; model ids are matched lowercase.
    pub fn with_price(mut self, pricing: ModelPricing) -> Self {
        let mut pricing = pricing;
        pricing.model = pricing.model.to_lowercase();
        self.entries.insert(pricing.model.clone(), pricing);
        self
    }

    /// Exact id first, then the longest table id contained in `model`
    /// (so `gpt-4o-mini-2024-07-18` resolves to `gpt-4o-mini`, not `gpt-4o`).
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        let m = model.to_lowercase();
        if let Some(p) = self.entries.get(&m) {
            return Some(p);
        }
        self.entries
            .iter()
            .filter(|(id, _)| m.contains(id.as_str()))
            .max_by_key(|(id, _)| id.len())
            .map(|(_, p)| p)
    }

    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.lookup(model) {
            Some(p) => p.cost(input_tokens, output_tokens),
            None => (input_tokens as f64 * DEFAULT_INPUT_PER_MILLION
                + output_tokens as f64 * DEFAULT_OUTPUT_PER_MILLION)
                / 1_000_000.0,
        }
    }

    pub fn unit_cost(&self, model: &str) -> f64 {
        self.lookup(model)
            .map(|p| p.unit_cost())
            .unwrap_or(DEFAULT_INPUT_PER_MILLION + DEFAULT_OUTPUT_PER_MILLION)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}
