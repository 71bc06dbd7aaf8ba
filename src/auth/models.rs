use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;

use crate::constants::{DEFAULT_COST_MODEL, MODEL_COSTS, REMAPPED_MODELS};

/// Per-token prices used for cost calculation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelPricing {
    pub input_cost_per_token: Decimal,
    pub output_cost_per_token: Decimal,
}

impl ModelPricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        Decimal::from(input_tokens) * self.input_cost_per_token
            + Decimal::from(output_tokens) * self.output_cost_per_token
    }
}

/// A requested model and the id it is forwarded as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// What the caller asked for; keys usage stats and is priced first
    pub external: String,
    /// What the backend receives
    pub upstream: String,
}

/// Static remap and pricing tables
pub struct ModelCatalog {
    remap: HashMap<String, String>,
    pricing: HashMap<String, ModelPricing>,
    external_ids: Vec<String>,
}

impl ModelCatalog {
    pub fn new(provider_prefix: &str) -> Self {
        let remap = REMAPPED_MODELS
            .iter()
            .map(|id| (id.to_string(), format!("{provider_prefix}{id}")))
            .collect();

        let mut pricing = HashMap::new();
        for (id, input, output) in MODEL_COSTS {
            let (Ok(input), Ok(output)) = (input.parse::<Decimal>(), output.parse::<Decimal>())
            else {
                warn!("Skipping unparseable pricing for {id}");
                continue;
            };
            pricing.insert(
                id.replace("{p}", provider_prefix),
                ModelPricing {
                    input_cost_per_token: input,
                    output_cost_per_token: output,
                },
            );
        }

        let mut external_ids: Vec<String> = REMAPPED_MODELS.iter().map(|s| s.to_string()).collect();
        external_ids.extend(
            MODEL_COSTS
                .iter()
                .map(|(id, _, _)| *id)
                .filter(|id| !id.contains("{p}") && *id != DEFAULT_COST_MODEL)
                .map(str::to_string),
        );

        Self {
            remap,
            pricing,
            external_ids,
        }
    }

    /// Resolve the upstream id for a requested model; unknown ids pass through
    pub fn route(&self, model: &str) -> ModelRoute {
        ModelRoute {
            external: model.to_string(),
            upstream: self
                .remap
                .get(model)
                .cloned()
                .unwrap_or_else(|| model.to_string()),
        }
    }

    /// Prices by external id, then upstream id, then the default entry
    pub fn pricing(&self, route: &ModelRoute) -> ModelPricing {
        self.pricing
            .get(&route.external)
            .or_else(|| self.pricing.get(&route.upstream))
            .or_else(|| self.pricing.get(DEFAULT_COST_MODEL))
            .cloned()
            .unwrap_or_default()
    }

    /// Model ids callers may request, for `/v1/api/models`
    pub fn external_ids(&self) -> &[String] {
        &self.external_ids
    }
}
