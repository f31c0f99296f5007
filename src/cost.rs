use crate::error::CostError;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl Pricing {
    /// Cost in USD of one completion, rounded to 6 decimals.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let total = input_tokens as f64 / 1e6 * self.input_per_1m
            + output_tokens as f64 / 1e6 * self.output_per_1m;
        (total * 1e6).round() / 1e6
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4o";

const PRICING: &[(&str, Pricing)] = &[
    ("gpt-4", Pricing { input_per_1m: 30.0, output_per_1m: 60.0 }),
    ("gpt-4-turbo", Pricing { input_per_1m: 10.0, output_per_1m: 30.0 }),
    ("gpt-4o", Pricing { input_per_1m: 5.0, output_per_1m: 15.0 }),
    ("gpt-4o-mini", Pricing { input_per_1m: 0.15, output_per_1m: 0.6 }),
];

pub fn pricing_for(model: &str) -> Result<Pricing, CostError> {
    PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
        .ok_or_else(|| CostError::UnknownModel {
            model: model.to_string(),
            available: PRICING
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Cost of one completion priced by model name.
pub fn calculate_cost(input_tokens: u64, output_tokens: u64, model: &str) -> Result<f64, CostError> {
    Ok(pricing_for(model)?.cost(input_tokens, output_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_and_output_are_priced_separately() {
        assert_eq!(calculate_cost(1_000_000, 1_000_000, "gpt-4o").unwrap(), 20.0);
        assert_eq!(calculate_cost(1_000_000, 0, "gpt-4").unwrap(), 30.0);
        assert_eq!(calculate_cost(0, 1_000_000, "gpt-4").unwrap(), 60.0);
    }

    #[test]
    fn rounds_to_six_decimals() {
        // 1234 * 0.15e-6 + 567 * 0.6e-6 = 0.0001851 + 0.0003402
        assert_eq!(calculate_cost(1234, 567, "gpt-4o-mini").unwrap(), 0.000525);
        assert_eq!(calculate_cost(0, 0, "gpt-4-turbo").unwrap(), 0.0);
    }

    #[test]
    fn unknown_model_lists_available() {
        let err = calculate_cost(1, 1, "gpt-5").unwrap_err();
        assert_eq!(
            err.to_string(),
            "model 'gpt-5' not recognized. Available models: gpt-4, gpt-4-turbo, gpt-4o, gpt-4o-mini"
        );
    }
}
