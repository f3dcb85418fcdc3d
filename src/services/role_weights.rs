//! Role-category weight calculation.
//!
//! `weight = base_weight + Σ(tag matched ? modifier : 0)` per category.
//! Matching is bidirectional substring containment against a keyword set
//! built from tokenized brief fragments plus the raw input, so multi
//! character Chinese keywords survive tokenization.

use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::weights::WeightsConfig;
use crate::domain::models::requirements::StructuredRequirements;
use crate::domain::models::role::BaseType;

pub struct RoleWeightCalculator {
    config: WeightsConfig,
}

impl RoleWeightCalculator {
    pub fn new(config: WeightsConfig) -> Self {
        Self { config }
    }

    /// Compute one weight per base type from the brief and the raw input.
    pub fn compute(
        &self,
        brief: &StructuredRequirements,
        raw_input: &str,
    ) -> BTreeMap<BaseType, f64> {
        let corpus = build_corpus(brief, raw_input);

        let mut weights = BTreeMap::new();
        for base in BaseType::all() {
            let mut weight = self
                .config
                .base_weights
                .get(base.as_str())
                .copied()
                .unwrap_or(1.0);

            for tag in &self.config.tags {
                if !tag_matches(&tag.keywords, &corpus) {
                    continue;
                }
                if let Some(modifier) = tag.modifiers.get(base.as_str()) {
                    debug!(tag = %tag.name, category = %base, modifier, "weight tag matched");
                    weight += modifier;
                }
            }
            weights.insert(*base, weight);
        }
        weights
    }
}

/// Keyword corpus: tokenized fragments plus the full raw input text.
fn build_corpus(brief: &StructuredRequirements, raw_input: &str) -> Vec<String> {
    let mut corpus = Vec::new();

    let mut push_text = |text: &str| {
        for fragment in text.split(|c: char| c.is_whitespace() || "，。、；：,.;:!?！？".contains(c))
        {
            if fragment.chars().count() >= 2 {
                corpus.push(fragment.to_string());
            }
        }
    };

    push_text(raw_input);
    push_text(&brief.project_task);
    push_text(&brief.project_type);
    push_text(&brief.design_challenge);
    push_text(&brief.core_tension);
    for objective in &brief.core_objectives {
        push_text(objective);
    }
    for constraint in &brief.resource_constraints {
        push_text(constraint);
    }

    // Raw input as one entry so long keywords can match as substrings of
    // the whole text regardless of tokenization.
    corpus.push(raw_input.to_string());
    corpus
}

fn tag_matches(keywords: &[String], corpus: &[String]) -> bool {
    keywords.iter().any(|keyword| {
        corpus
            .iter()
            .any(|fragment| fragment.contains(keyword.as_str()) || keyword.contains(fragment.as_str()))
    })
}
