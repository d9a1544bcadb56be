//! Query planning: intent classification, entity recognition, strategy weighting

use crate::bm25::{is_stopword, tokenize};
use crate::config::PlannerConfig;
use crate::error::Result;
use crate::extraction::NerClient;
use crate::graph::GraphStore;
use crate::llm::LlmClient;
use crate::types::{
    normalize_name, Complexity, QueryEntity, QueryIntent, QueryPlan, ReasoningMode,
    StrategyComponent, StrategyKind,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

struct IntentRule {
    intent: QueryIntent,
    pattern: Regex,
    strong: bool,
}

static INTENT_RULES: LazyLock<Vec<IntentRule>> = LazyLock::new(|| {
    vec![
        IntentRule {
            intent: QueryIntent::Comparative,
            pattern: Regex::new(r"(?i)\b(compare|versus|vs\.?|difference between|differences?|similarities)\b")
                .unwrap(),
            strong: true,
        },
        IntentRule {
            intent: QueryIntent::Causal,
            pattern: Regex::new(
                r"(?i)\b(why|cause[sd]?|because|reason for|lead[s]? to|result[s]? in|effect[s]? of)\b",
            )
            .unwrap(),
            strong: true,
        },
        IntentRule {
            intent: QueryIntent::Procedural,
            pattern: Regex::new(r"(?i)\b(how (?:do|to|can|should)|steps?|procedure|instructions|guide)\b")
                .unwrap(),
            strong: true,
        },
        IntentRule {
            intent: QueryIntent::Temporal,
            pattern: Regex::new(r"(?i)\b(when|before|after|during|timeline|history of|since)\b")
                .unwrap(),
            strong: true,
        },
        IntentRule {
            intent: QueryIntent::Analytical,
            pattern: Regex::new(r"(?i)\b(analy[sz]e|impact|implication[s]?|relationship between|pattern[s]?|trend[s]?)\b")
                .unwrap(),
            strong: true,
        },
        IntentRule {
            intent: QueryIntent::Factual,
            pattern: Regex::new(r"(?i)\b(what|where|who|which|define|list)\b").unwrap(),
            strong: false,
        },
    ]
});

/// Comparand capture for "compare X and Y" / "X vs Y" phrasings
static COMPARE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:compare|difference between)\s+(.+?)\s+(?:and|with|to)\s+(.+?)(?:[.?!]|$)")
        .unwrap()
});
static VERSUS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(.+?)\s+(?:vs\.?|versus)\s+(.+?)(?:[.?!]|$)").unwrap());

/// Per-intent strategy weights (vector, graph, keyword) and reasoning mode
fn strategy_table(intent: QueryIntent) -> ([f32; 3], ReasoningMode) {
    match intent {
        QueryIntent::Factual => ([0.6, 0.25, 0.15], ReasoningMode::None),
        QueryIntent::Comparative => ([0.35, 0.45, 0.20], ReasoningMode::Comparative),
        QueryIntent::Causal => ([0.25, 0.55, 0.20], ReasoningMode::Causal),
        QueryIntent::Analytical => ([0.50, 0.35, 0.15], ReasoningMode::MultiHop),
        QueryIntent::Temporal => ([0.40, 0.40, 0.20], ReasoningMode::MultiHop),
        QueryIntent::Procedural => ([0.55, 0.25, 0.20], ReasoningMode::None),
    }
}

/// Query planner: pure read-side classification and strategy selection
pub struct QueryPlanner {
    config: PlannerConfig,
    ner: Arc<dyn NerClient>,
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmClient>,
}

impl QueryPlanner {
    pub fn new(
        config: PlannerConfig,
        ner: Arc<dyn NerClient>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            ner,
            graph,
            llm,
        }
    }

    /// Build a retrieval plan for a query. Pure apart from cache-friendly
    /// store reads.
    pub async fn plan(&self, query: &str) -> Result<QueryPlan> {
        if query.trim().is_empty() {
            return Err(crate::error::EngineError::InvalidInput(
                "empty query".to_string(),
            ));
        }

        let (mut intent, mut confidence, patterns_matched) = classify_by_rules(query);

        // LLM fallback only when the rules are unsure and a collaborator exists
        if confidence < self.config.rule_confidence_floor && self.llm.is_available() {
            match self.llm.classify_intent(query).await {
                Ok(llm_intent) => {
                    intent = llm_intent;
                    confidence = 0.75;
                }
                Err(e) => {
                    warn!("llm intent classification unavailable: {}", e);
                }
            }
        }

        let entities = self.recognize_entities(query).await;
        let known: usize = entities.iter().filter(|e| e.is_known()).count();

        let (mut weights, reasoning) = strategy_table(intent);

        if known >= 2 {
            // Well-connected queries lean on the graph
            let shift = weights[0].min(0.1);
            weights[0] -= shift;
            weights[1] += shift;
        } else if known == 0 {
            weights[1] = 0.0;
        }
        let total: f32 = weights.iter().sum();
        if total > 0.0 {
            for w in &mut weights {
                *w /= total;
            }
        }

        let components: Vec<StrategyComponent> = [
            (StrategyKind::Vector, weights[0]),
            (StrategyKind::Graph, weights[1]),
            (StrategyKind::Keyword, weights[2]),
        ]
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|(kind, weight)| StrategyComponent { kind, weight })
        .collect();

        let multi_hop_causal =
            reasoning == ReasoningMode::MultiHop && intent_matches(query, QueryIntent::Causal);
        let complexity = if known >= 3 || multi_hop_causal {
            Complexity::High
        } else if (1..=2).contains(&known) || patterns_matched >= 2 {
            Complexity::Medium
        } else {
            Complexity::Low
        };
        let max_hops = match complexity {
            Complexity::Low => 1,
            Complexity::Medium => 2,
            Complexity::High => 3,
        };

        let plan = QueryPlan {
            intent,
            complexity,
            entities,
            components,
            reasoning,
            max_hops,
            confidence,
        };
        debug!(
            "planned {:?} (complexity {:?}, {} known entities, confidence {:.2})",
            plan.intent, plan.complexity, known, plan.confidence
        );
        Ok(plan)
    }

    /// NER spans plus noun-phrase candidates, deduplicated and resolved
    /// against the knowledge-graph entity index
    async fn recognize_entities(&self, query: &str) -> Vec<QueryEntity> {
        // (candidate, keep even when the graph does not know it)
        let mut candidates: Vec<(String, bool)> = Vec::new();

        match self.ner.extract_entities(query).await {
            Ok(spans) => candidates.extend(spans.into_iter().map(|s| (s.text, true))),
            Err(e) => warn!("query ner unavailable: {}", e),
        }

        // Comparand capture promotes lowercase noun phrases
        for pattern in [&*COMPARE_PATTERN, &*VERSUS_PATTERN] {
            if let Some(captures) = pattern.captures(query) {
                for idx in 1..=2 {
                    if let Some(m) = captures.get(idx) {
                        candidates.push((trim_noun_phrase(m.as_str()), true));
                    }
                }
            }
        }

        // Content-word n-grams catch lowercase graph entities ("lung
        // cancer"); they only count when the graph confirms them
        let words: Vec<String> = tokenize(query);
        for size in (1..=3).rev() {
            for window in words.windows(size) {
                candidates.push((window.join(" "), false));
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut entities: Vec<QueryEntity> = Vec::new();
        for (candidate, keep_unresolved) in candidates {
            let trimmed = candidate.trim().to_string();
            if trimmed.is_empty() || is_stopword(&trimmed.to_lowercase()) {
                continue;
            }
            let normalized = normalize_name(&trimmed);
            if normalized.is_empty() || !seen.insert(normalized.clone()) {
                continue;
            }

            let resolved = self
                .graph
                .resolve_entity(&trimmed, self.config.known_entity_fuzzy)
                .await
                .ok()
                .flatten();
            match resolved {
                Some(entity) => {
                    // Skip n-gram shadows of an already-known entity
                    if entities.iter().any(|e| e.entity_id == Some(entity.id)) {
                        continue;
                    }
                    entities.push(QueryEntity {
                        name: entity.name.clone(),
                        entity_id: Some(entity.id),
                    });
                }
                None if keep_unresolved => {
                    entities.push(QueryEntity {
                        name: trimmed,
                        entity_id: None,
                    });
                }
                None => {}
            }
        }
        entities
    }
}

fn trim_noun_phrase(phrase: &str) -> String {
    phrase
        .trim()
        .trim_start_matches("the ")
        .trim_start_matches("a ")
        .trim_start_matches("an ")
        .trim()
        .to_string()
}

fn intent_matches(query: &str, intent: QueryIntent) -> bool {
    INTENT_RULES
        .iter()
        .any(|rule| rule.intent == intent && rule.pattern.is_match(query))
}

/// Rule-first classification: returns (intent, confidence, patterns matched)
fn classify_by_rules(query: &str) -> (QueryIntent, f32, usize) {
    let mut matched: Vec<&IntentRule> = INTENT_RULES
        .iter()
        .filter(|rule| rule.pattern.is_match(query))
        .collect();
    let patterns_matched = matched.len();

    // Strong rules win over the weak factual catch-all
    matched.sort_by_key(|rule| !rule.strong);
    match matched.first() {
        Some(rule) if rule.strong => (rule.intent, 0.85, patterns_matched),
        Some(rule) => (rule.intent, 0.65, patterns_matched),
        None => (QueryIntent::Factual, 0.5, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::RuleBasedNer;
    use crate::graph::InMemoryGraphStore;
    use crate::llm::DisabledLlm;
    use crate::types::{Entity, Mention};

    async fn planner_with_graph(entities: &[(&str, &str)]) -> QueryPlanner {
        let graph = Arc::new(InMemoryGraphStore::new());
        let mut batch = Vec::new();
        let mut mentions = Vec::new();
        for (i, (name, entity_type)) in entities.iter().enumerate() {
            let entity = Entity::new(name, entity_type, "general", 0.8);
            mentions.push(Mention {
                entity_id: entity.id,
                chunk_id: format!("seed:{}", i),
                offset_span: None,
            });
            batch.push(entity);
        }
        graph.upsert_entities(batch).await.unwrap();
        graph.add_mentions(mentions).await.unwrap();

        QueryPlanner::new(
            PlannerConfig::default(),
            Arc::new(RuleBasedNer::new()),
            graph,
            Arc::new(DisabledLlm),
        )
    }

    #[tokio::test]
    async fn test_comparative_intent_and_weights() {
        let planner = planner_with_graph(&[
            ("supervised learning", "concept"),
            ("unsupervised learning", "concept"),
        ])
        .await;
        let plan = planner
            .plan("Compare supervised learning and unsupervised learning")
            .await
            .unwrap();

        assert_eq!(plan.intent, QueryIntent::Comparative);
        assert_eq!(plan.reasoning, ReasoningMode::Comparative);

        let weight = |kind: StrategyKind| {
            plan.components
                .iter()
                .find(|c| c.kind == kind)
                .map(|c| c.weight)
                .unwrap_or(0.0)
        };
        // Two known entities shift weight toward the graph
        assert!(weight(StrategyKind::Graph) >= weight(StrategyKind::Vector));

        let names: Vec<&str> = plan.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"supervised learning"));
        assert!(names.contains(&"unsupervised learning"));
    }

    #[tokio::test]
    async fn test_weights_sum_to_one() {
        let planner = planner_with_graph(&[]).await;
        let plan = planner.plan("Where is Acme located?").await.unwrap();
        let total: f32 = plan.components.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_no_known_entities_zeroes_graph() {
        let planner = planner_with_graph(&[]).await;
        let plan = planner
            .plan("Why does the engine overheat?")
            .await
            .unwrap();
        assert_eq!(plan.intent, QueryIntent::Causal);
        assert!(plan
            .components
            .iter()
            .all(|c| c.kind != StrategyKind::Graph));
        let total: f32 = plan.components.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_lowercase_graph_entity_promoted_to_known() {
        let planner = planner_with_graph(&[("lung cancer", "disease")]).await;
        let plan = planner.plan("What causes lung cancer?").await.unwrap();
        assert_eq!(plan.intent, QueryIntent::Causal);
        assert!(plan.entities.iter().any(|e| e.is_known()));
    }

    #[tokio::test]
    async fn test_procedural_intent() {
        let planner = planner_with_graph(&[]).await;
        let plan = planner
            .plan("How to replace a brake pad step by step")
            .await
            .unwrap();
        assert_eq!(plan.intent, QueryIntent::Procedural);
        assert_eq!(plan.reasoning, ReasoningMode::None);
    }

    #[tokio::test]
    async fn test_plan_is_pure() {
        let planner = planner_with_graph(&[("Acme", "organization")]).await;
        let a = planner.plan("Where is Acme located?").await.unwrap();
        let b = planner.plan("Where is Acme located?").await.unwrap();
        assert_eq!(a.cache_hash(), b.cache_hash());
        assert_eq!(a.intent, b.intent);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let planner = planner_with_graph(&[]).await;
        assert!(planner.plan("  ").await.is_err());
    }

    #[test]
    fn test_classify_rules() {
        assert_eq!(
            classify_by_rules("Compare A and B").0,
            QueryIntent::Comparative
        );
        assert_eq!(classify_by_rules("Why is the sky blue?").0, QueryIntent::Causal);
        assert_eq!(
            classify_by_rules("When did it happen?").0,
            QueryIntent::Temporal
        );
        let (intent, confidence, _) = classify_by_rules("pelican migration");
        assert_eq!(intent, QueryIntent::Factual);
        assert!(confidence < 0.6);
    }
}
