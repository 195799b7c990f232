//! Cross-video knowledge base.
//!
//! Every concept extracted from an analysis becomes (or bumps) a knowledge card
//! keyed by its exact name. Cards are never deleted; their importance score is
//! recomputed on every mutation.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::WorkflowError,
    store::{CardQuery, KnowledgeStore},
    types::Concept,
};

const MAX_FREQUENCY_POINTS: u32 = 70;
const RELATED_VIDEOS_BONUS: u32 = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    CommonIdea,
    MisunderstoodTopic,
    HighValueInsight,
    #[default]
    General,
}

impl Category {
    pub fn bonus(&self) -> u32 {
        match self {
            Category::HighValueInsight => 15,
            Category::MisunderstoodTopic => 10,
            Category::CommonIdea | Category::General => 0,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::CommonIdea => "common_idea",
            Category::MisunderstoodTopic => "misunderstood_topic",
            Category::HighValueInsight => "high_value_insight",
            Category::General => "general",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedVideo {
    pub analysis_id: Uuid,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeCard {
    pub concept: String,
    pub category: Category,
    pub description: String,
    pub frequency: u32,
    pub related_videos: Vec<RelatedVideo>,
    pub importance_score: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub common_misconceptions: Vec<String>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
}

/// `min(frequency * 10, 70) + 15 if seen in any video + category bonus`, clamped to 0..=100.
pub fn importance_score(frequency: u32, has_related_videos: bool, category: Category) -> u32 {
    let frequency_points = frequency.saturating_mul(10).min(MAX_FREQUENCY_POINTS);
    let related_points = if has_related_videos {
        RELATED_VIDEOS_BONUS
    } else {
        0
    };
    (frequency_points + related_points + category.bonus()).min(100)
}

impl KnowledgeCard {
    /// Card for a concept seen for the first time.
    pub fn first_sighting(concept: &str, analysis_id: Uuid, context: &str) -> Self {
        let mut card = Self {
            concept: concept.to_string(),
            category: Category::General,
            description: context.to_string(),
            frequency: 1,
            related_videos: vec![RelatedVideo {
                analysis_id,
                context: context.to_string(),
                timestamp: Utc::now(),
            }],
            importance_score: 0,
            tags: Vec::new(),
            examples: Vec::new(),
            common_misconceptions: Vec::new(),
            related_concepts: Vec::new(),
        };
        card.recompute_score();
        card
    }

    /// The same concept turned up in another analysis.
    pub fn sighted(mut self, analysis_id: Uuid, context: &str) -> Self {
        self.frequency += 1;
        self.related_videos.push(RelatedVideo {
            analysis_id,
            context: context.to_string(),
            timestamp: Utc::now(),
        });
        self.recompute_score();
        self
    }

    pub fn recompute_score(&mut self) {
        self.importance_score = importance_score(
            self.frequency,
            !self.related_videos.is_empty(),
            self.category,
        );
    }
}

/// Folds per-video concepts into the shared card collection.
pub struct KnowledgeAggregator {
    store: Arc<dyn KnowledgeStore>,
    query: CardQuery,
}

impl KnowledgeAggregator {
    pub fn new(store: Arc<dyn KnowledgeStore>, min_frequency: u32, limit: usize) -> Self {
        Self {
            store,
            query: CardQuery {
                min_frequency,
                limit,
            },
        }
    }

    /// Record every concept, then return the current popular cards.
    ///
    /// A failed card write is logged and skipped. Only the final popular-cards
    /// query can fail the call.
    pub async fn aggregate(
        &self,
        analysis_id: Uuid,
        concepts: &[Concept],
    ) -> Result<Vec<KnowledgeCard>, WorkflowError> {
        for concept in concepts {
            if concept.name.trim().is_empty() {
                tracing::debug!(%analysis_id, "Skipping concept with empty name");
                continue;
            }

            let context = concept.context.as_str();
            let result = self
                .store
                .upsert(&concept.name, &|existing: Option<KnowledgeCard>| match existing {
                    Some(card) => card.sighted(analysis_id, context),
                    None => KnowledgeCard::first_sighting(&concept.name, analysis_id, context),
                })
                .await;

            match result {
                Ok(card) => tracing::debug!(
                    concept = %card.concept,
                    frequency = card.frequency,
                    score = card.importance_score,
                    "Knowledge card updated"
                ),
                Err(e) => tracing::warn!(
                    concept = %concept.name,
                    error = %e,
                    "Failed to update knowledge card, skipping"
                ),
            }
        }

        self.store
            .find(&self.query)
            .await
            .map_err(|e| WorkflowError::Aggregation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::StoreError,
        store::{CardMutator, JsonStore},
    };

    /// Fails writes for one concept and, when asked, every popular-card query.
    struct BrokenCards {
        inner: JsonStore,
        unwritable: &'static str,
        fail_find: bool,
    }

    #[async_trait]
    impl KnowledgeStore for BrokenCards {
        async fn find(&self, query: &CardQuery) -> Result<Vec<KnowledgeCard>, StoreError> {
            if self.fail_find {
                return Err(StoreError::Io(std::io::Error::other("cards file is corrupt")));
            }
            self.inner.find(query).await
        }

        async fn get(&self, concept: &str) -> Result<Option<KnowledgeCard>, StoreError> {
            self.inner.get(concept).await
        }

        async fn upsert(
            &self,
            concept: &str,
            mutate: CardMutator<'_>,
        ) -> Result<KnowledgeCard, StoreError> {
            if concept == self.unwritable {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.upsert(concept, mutate).await
        }
    }

    fn concept(name: &str) -> Concept {
        Concept {
            name: name.to_string(),
            frequency: 1,
            context: format!("{name} in context"),
        }
    }

    fn aggregator(store: Arc<JsonStore>) -> KnowledgeAggregator {
        KnowledgeAggregator::new(store, 3, 10)
    }

    #[test]
    fn test_score_formula() {
        assert_eq!(importance_score(1, true, Category::General), 25);
        assert_eq!(importance_score(3, true, Category::General), 45);
        assert_eq!(importance_score(5, true, Category::HighValueInsight), 80);
        assert_eq!(importance_score(2, false, Category::MisunderstoodTopic), 30);
        // frequency contribution caps at 70
        assert_eq!(importance_score(50, true, Category::HighValueInsight), 100);
        assert_eq!(importance_score(0, false, Category::General), 0);
    }

    #[test]
    fn test_first_sighting_defaults() {
        let id = Uuid::new_v4();
        let card = KnowledgeCard::first_sighting("Recursion", id, "calls itself");
        assert_eq!(card.frequency, 1);
        assert_eq!(card.category, Category::General);
        assert_eq!(card.related_videos.len(), 1);
        assert_eq!(card.related_videos[0].analysis_id, id);
        assert_eq!(card.importance_score, 25);
    }

    #[tokio::test]
    async fn test_recursion_becomes_popular_on_third_sighting() {
        let store = Arc::new(JsonStore::in_memory());
        let aggregator = aggregator(store.clone());

        let popular = aggregator
            .aggregate(Uuid::new_v4(), &[concept("Recursion")])
            .await
            .unwrap();
        assert!(popular.is_empty());

        let popular = aggregator
            .aggregate(Uuid::new_v4(), &[concept("Recursion")])
            .await
            .unwrap();
        assert!(popular.is_empty());

        let popular = aggregator
            .aggregate(Uuid::new_v4(), &[concept("Recursion")])
            .await
            .unwrap();
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].concept, "Recursion");
        assert_eq!(popular[0].frequency, 3);
        assert_eq!(popular[0].importance_score, 45);
        assert_eq!(popular[0].related_videos.len(), 3);
    }

    #[tokio::test]
    async fn test_concept_names_match_exactly() {
        let store = Arc::new(JsonStore::in_memory());
        let aggregator = aggregator(store.clone());

        aggregator
            .aggregate(Uuid::new_v4(), &[concept("Recursion"), concept("recursion")])
            .await
            .unwrap();

        assert_eq!(store.get("Recursion").await.unwrap().unwrap().frequency, 1);
        assert_eq!(store.get("recursion").await.unwrap().unwrap().frequency, 1);
    }

    #[tokio::test]
    async fn test_infrequent_concepts_never_popular() {
        let store = Arc::new(JsonStore::in_memory());
        let aggregator = aggregator(store.clone());

        for _ in 0..2 {
            aggregator
                .aggregate(Uuid::new_v4(), &[concept("Closures"), concept("Ownership")])
                .await
                .unwrap();
        }
        for _ in 0..3 {
            aggregator
                .aggregate(Uuid::new_v4(), &[concept("Borrowing")])
                .await
                .unwrap();
        }

        let popular = aggregator.aggregate(Uuid::new_v4(), &[]).await.unwrap();
        assert_eq!(popular.len(), 1);
        assert!(popular.iter().all(|c| c.frequency >= 3));
    }

    #[tokio::test]
    async fn test_aggregation_is_deterministic() {
        let first = Arc::new(JsonStore::in_memory());
        let second = Arc::new(JsonStore::in_memory());
        let id = Uuid::new_v4();

        aggregator(first.clone())
            .aggregate(id, &[concept("Traits")])
            .await
            .unwrap();
        aggregator(second.clone())
            .aggregate(id, &[concept("Traits")])
            .await
            .unwrap();

        let a = first.get("Traits").await.unwrap().unwrap();
        let b = second.get("Traits").await.unwrap().unwrap();
        assert_eq!(a.importance_score, b.importance_score);
        assert_eq!(a.frequency, b.frequency);
    }

    #[tokio::test]
    async fn test_concurrent_sightings_lose_no_updates() {
        let store = Arc::new(JsonStore::in_memory());
        let aggregator = Arc::new(aggregator(store.clone()));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                tokio::spawn(async move {
                    aggregator
                        .aggregate(Uuid::new_v4(), &[concept("Async")])
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let card = store.get("Async").await.unwrap().unwrap();
        assert_eq!(card.frequency, 20);
        assert_eq!(card.related_videos.len(), 20);
        assert_eq!(card.importance_score, 85);
    }

    #[tokio::test]
    async fn test_blank_names_are_skipped() {
        let store = Arc::new(JsonStore::in_memory());
        aggregator(store.clone())
            .aggregate(Uuid::new_v4(), &[concept("  ")])
            .await
            .unwrap();
        assert!(store.get("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_card_write_skips_only_that_concept() {
        let store = Arc::new(BrokenCards {
            inner: JsonStore::in_memory(),
            unwritable: "Closures",
            fail_find: false,
        });
        let aggregator = KnowledgeAggregator::new(store.clone(), 1, 10);

        let popular = aggregator
            .aggregate(
                Uuid::new_v4(),
                &[concept("Ownership"), concept("Closures"), concept("Lifetimes")],
            )
            .await
            .unwrap();

        let names: Vec<&str> = popular.iter().map(|c| c.concept.as_str()).collect();
        assert_eq!(names, vec!["Lifetimes", "Ownership"]);
        assert!(store.get("Closures").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_popular_query_is_an_aggregation_error() {
        let store = Arc::new(BrokenCards {
            inner: JsonStore::in_memory(),
            unwritable: "",
            fail_find: true,
        });
        let err = KnowledgeAggregator::new(store.clone(), 1, 10)
            .aggregate(Uuid::new_v4(), &[concept("Ownership")])
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Aggregation(ref m) if m.contains("cards file is corrupt")));
        // the sighting itself was still recorded
        assert_eq!(store.get("Ownership").await.unwrap().unwrap().frequency, 1);
    }
}
