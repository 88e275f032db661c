//! Recommendation orchestration: load profile and candidates, score, rank
//! and hand a copy of the ranking to analytics.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cross::cross_calculator_suggestions;
use super::scoring::{ScoreCalculator, ScoringInput};
use super::types::*;
use crate::clock::SharedClock;
use crate::errors::{ApplicationError, DomainError};
use crate::profile::{analyze_user_behavior, ProductType, ProfileDraft, UserProfile, UserProfileStore};

/// Remote `bank_products` collection
#[async_trait]
pub trait BankProductSource: Send + Sync {
    async fn list_active(&self, product_type: ProductType) -> Result<Vec<BankProduct>, ApplicationError>;
}

/// Receives computed rankings for analytics
#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn record(
        &self,
        user_id: &str,
        context: &CalculationContext,
        results: &[RecommendationResult],
    ) -> Result<(), ApplicationError>;
}

pub struct RecommendationEngine {
    profiles: Arc<UserProfileStore>,
    products: Arc<dyn BankProductSource>,
    sink: Arc<dyn RecommendationSink>,
    calculator: ScoreCalculator,
    partner_banks: Vec<String>,
    clock: SharedClock,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl RecommendationEngine {
    pub fn new(
        profiles: Arc<UserProfileStore>,
        products: Arc<dyn BankProductSource>,
        sink: Arc<dyn RecommendationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            profiles,
            products,
            sink,
            calculator: ScoreCalculator::new(),
            partner_banks: Vec::new(),
            clock,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_calculator(mut self, calculator: ScoreCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Banks treated as partners regardless of the catalog flag.
    pub fn with_partner_banks(mut self, banks: Vec<String>) -> Self {
        self.partner_banks = banks;
        self
    }

    fn is_partner(&self, product: &BankProduct) -> bool {
        let bank_name = product.bank_name.to_lowercase();
        product.is_partner || self.partner_banks.iter().any(|bank| bank.to_lowercase() == bank_name)
    }

    /// Ranks active products of the type implied by the calculator. Users
    /// without a profile are scored against an empty one. Persisting the
    /// ranking runs in the background and never affects the result.
    pub async fn get_personalized_recommendations(
        &self,
        user_id: &str,
        context: &CalculationContext,
        limit: usize,
    ) -> Result<Vec<RecommendationResult>, ApplicationError> {
        let product_type = context
            .product_type()
            .ok_or_else(|| DomainError::UnknownCalculator(context.calculator_type.clone()))?;

        let profile = self.load_profile(user_id).await;
        let candidates = match self.products.list_active(product_type).await {
            Ok(products) => products,
            Err(error) => {
                warn!(
                    event_name = "recommendations.products.unavailable",
                    user_id,
                    error = %error,
                    "bank products unavailable"
                );
                return Ok(Vec::new());
            }
        };
        let results = self.rank(&profile, &candidates, product_type, context, limit);

        debug!(
            event_name = "recommendations.ranked",
            user_id,
            product_type = %product_type,
            candidates = candidates.len(),
            returned = results.len(),
            "recommendations ranked"
        );

        if !results.is_empty() {
            self.persist_in_background(user_id, context, &results);
        }
        Ok(results)
    }

    pub fn get_cross_calculator_suggestions(
        &self,
        results: &[RecommendationResult],
    ) -> Vec<CrossCalculatorSuggestion> {
        cross_calculator_suggestions(results)
    }

    /// Pairs the best product of every type the user has touched: the
    /// current calculator, declared interests and calculation history.
    /// Amount and term apply only to the current calculator's type. These
    /// rankings are not persisted.
    pub async fn get_cross_calculator_recommendations(
        &self,
        user_id: &str,
        context: &CalculationContext,
    ) -> Result<Vec<CrossCalculatorSuggestion>, ApplicationError> {
        let current = context
            .product_type()
            .ok_or_else(|| DomainError::UnknownCalculator(context.calculator_type.clone()))?;
        let profile = self.load_profile(user_id).await;

        let mut product_types = vec![current];
        let touched = profile.product_interests.iter().copied().chain(
            profile
                .calculation_history
                .iter()
                .filter_map(|item| ProductType::from_calculator(&item.calculator_type)),
        );
        for product_type in touched {
            if !product_types.contains(&product_type) {
                product_types.push(product_type);
            }
        }

        let mut tops = Vec::with_capacity(product_types.len());
        for product_type in product_types {
            let candidates = match self.products.list_active(product_type).await {
                Ok(products) => products,
                Err(error) => {
                    warn!(
                        event_name = "recommendations.products.unavailable",
                        user_id,
                        product_type = %product_type,
                        error = %error,
                        "bank products unavailable"
                    );
                    continue;
                }
            };
            let type_context = if product_type == current {
                context.clone()
            } else {
                CalculationContext::new(product_type.as_str())
            };
            tops.extend(self.rank(&profile, &candidates, product_type, &type_context, 1));
        }

        let suggestions = cross_calculator_suggestions(&tops);
        debug!(
            event_name = "recommendations.cross_ranked",
            user_id,
            product_types = tops.len(),
            suggestions = suggestions.len(),
            "cross-calculator suggestions built"
        );
        Ok(suggestions)
    }

    async fn load_profile(&self, user_id: &str) -> UserProfile {
        match self.profiles.get_user_profile(user_id).await {
            Some(profile) => profile,
            None => UserProfile::new(ProfileDraft::for_user(user_id), self.clock.now()),
        }
    }

    fn rank(
        &self,
        profile: &UserProfile,
        candidates: &[BankProduct],
        product_type: ProductType,
        context: &CalculationContext,
        limit: usize,
    ) -> Vec<RecommendationResult> {
        let behavior = analyze_user_behavior(profile, self.clock.now());
        let mut results: Vec<RecommendationResult> = candidates
            .iter()
            .filter(|product| product.active && product.product_type == product_type)
            .filter(|product| !profile.is_blacklisted(&product.bank_name))
            .map(|product| {
                let product = BankProduct { is_partner: self.is_partner(product), ..product.clone() };
                self.calculator.score_product(&ScoringInput {
                    product: &product,
                    profile,
                    behavior: &behavior,
                    context,
                })
            })
            .collect();

        results.sort_by(|left, right| right.score.partial_cmp(&left.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }

    fn persist_in_background(&self, user_id: &str, context: &CalculationContext, results: &[RecommendationResult]) {
        let sink = Arc::clone(&self.sink);
        let user_id = user_id.to_string();
        let context = context.clone();
        let results = results.to_vec();

        let task = tokio::spawn(async move {
            match sink.record(&user_id, &context, &results).await {
                Ok(()) => info!(
                    event_name = "recommendations.persisted",
                    user_id = %user_id,
                    count = results.len(),
                    "recommendations stored"
                ),
                Err(error) => warn!(
                    event_name = "recommendations.persist_failed",
                    user_id = %user_id,
                    error = %error,
                    "recommendations not stored"
                ),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Waits for rankings still being persisted. Called before shutdown.
    pub async fn flush(&self) {
        let tasks: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.drain(..).collect()
        };
        for task in tasks {
            if let Err(error) = task.await {
                warn!(
                    event_name = "recommendations.persist_aborted",
                    error = %error,
                    "persistence task ended abnormally"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{Notify, RwLock};

    use super::{BankProductSource, RecommendationEngine, RecommendationSink};
    use crate::clock::ManualClock;
    use crate::errors::{ApplicationError, DomainError};
    use crate::profile::{
        CalculationHistoryItem, LocalProfileStore, ProductType, ProfileDraft, RemoteProfileStore, UserProfile,
        UserProfileStore,
    };
    use crate::recommendations::{
        BankProduct, CalculationContext, ProductRequirements, RecommendationResult, RecommendationTag,
        SuggestionKind,
    };
    use crate::storage::LocalStorage;

    #[derive(Default)]
    struct Profiles {
        rows: RwLock<HashMap<String, UserProfile>>,
    }

    #[async_trait]
    impl RemoteProfileStore for Profiles {
        async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserProfile>, ApplicationError> {
            Ok(self.rows.read().await.get(user_id).cloned())
        }

        async fn insert(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
            self.rows.write().await.insert(profile.user_id.clone(), profile.clone());
            Ok(profile.clone())
        }

        async fn update(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
            self.insert(profile).await
        }
    }

    struct Catalog(Vec<BankProduct>);

    #[async_trait]
    impl BankProductSource for Catalog {
        async fn list_active(&self, product_type: ProductType) -> Result<Vec<BankProduct>, ApplicationError> {
            Ok(self.0.iter().filter(|product| product.product_type == product_type).cloned().collect())
        }
    }

    #[derive(Default)]
    struct Recorder {
        recorded: Mutex<Vec<(String, usize)>>,
        done: Notify,
    }

    #[async_trait]
    impl RecommendationSink for Recorder {
        async fn record(
            &self,
            user_id: &str,
            _context: &CalculationContext,
            results: &[RecommendationResult],
        ) -> Result<(), ApplicationError> {
            self.recorded.lock().expect("lock").push((user_id.to_string(), results.len()));
            self.done.notify_one();
            Ok(())
        }
    }

    fn product(id: &str, bank: &str, product_type: ProductType, rate: f64) -> BankProduct {
        BankProduct {
            id: id.to_string(),
            bank_name: bank.to_string(),
            product_type,
            name: id.to_string(),
            base_rate: rate,
            promo_rate: None,
            fees: BTreeMap::new(),
            min_amount: None,
            max_amount: None,
            min_term: None,
            max_term: None,
            requirements: ProductRequirements::default(),
            regions: Vec::new(),
            priority: 0,
            featured: false,
            bank_rating: None,
            is_partner: false,
            active: true,
        }
    }

    async fn engine(catalog: Vec<BankProduct>) -> (Arc<Recorder>, Arc<UserProfileStore>, RecommendationEngine) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let profiles = Arc::new(UserProfileStore::new(
            Arc::new(Profiles::default()),
            LocalProfileStore::new(LocalStorage::in_memory()),
            clock.clone(),
        ));
        let recorder = Arc::new(Recorder::default());
        let engine =
            RecommendationEngine::new(profiles.clone(), Arc::new(Catalog(catalog)), recorder.clone(), clock);
        (recorder, profiles, engine)
    }

    #[tokio::test]
    async fn results_are_ranked_filtered_and_truncated() {
        let mut inactive = product("off", "Bank D", ProductType::Credit, 4.0);
        inactive.active = false;
        let catalog = vec![
            product("mid", "Bank A", ProductType::Credit, 14.0),
            product("best", "Bank B", ProductType::Credit, 7.0),
            product("worst", "Bank C", ProductType::Credit, 27.0),
            product("banned", "Bank X", ProductType::Credit, 5.0),
            product("deposit", "Bank A", ProductType::Deposit, 18.0),
            inactive,
        ];
        let (recorder, profiles, engine) = engine(catalog).await;
        let mut draft = ProfileDraft::for_user("u1");
        draft.blacklisted_banks = vec!["Bank X".to_string()];
        profiles.create_user_profile(draft).await.expect("profile");

        let results = engine
            .get_personalized_recommendations("u1", &CalculationContext::new("loan"), 2)
            .await
            .expect("recommendations");

        let ids: Vec<_> = results.iter().map(|result| result.product.id.as_str()).collect();
        assert_eq!(ids, vec!["best", "mid"]);
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));

        recorder.done.notified().await;
        assert_eq!(recorder.recorded.lock().expect("lock").clone(), vec![("u1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn equal_scores_keep_catalog_order() {
        let catalog = vec![
            product("first", "Bank A", ProductType::Deposit, 10.0),
            product("second", "Bank B", ProductType::Deposit, 10.0),
            product("third", "Bank C", ProductType::Deposit, 10.0),
        ];
        let (_, _, engine) = engine(catalog).await;

        let results = engine
            .get_personalized_recommendations("anonymous", &CalculationContext::new("savings"), 10)
            .await
            .expect("recommendations");

        let ids: Vec<_> = results.iter().map(|result| result.product.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn configured_partner_banks_are_tagged_sponsored() {
        let catalog = vec![product("plain", "Bank A", ProductType::Deposit, 10.0)];
        let (_, _, engine) = engine(catalog).await;
        let engine = engine.with_partner_banks(vec!["bank a".to_string()]);

        let results = engine
            .get_personalized_recommendations("anonymous", &CalculationContext::new("savings"), 1)
            .await
            .expect("recommendations");

        assert!(results[0].product.is_partner);
        assert!(results[0].tags.contains(&RecommendationTag::Sponsored));
    }

    #[tokio::test]
    async fn unknown_calculator_is_rejected() {
        let (_, _, engine) = engine(Vec::new()).await;
        let error = engine
            .get_personalized_recommendations("u1", &CalculationContext::new("court_fee"), 5)
            .await
            .expect_err("no product type");
        assert_eq!(error, ApplicationError::Domain(DomainError::UnknownCalculator("court_fee".to_string())));
    }

    #[tokio::test]
    async fn cross_suggestions_pair_types_from_history() {
        let catalog = vec![
            product("family-mortgage", "Bank A", ProductType::Mortgage, 6.0),
            product("plain-mortgage", "Bank B", ProductType::Mortgage, 16.0),
            product("osago-basic", "Bank C", ProductType::Insurance, 0.0),
            product("cash-loan", "Bank D", ProductType::Credit, 20.0),
        ];
        let (recorder, profiles, engine) = engine(catalog).await;
        profiles.create_user_profile(ProfileDraft::for_user("u2")).await.expect("profile");
        profiles
            .track_calculation(
                "u2",
                CalculationHistoryItem::new("osago", serde_json::Map::new(), serde_json::Value::Null, Utc::now()),
            )
            .await
            .expect("tracked");

        let suggestions = engine
            .get_cross_calculator_recommendations(
                "u2",
                &CalculationContext::new("mortgage").with_amount(6_000_000.0),
            )
            .await
            .expect("suggestions");

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::Package);
        assert_eq!(suggestions[0].product_ids, vec!["family-mortgage", "osago-basic"]);

        engine.flush().await;
        assert!(recorder.recorded.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn cross_suggestions_need_a_second_product_type() {
        let catalog = vec![product("family-mortgage", "Bank A", ProductType::Mortgage, 6.0)];
        let (_, _, engine) = engine(catalog).await;

        let suggestions = engine
            .get_cross_calculator_recommendations("anonymous", &CalculationContext::new("mortgage"))
            .await
            .expect("suggestions");
        assert!(suggestions.is_empty());
    }
}
