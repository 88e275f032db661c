use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fincalc_core::errors::ApplicationError;
use fincalc_core::profile::{ProductType, RemoteProfileStore, SyncStatus, UserProfile};
use fincalc_core::recommendations::{
    BankProduct, BankProductSource, CalculationContext, RecommendationResult, RecommendationSink,
};

use super::RepositoryError;

#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

#[async_trait]
impl RemoteProfileStore for InMemoryProfileRepository {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserProfile>, ApplicationError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn insert(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.user_id) {
            return Err(RepositoryError::Decode(format!(
                "user profile `{}` already exists",
                profile.user_id
            ))
            .into());
        }
        let stored = UserProfile { sync_status: SyncStatus::Synced, ..profile.clone() };
        profiles.insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError> {
        let mut profiles = self.profiles.write().await;
        if !profiles.contains_key(&profile.user_id) {
            return Err(
                RepositoryError::NotFound(format!("user profile `{}`", profile.user_id)).into()
            );
        }
        let stored = UserProfile { sync_status: SyncStatus::Synced, ..profile.clone() };
        profiles.insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
pub struct InMemoryBankProductRepository {
    products: RwLock<Vec<BankProduct>>,
}

impl InMemoryBankProductRepository {
    pub fn with_products(products: Vec<BankProduct>) -> Self {
        Self { products: RwLock::new(products) }
    }

    pub async fn save(&self, product: BankProduct) {
        let mut products = self.products.write().await;
        match products.iter_mut().find(|existing| existing.id == product.id) {
            Some(existing) => *existing = product,
            None => products.push(product),
        }
    }
}

#[async_trait]
impl BankProductSource for InMemoryBankProductRepository {
    async fn list_active(&self, product_type: ProductType) -> Result<Vec<BankProduct>, ApplicationError> {
        let products = self.products.read().await;
        let mut active: Vec<BankProduct> = products
            .iter()
            .filter(|product| product.active && product.product_type == product_type)
            .cloned()
            .collect();
        active.sort_by(|left, right| right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id)));
        Ok(active)
    }
}

#[derive(Default)]
pub struct InMemoryRecommendationRepository {
    rankings: RwLock<HashMap<String, Vec<(CalculationContext, Vec<RecommendationResult>)>>>,
}

impl InMemoryRecommendationRepository {
    pub async fn rankings_for(&self, user_id: &str) -> Vec<(CalculationContext, Vec<RecommendationResult>)> {
        let rankings = self.rankings.read().await;
        rankings.get(user_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RecommendationSink for InMemoryRecommendationRepository {
    async fn record(
        &self,
        user_id: &str,
        context: &CalculationContext,
        results: &[RecommendationResult],
    ) -> Result<(), ApplicationError> {
        let mut rankings = self.rankings.write().await;
        rankings.entry(user_id.to_string()).or_default().push((context.clone(), results.to_vec()));
        Ok(())
    }
}
