use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::analysis::{analyze_user_behavior, UserBehaviorAnalysis};
use super::types::{
    CalculationHistoryItem, ProductType, ProfileDraft, ProfilePatch, SyncStatus, UpdateOptions,
    UserProfile,
};
use crate::clock::SharedClock;
use crate::errors::ApplicationError;
use crate::storage::{LocalStorage, StorageError};

pub const PROFILE_KEY_PREFIX: &str = "user_profile_";

/// Remote `user_profiles` collection. A missing row is `Ok(None)`, never an
/// error.
#[async_trait]
pub trait RemoteProfileStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<UserProfile>, ApplicationError>;
    async fn insert(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError>;
    async fn update(&self, profile: &UserProfile) -> Result<UserProfile, ApplicationError>;
}

/// Profile copies kept on the local medium under `user_profile_<user_id>`.
#[derive(Clone, Debug)]
pub struct LocalProfileStore {
    storage: LocalStorage,
}

impl LocalProfileStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    fn key(user_id: &str) -> String {
        format!("{PROFILE_KEY_PREFIX}{user_id}")
    }

    pub fn load(&self, user_id: &str) -> Option<UserProfile> {
        match self.storage.read_json(&Self::key(user_id)) {
            Ok(profile) => profile,
            Err(error) => {
                warn!(event_name = "profile.local.read_failed", user_id, error = %error, "local profile unreadable");
                None
            }
        }
    }

    pub fn save(&self, profile: &UserProfile) -> Result<(), StorageError> {
        self.storage.write_json(&Self::key(&profile.user_id), profile)
    }

    pub fn remove(&self, user_id: &str) -> bool {
        let key = Self::key(user_id);
        let existed = matches!(self.storage.get_item(&key), Ok(Some(_)));
        if let Err(error) = self.storage.remove_item(&key) {
            warn!(event_name = "profile.local.remove_failed", user_id, error = %error, "local profile not removed");
            return false;
        }
        existed
    }
}

/// User profiles written to the remote store and mirrored locally. When the
/// remote store is unreachable writes land locally with
/// [`SyncStatus::LocalOnly`] until [`UserProfileStore::sync_pending`] pushes
/// them.
pub struct UserProfileStore {
    remote: Arc<dyn RemoteProfileStore>,
    local: LocalProfileStore,
    clock: SharedClock,
}

impl UserProfileStore {
    pub fn new(remote: Arc<dyn RemoteProfileStore>, local: LocalProfileStore, clock: SharedClock) -> Self {
        Self { remote, local, clock }
    }

    pub fn local(&self) -> &LocalProfileStore {
        &self.local
    }

    /// Remote copy when reachable, local copy otherwise. A pending local
    /// write newer than the remote copy is kept and returned.
    pub async fn get_user_profile(&self, user_id: &str) -> Option<UserProfile> {
        match self.remote.find_by_user_id(user_id).await {
            Ok(Some(remote)) => {
                if let Some(local) = self.local.load(user_id) {
                    if local.sync_status != SyncStatus::Synced && local.updated_at > remote.updated_at {
                        debug!(event_name = "profile.get.pending_local", user_id, "keeping newer local copy");
                        return Some(local);
                    }
                }
                self.mirror(&remote);
                Some(remote)
            }
            Ok(None) => self.local.load(user_id),
            Err(error) => {
                warn!(event_name = "profile.get.remote_failed", user_id, error = %error, "using local profile");
                self.local.load(user_id)
            }
        }
    }

    pub async fn create_user_profile(&self, draft: ProfileDraft) -> Result<UserProfile, ApplicationError> {
        let profile = UserProfile::new(draft, self.clock.now());

        match self.remote.insert(&profile).await {
            Ok(mut created) => {
                created.sync_status = SyncStatus::Synced;
                self.mirror(&created);
                info!(event_name = "profile.created", user_id = %created.user_id, "profile created");
                Ok(created)
            }
            Err(error) => {
                warn!(
                    event_name = "profile.create.remote_failed",
                    user_id = %profile.user_id,
                    error = %error,
                    "creating local-only profile"
                );
                let profile = UserProfile { sync_status: SyncStatus::LocalOnly, ..profile };
                self.local.save(&profile).map_err(|error| ApplicationError::Persistence(error.to_string()))?;
                Ok(profile)
            }
        }
    }

    pub async fn update_user_profile(
        &self,
        user_id: &str,
        patch: ProfilePatch,
        options: UpdateOptions,
    ) -> Result<UserProfile, ApplicationError> {
        let mut profile = match self.get_user_profile(user_id).await {
            Some(profile) => profile,
            None => self.create_user_profile(ProfileDraft::for_user(user_id)).await?,
        };

        let now = self.clock.now();
        profile.apply(patch, options.merge_history);
        if options.increment_session {
            profile.session_count += 1;
        }
        profile.last_active = profile.last_active.max(now);
        profile.updated_at = now;

        match self.remote.update(&profile).await {
            Ok(mut updated) => {
                updated.sync_status = SyncStatus::Synced;
                self.mirror(&updated);
                Ok(updated)
            }
            Err(error) => {
                warn!(
                    event_name = "profile.update.remote_failed",
                    user_id,
                    error = %error,
                    "profile updated locally only"
                );
                if profile.sync_status == SyncStatus::Synced {
                    profile.sync_status = SyncStatus::LocalOnly;
                }
                self.local.save(&profile).map_err(|error| ApplicationError::Persistence(error.to_string()))?;
                Ok(profile)
            }
        }
    }

    /// Records a completed calculation and the product interest it implies.
    pub async fn track_calculation(
        &self,
        user_id: &str,
        calculation: CalculationHistoryItem,
    ) -> Result<UserProfile, ApplicationError> {
        let mut interests = match self.get_user_profile(user_id).await {
            Some(profile) => profile.product_interests,
            None => Vec::new(),
        };
        if let Some(interest) = ProductType::from_calculator(&calculation.calculator_type) {
            if !interests.contains(&interest) {
                interests.push(interest);
            }
        }

        debug!(
            event_name = "profile.track",
            user_id,
            calculator = %calculation.calculator_type,
            "tracking calculation"
        );
        let patch = ProfilePatch {
            calculation_history: Some(vec![calculation]),
            product_interests: Some(interests),
            ..ProfilePatch::default()
        };
        self.update_user_profile(user_id, patch, UpdateOptions::default()).await
    }

    pub async fn record_conversion(&self, user_id: &str) -> Result<UserProfile, ApplicationError> {
        let current = self.get_user_profile(user_id).await.map_or(0, |profile| profile.conversion_count);
        let patch = ProfilePatch { conversion_count: Some(current + 1), ..ProfilePatch::default() };
        self.update_user_profile(user_id, patch, UpdateOptions::default()).await
    }

    /// Pushes a local-only profile to the remote store. A remote copy updated
    /// after the local one is left alone and the local copy marked as a
    /// conflict.
    pub async fn sync_pending(&self, user_id: &str) -> Result<SyncStatus, ApplicationError> {
        let Some(mut local) = self.local.load(user_id) else {
            return Err(ApplicationError::Persistence(format!("no local profile for `{user_id}`")));
        };
        if local.sync_status == SyncStatus::Synced {
            return Ok(SyncStatus::Synced);
        }

        let synced = match self.remote.find_by_user_id(user_id).await? {
            Some(remote) if remote.updated_at > local.updated_at => {
                local.sync_status = SyncStatus::Conflict;
                self.local.save(&local).map_err(|error| ApplicationError::Persistence(error.to_string()))?;
                warn!(event_name = "profile.sync.conflict", user_id, "remote profile changed since local write");
                return Ok(SyncStatus::Conflict);
            }
            Some(_) => self.remote.update(&local).await?,
            None => self.remote.insert(&local).await?,
        };

        let synced = UserProfile { sync_status: SyncStatus::Synced, ..synced };
        self.mirror(&synced);
        info!(event_name = "profile.sync.completed", user_id, "local profile pushed to remote");
        Ok(SyncStatus::Synced)
    }

    pub fn clear_local(&self, user_id: &str) -> bool {
        self.local.remove(user_id)
    }

    pub async fn analyze_user_behavior(&self, user_id: &str) -> Option<UserBehaviorAnalysis> {
        let profile = self.get_user_profile(user_id).await?;
        Some(analyze_user_behavior(&profile, self.clock.now()))
    }

    fn mirror(&self, profile: &UserProfile) {
        if let Err(error) = self.local.save(profile) {
            warn!(
                event_name = "profile.local.write_failed",
                user_id = %profile.user_id,
                error = %error,
                "local profile copy not updated"
            );
        }
    }
}
