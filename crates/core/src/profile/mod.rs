//! User profiles with calculation history, kept in a remote store and
//! mirrored on the local medium.

mod analysis;
mod store;
mod types;

pub use analysis::{analyze_user_behavior, UserBehaviorAnalysis, AMOUNT_ALIASES, TERM_ALIASES};
pub use store::{LocalProfileStore, RemoteProfileStore, UserProfileStore, PROFILE_KEY_PREFIX};
pub use types::{
    CalculationHistoryItem, ProductType, ProfileDraft, ProfilePatch, RiskTolerance, SyncStatus,
    UpdateOptions, UserProfile, HISTORY_LIMIT,
};
