pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod fees;
pub mod profile;
pub mod recommendations;
pub mod storage;

pub use cache::{CacheStatistics, KeyValueCache, RefreshPolicy, RefreshScheduler, SetOptions};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use fallback::{DataType, FallbackConfig, FallbackOrchestrator, FallbackPayload, FallbackResult};
pub use fees::{CourtType, FeeCalculation, FeeDataManager, FeeSchedule};
pub use profile::{ProductType, SyncStatus, UserProfile, UserProfileStore};
pub use recommendations::{BankProduct, CalculationContext, RecommendationEngine, RecommendationResult};
pub use storage::{KeyValueMedium, LocalStorage, StorageError};
