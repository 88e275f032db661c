//! Court filing fee reference data: rule tables, the remote schedule source,
//! and the manager that keeps a usable schedule available online or offline.

mod connectivity;
mod manager;
mod schedule;
mod source;
mod statutory;

pub use connectivity::ConnectivityMonitor;
pub use manager::{
    DataFreshness, FeeCacheStatus, FeeDataManager, FeeDataSettings, LAST_UPDATE_KEY, VERSION_KEY,
};
pub use schedule::{CourtType, FeeCalculation, FeeFormula, FeeRule, FeeSchedule};
pub use source::{
    schedule_from_rows, FeeScheduleRow, HttpScheduleSource, ScheduleSource,
    ScheduleSourceError, UnconfiguredSource,
};
pub use statutory::{
    degraded_schedule, minimum_fee, statutory_effective_date, statutory_exemptions,
    statutory_schedule, ExemptionCategory, FEE_DATA_VERSION,
};
