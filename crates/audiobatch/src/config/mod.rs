pub mod batch;
pub mod folder;
pub mod loader;
pub mod notification;
pub mod schema;

pub use batch::{BatchConfigHandle, GlobalBatchConfig, JobFailurePolicy, RetryConfig};
pub use folder::{ExternalFolderConfig, FolderUpdate, NewFolder, ProcessingConfig, ProviderConfig};
pub use loader::{load_settings, load_settings_from_str};
pub use notification::{
    NewNotification, NotificationCondition, NotificationConfig, NotificationEvent,
    NotificationUpdate, Threshold, ThresholdMetric, ThresholdOperator,
};
pub use schema::{AnalysisSettings, LoggingSettings, Settings};
