// Infrastructure layer modules
pub mod config;
pub mod follow_up;
pub mod ip_lookup;
pub mod logging;
pub mod processed_ledger;
pub mod ssm_ops;
pub mod state_store;
pub mod work_queue;

// Re-exports
pub use config::{ConfigError, DispatcherConfig, WorkQueueBackend};
pub use follow_up::{FollowUpError, FollowUpSender, WebhookFollowUpSender};
pub use ip_lookup::{CheckIpLookup, IpLookup, IpLookupError};
pub use logging::init_logging;
pub use processed_ledger::{ClaimResult, DynamoProcessedLedger, ProcessedLedger};
pub use ssm_ops::{AwsParameterStore, ParameterStore, SsmOpsError};
pub use state_store::{DynamoStateStore, StateStore, StorageError};
pub use work_queue::{
    ConfiguredWorkQueue, LambdaWorkQueue, QueueError, ReceivedMessage, SqsWorkQueue,
    SqsWorkSource, WorkQueue, WorkSource,
};
