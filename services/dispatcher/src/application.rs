// アプリケーション層モジュール
pub mod builtin_commands;
pub mod command_invoker;
pub mod command_registry;
pub mod executor_loop;
pub mod interaction_endpoint;
pub mod request_router;
pub mod work_executor;

// 再エクスポート
pub use builtin_commands::{
    LONG_TASK_COMMAND, PING_COMMAND, PingCommand, SHOW_IP_COMMAND, STATUS_COMMAND, StateIdSource,
    StatusCommand, default_registry,
};
pub use command_invoker::CommandInvoker;
pub use command_registry::{
    CommandDescriptor, CommandHandler, CommandRegistry, Execution, HandlerError, RegistryError,
};
pub use executor_loop::{ExecutorLoop, HEARTBEAT_INTERVAL, PollOutcome, RECEIVE_ERROR_BACKOFF};
pub use interaction_endpoint::{
    INTERACTION_LEASE, InteractionEndpoint, SIGNATURE_HEADER, TIMESTAMP_HEADER, error_response,
    json_response,
};
pub use request_router::RequestRouter;
pub use work_executor::{
    EchoJob, ExecutionError, ExecutionOutcome, JobError, JobHandler, JobRegistry, ShowIpJob,
    WorkExecutor, default_jobs,
};
