// Domain layer modules
pub mod command_result;
pub mod interaction;
pub mod signature_verifier;
pub mod state_record;
pub mod work_item;

// Re-exports
pub use command_result::{CommandResult, CommandStatus};
pub use interaction::{Interaction, InteractionKind, InteractionParseError, InteractionType};
pub use signature_verifier::{DEFAULT_MAX_SKEW_SECS, SignatureVerifier, VerificationError};
pub use state_record::{InstanceStatus, StateRecord};
pub use work_item::{FollowUpTarget, WorkItem, WorkPayload};
