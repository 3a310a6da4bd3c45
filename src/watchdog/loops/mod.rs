pub mod auto_block_stale;
pub mod continuity_replenish;
pub mod digest;
pub mod fine_grained;
pub mod ready_queue;
pub mod ready_queue_replenish;
pub mod review_reassign;
pub mod suggest_close;
pub mod working_contract;

pub use auto_block_stale::AutoBlockStaleLoop;
pub use continuity_replenish::ContinuityReplenishLoop;
pub use digest::DigestLoop;
pub use fine_grained::{CadenceLoop, IdleNudgeLoop, MentionRescueLoop};
pub use ready_queue::ReadyQueueLoop;
pub use ready_queue_replenish::ReadyQueueReplenishLoop;
pub use review_reassign::ReviewReassignLoop;
pub use suggest_close::SuggestCloseLoop;
pub use working_contract::WorkingContractLoop;
