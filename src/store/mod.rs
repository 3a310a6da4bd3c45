pub mod chat_store;
pub mod presence_store;
pub mod task_store;

pub use chat_store::ChatStore;
pub use presence_store::PresenceStore;
pub use task_store::{RoleRegistry, TaskStore};
