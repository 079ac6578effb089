mod bus;
mod handlers;
mod types;

pub use bus::{EventBus, EventListener, EventReceiver, SubscriptionId};
pub use handlers::{AutoSyncHandler, EventLogHandler};
pub use types::{
    ChangeKind, EventSequence, QueueEvent, QueueEventPayload, QUEUE_CHANGE_EVENT,
    QUEUE_SYNCED_EVENT,
};
