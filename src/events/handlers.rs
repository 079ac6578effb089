use super::{ChangeKind, EventBus, QueueEvent, QueueEventPayload};
use crate::logging::{log_debug, log_info, log_warn};
use crate::shutdown::ShutdownCoordinator;
use crate::upload_queue::SyncCoordinator;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Handler that schedules a background sync pass whenever an item is added
pub struct AutoSyncHandler {
    event_bus: EventBus,
    coordinator: SyncCoordinator,
    shutdown: ShutdownCoordinator,
}

impl AutoSyncHandler {
    pub fn new(
        event_bus: EventBus,
        coordinator: SyncCoordinator,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            event_bus,
            coordinator,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        // Subscribe before spawning so no event published after start() is missed
        let mut rx = self.event_bus.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => self.handle_event(&event),
                            Err(broadcast::error::RecvError::Closed) => {
                                log_info("events", "Auto-sync handler stopped (event bus closed)");
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                // Missed adds still deserve a pass
                                log_warn("events", &format!("Auto-sync handler lagged {} events", n));
                                self.coordinator.spawn_pass(&Handle::current(), "lagged");
                            }
                        }
                    }
                    _ = shutdown_rx.wait() => {
                        log_info("events", "Auto-sync handler gracefully shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn handle_event(&self, event: &QueueEvent) {
        if let QueueEventPayload::Changed {
            kind: ChangeKind::Added,
            id,
        } = &event.payload
        {
            log_debug(
                "events",
                &format!(
                    "Item {} added, scheduling sync",
                    id.as_deref().unwrap_or("<unknown>")
                ),
            );
            self.coordinator.spawn_pass(&Handle::current(), "item added");
        }
    }
}

/// Handler that mirrors every event into the log at debug level
pub struct EventLogHandler {
    event_bus: EventBus,
    shutdown: ShutdownCoordinator,
}

impl EventLogHandler {
    pub fn new(event_bus: EventBus, shutdown: ShutdownCoordinator) -> Self {
        Self {
            event_bus,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => log_debug("events", &describe(&event)),
                            Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log_warn("events", &format!("Event log handler lagged {} events", n));
                            }
                        }
                    }
                    _ = shutdown_rx.wait() => break,
                }
            }
        })
    }
}

fn describe(event: &QueueEvent) -> String {
    match &event.payload {
        QueueEventPayload::Changed { kind, id } => format!(
            "#{} {} {:?} {}",
            event.sequence,
            event.name(),
            kind,
            id.as_deref().unwrap_or("*")
        ),
        QueueEventPayload::Synced { result } => format!(
            "#{} {} ok={} failed={} skipped={}",
            event.sequence,
            event.name(),
            result.successful,
            result.failed,
            result.skipped
        ),
    }
}
