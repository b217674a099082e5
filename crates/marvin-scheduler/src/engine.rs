use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::store::ReminderStore;
use crate::types::ReminderStatus;

/// How the engine talks to the IRC client. Production wires this to the
/// callback HTTP endpoint; tests script presence and sends.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Whether `nick` is currently present in `channel`.
    async fn user_online(&self, channel: &str, nick: &str) -> bool;
    /// Send one line to a channel. Returns false on transport failure.
    async fn send_message(&self, channel: &str, message: &str) -> bool;
}

/// Background delivery loop for time-based reminders.
///
/// Started once at boot. Sleeps a short grace period so the HTTP boundary
/// comes up first, then polls every 15 seconds. Every tick error is caught
/// and logged; the loop never dies.
pub struct ReminderEngine {
    store: Arc<ReminderStore>,
    deliverer: Arc<dyn Deliverer>,
}

const STARTUP_GRACE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(15);
const DUE_BATCH: usize = 20;

impl ReminderEngine {
    pub fn new(store: Arc<ReminderStore>, deliverer: Arc<dyn Deliverer>) -> Self {
        Self { store, deliverer }
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("reminder engine started");
        tokio::select! {
            _ = tokio::time::sleep(STARTUP_GRACE) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("reminder tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reminder engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: expire stale reminders, then try to deliver everything due.
    pub async fn tick(&self) -> crate::error::Result<()> {
        let now = Utc::now();
        self.store.expire_overdue(now)?;

        for reminder in self.store.due_time_reminders(now, DUE_BATCH)? {
            let online = self
                .deliverer
                .user_online(&reminder.channel, &reminder.target_nick)
                .await;

            if !online {
                let status = self.store.record_failed_attempt(reminder.id)?;
                if status == ReminderStatus::Failed {
                    warn!(reminder_id = reminder.id, "reminder gave up: target never online");
                }
                continue;
            }

            let sent = self
                .deliverer
                .send_message(&reminder.channel, &reminder.delivery_line())
                .await;

            if !sent {
                self.store.record_failed_attempt(reminder.id)?;
                continue;
            }

            info!(
                reminder_id = reminder.id,
                target = %reminder.target_nick,
                channel = %reminder.channel,
                "reminder delivered"
            );
            match reminder.recurrence {
                Some(recurrence) => {
                    self.store.advance_recurring(reminder.id, recurrence)?;
                }
                None => self.store.mark_delivered(reminder.id)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewReminder;
    use crate::types::{Recurrence, ReminderType};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct ScriptedDeliverer {
        online: AtomicBool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedDeliverer {
        fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Deliverer for ScriptedDeliverer {
        async fn user_online(&self, _channel: &str, _nick: &str) -> bool {
            self.online.load(Ordering::SeqCst)
        }
        async fn send_message(&self, channel: &str, message: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), message.to_string()));
            true
        }
    }

    fn due_reminder(store: &ReminderStore, recurrence: Option<Recurrence>) -> i64 {
        // Inserted slightly ahead, queried after it has ripened.
        let id = store
            .create(&NewReminder {
                creator_nick: "bob".to_string(),
                target_nick: "bob".to_string(),
                channel: "#x".to_string(),
                message: "tea".to_string(),
                reminder_type: ReminderType::Time,
                deliver_at: Some(Utc::now() + ChronoDuration::milliseconds(50)),
                recurrence,
            })
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        id
    }

    fn engine(online: bool) -> (Arc<ReminderStore>, Arc<ScriptedDeliverer>, ReminderEngine) {
        let store = Arc::new(
            ReminderStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let deliverer = Arc::new(ScriptedDeliverer::new(online));
        let engine = ReminderEngine::new(store.clone(), deliverer.clone());
        (store, deliverer, engine)
    }

    #[tokio::test]
    async fn online_target_gets_exactly_one_message() {
        let (store, deliverer, engine) = engine(true);
        let id = due_reminder(&store, None);

        engine.tick().await.unwrap();
        engine.tick().await.unwrap();

        let sent = deliverer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "bob: Reminder: tea");
        drop(sent);
        assert_eq!(store.get(id).unwrap().status, ReminderStatus::Delivered);
    }

    #[tokio::test]
    async fn offline_target_increments_attempts_then_fails() {
        let (store, deliverer, engine) = engine(false);
        let id = due_reminder(&store, None);

        for _ in 0..10 {
            engine.tick().await.unwrap();
        }

        assert!(deliverer.sent.lock().unwrap().is_empty());
        let reminder = store.get(id).unwrap();
        assert_eq!(reminder.status, ReminderStatus::Failed);
        assert_eq!(reminder.delivery_attempts, 10);
    }

    #[tokio::test]
    async fn recurring_delivery_advances_instead_of_completing() {
        let (store, deliverer, engine) = engine(true);
        let id = due_reminder(&store, Some(Recurrence::Hourly));
        let slot = store.get(id).unwrap().deliver_at.unwrap();

        engine.tick().await.unwrap();

        assert_eq!(deliverer.sent.lock().unwrap().len(), 1);
        let after = store.get(id).unwrap();
        assert_eq!(after.status, ReminderStatus::Pending);
        assert_eq!(after.deliver_at.unwrap(), slot + ChronoDuration::hours(1));
    }
}
