//! Container event subscription.
//!
//! Keeps a subscription to the runtime alive for the life of the process.
//! Qualifying events and subscription errors are delivered on separate
//! channels; an error never stops the watcher, it resubscribes instead.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::ContainerEvent;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

pub struct EventWatcher {
    pub events: mpsc::Receiver<ContainerEvent>,
    pub errors: mpsc::Receiver<RuntimeError>,
    handle: JoinHandle<()>,
}

impl EventWatcher {
    pub fn spawn(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::spawn_with_backoff(runtime, RESUBSCRIBE_DELAY)
    }

    fn spawn_with_backoff(runtime: Arc<dyn ContainerRuntime>, backoff: Duration) -> Self {
        let (event_tx, events) = mpsc::channel(128);
        let (error_tx, errors) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            let mut resubscribed = false;
            loop {
                // Anything may have happened while we were not subscribed.
                if resubscribed && event_tx.send(ContainerEvent::resync()).await.is_err() {
                    break;
                }

                let result = runtime.watch(event_tx.clone()).await;
                if event_tx.is_closed() {
                    break;
                }
                match result {
                    Ok(()) => warn!("Docker event stream ended. Resubscribing in {:?}", backoff),
                    Err(e) => {
                        warn!("Docker event stream failed. Resubscribing in {:?}", backoff);
                        // dropped when the main loop is behind
                        let _ = error_tx.try_send(e);
                    }
                }
                sleep(backoff).await;
                resubscribed = true;
            }
            info!("Event watcher stopped");
        });
        Self {
            events,
            errors,
            handle,
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use crate::types::ContainerAction;

    #[tokio::test]
    async fn forwards_events_and_errors_then_resyncs() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.push_watch_session(vec![ContainerAction::Start, ContainerAction::Die], true);
        runtime.push_watch_session(vec![ContainerAction::Stop], false);

        let mut watcher =
            EventWatcher::spawn_with_backoff(runtime.clone(), Duration::from_millis(1));

        let actions: Vec<_> = [
            watcher.events.recv().await.unwrap(),
            watcher.events.recv().await.unwrap(),
            watcher.events.recv().await.unwrap(),
            watcher.events.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.action)
        .collect();
        assert_eq!(
            actions,
            vec![
                ContainerAction::Start,
                ContainerAction::Die,
                ContainerAction::Resync,
                ContainerAction::Stop,
            ]
        );
        assert!(watcher.errors.recv().await.is_some());
        watcher.abort();
    }
}
