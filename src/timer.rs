//! Periodic snapshot saving.
//!
//! # Example
//!
//! ```ignore
//! let timer = SnapshotTimer::spawn(directory.clone(), snapshot.clone(), Duration::from_secs(60));
//! // ...
//! timer.stop().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::error::Result;
use crate::session::Directory;
use crate::storage::SnapshotFile;

/// Save the registry while holding the directory lock, so no handler can
/// mutate it halfway through.
pub async fn save_snapshot(directory: &Mutex<Directory>, file: &SnapshotFile) -> Result<()> {
    let directory = directory.lock().await;
    file.save(directory.users()).await
}

/// Background task saving a snapshot every `period`.
pub struct SnapshotTimer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SnapshotTimer {
    /// Start the timer. The first save happens one full period from now.
    pub fn spawn(directory: Arc<Mutex<Directory>>, file: SnapshotFile, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = save_snapshot(&directory, &file).await {
                            error!(path = %file.path().display(), error = %e, "Periodic snapshot failed");
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            debug!("Snapshot timer stopped");
        });

        Self { stop, task }
    }

    /// Stop the timer and wait for an in-progress save to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}
