use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::upnp::{DirectoryLoader, ServiceDirectory};

/// Write-once slot holding the published service directory.
///
/// Readers see either nothing or a complete directory. The lock covers only
/// the reference swap; the directory itself is never mutated once published.
#[derive(Debug, Clone, Default)]
pub struct DirectoryCell {
    inner: Arc<Mutex<Option<Arc<ServiceDirectory>>>>,
}

impl DirectoryCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<ServiceDirectory>> {
        self.inner.lock().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().is_some()
    }

    // false keeps the directory published first
    pub fn publish(&self, directory: ServiceDirectory) -> bool {
        let mut slot = self.inner.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(directory));
        true
    }
}

/// Loads the directory, retrying at a fixed interval until it succeeds.
/// Returns the number of attempts made.
///
/// The directory is never refreshed afterwards: services that appear or
/// disappear on the gateway are only picked up after a restart.
pub async fn load_until_published<L>(loader: &L, cell: &DirectoryCell, retry: Duration) -> u32
where
    L: DirectoryLoader + ?Sized,
{
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match loader.load_directory().await {
            Ok(directory) => {
                let services = directory.len();
                if cell.publish(directory) {
                    info!(services, attempts, "services loaded");
                }
                return attempts;
            }
            Err(err) => {
                warn!(error = %err, retry_secs = retry.as_secs(), "cannot load services");
                sleep(retry).await;
            }
        }
    }
}

pub fn spawn_directory_loader<L>(loader: Arc<L>, cell: DirectoryCell, retry: Duration) -> JoinHandle<()>
where
    L: DirectoryLoader + ?Sized + 'static,
{
    tokio::spawn(async move {
        load_until_published(loader.as_ref(), &cell, retry).await;
    })
}
