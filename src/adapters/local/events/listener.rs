use super::hub::EventHub;
use crate::application::supervisor::ProcessingSupervisor;
use crate::ports::{media::MediaToolPort, repository::VideoRepository, storage::StoragePort};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Forward upload events to the supervisor until the hub goes away.
pub fn start<S, M, R>(
    event_hub: Arc<EventHub>,
    supervisor: Arc<ProcessingSupervisor<S, M, R>>,
) -> JoinHandle<()>
where
    S: StoragePort + 'static,
    M: MediaToolPort + 'static,
    R: VideoRepository + 'static,
{
    let mut rx = event_hub.subscribe();
    drop(event_hub);

    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Upload listener lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let video_id = event.video_id();
            info!(video_id = %video_id, "Upload event received");
            if let Err(e) = supervisor.submit(event.into_request()) {
                error!(video_id = %video_id, error = %e, "Could not start processing");
            }
        }
        info!("Upload listener stopped");
    })
}
