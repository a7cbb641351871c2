use super::UploadEvent;
use tokio::sync::broadcast;

const HUB_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<UploadEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Returns the number of listeners that will see the event.
    pub fn publish(
        &self,
        event: UploadEvent,
    ) -> Result<usize, broadcast::error::SendError<UploadEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
