//! Notification forwarding for attribute-streaming devices
//! One task per subscribed characteristic pushes every notification into the
//! transport's queue until cancelled or the stream ends.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::types::RawFrame;

#[derive(Clone)]
pub struct NotificationHandler {
    sink: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
}

impl NotificationHandler {
    pub fn new(sink: mpsc::Sender<RawFrame>, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    /// Start forwarding notifications for one characteristic
    pub fn subscribe(&self, characteristic: Characteristic) {
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            Self::forward_notifications(characteristic, sink, cancel).await;
        });
    }

    async fn forward_notifications(
        characteristic: Characteristic,
        sink: mpsc::Sender<RawFrame>,
        cancel: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        info!("Listening for notifications on {}", uuid);

        let mut stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", uuid, e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Notification on {}: {:?}", uuid, value);
                        match sink.try_send(RawFrame::attribute(uuid, value)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("Notification queue full, dropping frame from {}", uuid);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream for {}: {}", uuid, e);
                        break;
                    }
                    None => break,
                },
            }
        }

        info!("Notification stream for {} ended", uuid);
    }
}
