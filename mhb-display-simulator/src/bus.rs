use embedded_can::Frame;
use mhb_can_protocol::transport::{CanTransmit, ReceiveQueue};
use mhb_can_protocol::CanFrame;
use tokio::sync::mpsc;
#[allow(unused_imports)]
use tracing::{debug, trace, warn};

/// Frames in flight between the poll loop and the socket writer
pub const TRANSMIT_QUEUE_DEPTH: usize = 3;

/// Hands frames to the writer task without waiting, like the three bxCAN mailboxes
pub struct ChannelBus {
    tx: mpsc::Sender<CanFrame>,
}

impl ChannelBus {
    pub fn new(tx: mpsc::Sender<CanFrame>) -> Self {
        Self { tx }
    }
}

impl CanTransmit for ChannelBus {
    type Error = mpsc::error::TrySendError<CanFrame>;

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        self.tx.try_send(frame.clone())
    }
}

/// Convert a received SocketCAN frame, error frames have no counterpart.
///
/// The kernel does not know about receive FIFOs, so standard frames are
/// treated as the filtered primary queue and extended frames as the second one.
pub fn from_socketcan(frame: &socketcan::CanFrame) -> Option<(ReceiveQueue, CanFrame)> {
    let converted = match frame {
        socketcan::CanFrame::Data(frame) => {
            CanFrame::from_encoded(frame.id(), frame.data()).ok()?
        }
        socketcan::CanFrame::Remote(frame) => CanFrame::remote_request(frame.id()),
        socketcan::CanFrame::Error(frame) => {
            debug!("Received CAN error frame: {:?}", frame);
            return None;
        }
    };

    let queue = if converted.is_standard() {
        ReceiveQueue::Primary
    } else {
        ReceiveQueue::Secondary
    };
    Some((queue, converted))
}

pub fn to_socketcan(frame: &CanFrame) -> Option<socketcan::CanFrame> {
    if frame.remote {
        socketcan::CanFrame::new_remote(frame.id, frame.data.len())
    } else {
        socketcan::CanFrame::new(frame.id, &frame.data)
    }
}

/// Drain the transmit queue onto the socket until the poll loop goes away
pub async fn write_frames(
    socket: std::sync::Arc<socketcan::tokio::AsyncCanSocket<socketcan::CanSocket>>,
    mut rx: mpsc::Receiver<CanFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let Some(encoded) = to_socketcan(&frame) else {
            warn!("Unable to encode frame for SocketCAN: {:?}", frame);
            continue;
        };
        trace!("Sending CAN frame: {:?}", frame);
        if let Err(e) = socket.write_frame(encoded).await {
            warn!("Failed to send CAN frame {:?}: {}", frame, e);
        }
    }
    debug!("Transmit queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};
    use embedded_can::{ExtendedId, StandardId};
    use mhb_can_protocol::encode_request;

    #[test]
    fn channel_bus_does_not_block_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut bus = ChannelBus::new(tx);

        bus.transmit(&encode_request(0x00)).unwrap();
        let_assert!(Err(mpsc::error::TrySendError::Full(rejected)) =
            bus.transmit(&encode_request(0x01)));
        assert!(rejected.data[3] == 0x01);

        let_assert!(Ok(sent) = rx.try_recv());
        assert!(sent.data[3] == 0x00);
    }

    #[test]
    fn request_survives_the_socketcan_conversion() {
        let request = encode_request(0x14);
        let_assert!(Some(encoded) = to_socketcan(&request));
        let_assert!(Some((ReceiveQueue::Primary, decoded)) = from_socketcan(&encoded));
        assert!(decoded == request);
    }

    #[test]
    fn extended_frames_go_to_the_secondary_queue() {
        let_assert!(Some(id) = ExtendedId::new(0x18DA_F110));
        let_assert!(Some(frame) = socketcan::CanFrame::new(id, &[1, 2, 3]));
        let_assert!(Some((ReceiveQueue::Secondary, decoded)) = from_socketcan(&frame));
        assert!(!decoded.is_standard());
        assert!(&decoded.data[..] == &[1, 2, 3]);
    }

    #[test]
    fn remote_frames_keep_their_flag() {
        let_assert!(Some(id) = StandardId::new(0x72B));
        let_assert!(Some(frame) = socketcan::CanFrame::new_remote(id, 0));
        let_assert!(Some((ReceiveQueue::Primary, decoded)) = from_socketcan(&frame));
        assert!(decoded.remote);
        assert!(decoded.standard_id() == Some(0x72B));
    }
}
