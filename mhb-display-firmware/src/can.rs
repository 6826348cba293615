#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_stm32::can::filter::Mask32;
use embassy_stm32::can::frame::Header;
use embassy_stm32::can::{Can, CanRx, CanTx, Fifo, Frame, StandardId};
use mhb_can_protocol::transport::{CanTransmit, Disposition, ReceiveQueue, TransportConfig};
use mhb_can_protocol::CanFrame;

use crate::RECEIVER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TransmitError {
    /// Identifier or length rejected by the driver
    InvalidFrame,
    /// All three mailboxes hold frames of equal or higher priority
    MailboxesFull,
}

/// Transmit half of the controller, queues into a free mailbox or fails
pub struct MailboxTransmitter(pub CanTx<'static>);

impl CanTransmit for MailboxTransmitter {
    type Error = TransmitError;

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        let header = Header::new(frame.id, frame.data.len() as u8, frame.remote);
        let frame = Frame::new(header, &frame.data).map_err(|_| TransmitError::InvalidFrame)?;
        self.0
            .try_write(&frame)
            .map(|_| ())
            .map_err(|_| TransmitError::MailboxesFull)
    }
}

/// Apply the transport configuration and start the controller.
///
/// Only the response identifier passes the filter bank, which feeds the
/// primary FIFO. The secondary FIFO has no bank assigned.
pub async fn configure(can: &mut Can<'static>, config: &TransportConfig) {
    match config.bit_timing() {
        Ok(timing) => info!(
            "CAN {} bit/s: prescaler {}, BTR {=u32:#010X}",
            config.bitrate,
            timing.prescaler,
            timing.btr()
        ),
        Err(e) => error!("No exact bit timing for {} bit/s: {}", config.bitrate, e),
    }

    match (
        StandardId::new(config.filter.id),
        StandardId::new(config.filter.mask),
    ) {
        (Some(id), Some(mask)) => {
            can.modify_filters()
                .enable_bank(0, Fifo::Fifo0, Mask32::frames_with_std_id(id, mask));
        }
        _ => error!("Filter {} is not a standard identifier", config.filter),
    }

    can.modify_config()
        .set_loopback(false)
        .set_silent(false)
        .set_automatic_retransmit(config.automatic_retransmission);
    can.set_bitrate(config.bitrate);
    can.enable().await;
    info!("CAN enabled");
}

fn convert(frame: &Frame) -> Option<CanFrame> {
    let header = frame.header();
    if header.rtr() {
        return Some(CanFrame::remote_request(*header.id()));
    }
    let len = (header.len() as usize).min(CanFrame::MAX_LEN);
    CanFrame::from_encoded(*header.id(), &frame.data()[..len]).ok()
}

/// Hand every received frame to the receive path
#[embassy_executor::task]
pub async fn receiver(mut can_rx: CanRx<'static>) {
    loop {
        match can_rx.read().await {
            Ok(envelope) => {
                let Some(frame) = convert(&envelope.frame) else {
                    warn!("Unable to convert CAN frame");
                    continue;
                };
                // only FIFO 0 has a filter bank, anything extended arrived unfiltered
                let queue = if frame.is_standard() {
                    ReceiveQueue::Primary
                } else {
                    ReceiveQueue::Secondary
                };
                if let Disposition::Decoded(data) = RECEIVER.on_receive(queue, &frame) {
                    debug!("Decoded {}", data);
                }
            }
            Err(e) => error!("CAN frame read error: {}", e),
        }
    }
}
