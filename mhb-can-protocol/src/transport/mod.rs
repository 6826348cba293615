//! Bus side of the protocol: bit timing, acceptance filtering, transmit and
//! receive contracts.
//!
//! The hardware binding owns the peripheral. It configures it from a
//! [`TransportConfig`], hands request frames out through [`CanTransmit`] and
//! feeds every received frame into a [`Receiver`], which validates it and
//! forwards the payload to a [`FrameSink`].

pub mod loopback;

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

use crate::{BatteryReading, CanFrame, MhbData, RESPONSE_ID};

/// Sync segment, always one quantum
const SYNC_QUANTA: u32 = 1;
/// bxCAN baud rate prescaler is 10 bits wide
const MAX_PRESCALER: u32 = 1024;
/// `TS1` field, four bits
const MAX_SEGMENT_1: u8 = 16;
/// `TS2` field, three bits
const MAX_SEGMENT_2: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitTimingError {
    ZeroBitrate,
    /// Clock is not an integer multiple of `quanta * bitrate`
    Inexact { clock_hz: u32, bitrate: u32 },
    PrescalerOutOfRange(u32),
    /// BS1 outside 1..=16 or BS2 outside 1..=8
    SegmentOutOfRange { segment_1: u8, segment_2: u8 },
}

/// Nominal bit timing in time quanta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    pub prescaler: u16,
    pub sync_jump_width: u8,
    pub segment_1: u8,
    pub segment_2: u8,
}

impl BitTiming {
    /// `prescaler = clock / (quanta * bitrate)` for SJW 1, BS1 3, BS2 4
    pub fn for_bitrate(clock_hz: u32, bitrate: u32) -> Result<Self, BitTimingError> {
        Self::with_segments(clock_hz, bitrate, 3, 4)
    }

    pub fn with_segments(
        clock_hz: u32,
        bitrate: u32,
        segment_1: u8,
        segment_2: u8,
    ) -> Result<Self, BitTimingError> {
        if bitrate == 0 {
            return Err(BitTimingError::ZeroBitrate);
        }
        if !(1..=MAX_SEGMENT_1).contains(&segment_1) || !(1..=MAX_SEGMENT_2).contains(&segment_2) {
            return Err(BitTimingError::SegmentOutOfRange {
                segment_1,
                segment_2,
            });
        }
        let quanta = SYNC_QUANTA + segment_1 as u32 + segment_2 as u32;
        let per_bit = quanta.saturating_mul(bitrate);
        if clock_hz % per_bit != 0 {
            return Err(BitTimingError::Inexact { clock_hz, bitrate });
        }
        let prescaler = clock_hz / per_bit;
        if prescaler == 0 || prescaler > MAX_PRESCALER {
            return Err(BitTimingError::PrescalerOutOfRange(prescaler));
        }

        Ok(Self {
            prescaler: prescaler as u16,
            sync_jump_width: 1,
            segment_1,
            segment_2,
        })
    }

    pub fn quanta_per_bit(&self) -> u32 {
        SYNC_QUANTA + self.segment_1 as u32 + self.segment_2 as u32
    }

    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.prescaler as u32 * self.quanta_per_bit())
    }

    /// Value of the bxCAN `BTR` register timing fields
    pub fn btr(&self) -> u32 {
        let field = |value: u32| value.saturating_sub(1);
        (field(self.sync_jump_width as u32) << 24)
            | (field(self.segment_2 as u32) << 20)
            | (field(self.segment_1 as u32) << 16)
            | field(self.prescaler as u32)
    }
}

/// Identifier/mask filter on standard identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptanceFilter {
    pub id: u16,
    pub mask: u16,
}

impl AcceptanceFilter {
    /// Passes `id` and nothing else
    pub const fn exact(id: u16) -> Self {
        Self { id, mask: 0x7FF }
    }

    pub fn accepts(&self, frame: &CanFrame) -> bool {
        match frame.standard_id() {
            Some(raw) => raw & self.mask == self.id & self.mask,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportConfig {
    /// Peripheral clock feeding the CAN controller
    pub clock_hz: u32,
    pub bitrate: u32,
    /// Let the controller retry lost arbitration and missing acks on its own
    pub automatic_retransmission: bool,
    pub filter: AcceptanceFilter,
}

impl TransportConfig {
    pub fn bit_timing(&self) -> Result<BitTiming, BitTimingError> {
        BitTiming::for_bitrate(self.clock_hz, self.bitrate)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            clock_hz: 36_000_000,
            bitrate: 500_000,
            automatic_retransmission: true,
            filter: AcceptanceFilter::exact(RESPONSE_ID),
        }
    }
}

/// Queue a frame for sending and return without waiting for the bus
pub trait CanTransmit {
    type Error;

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;
}

/// Consumer of validated response payloads
pub trait FrameSink {
    fn accept(&self, payload: &[u8]) -> Option<MhbData>;
}

impl FrameSink for BatteryReading {
    fn accept(&self, payload: &[u8]) -> Option<MhbData> {
        self.update(payload)
    }
}

/// Hardware receive queue a frame was drained from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveQueue {
    /// FIFO 0, fed by the response filter, standard frames only
    Primary,
    /// FIFO 1, reserved for extended frames
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscardReason {
    WrongIdentifier,
    UnexpectedFormat,
    RemoteFrame,
}

/// What happened to a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    Decoded(MhbData),
    /// Valid response with a parameter index nobody asked about
    Unrecognized,
    /// Extended frame on the secondary queue, not handled yet
    Ignored,
    Discarded(DiscardReason),
}

/// Receive path, called from interrupt context with one frame per call
pub struct Receiver<'a, S> {
    filter: AcceptanceFilter,
    sink: &'a S,
    discarded: AtomicU32,
}

impl<'a, S: FrameSink> Receiver<'a, S> {
    pub const fn new(filter: AcceptanceFilter, sink: &'a S) -> Self {
        Self {
            filter,
            sink,
            discarded: AtomicU32::new(0),
        }
    }

    pub fn on_receive(&self, queue: ReceiveQueue, frame: &CanFrame) -> Disposition {
        #[cfg(feature = "defmt")]
        trace!("{} frame: {}", queue, frame);

        let disposition = match queue {
            ReceiveQueue::Primary => self.primary(frame),
            ReceiveQueue::Secondary if frame.is_standard() => {
                Disposition::Discarded(DiscardReason::UnexpectedFormat)
            }
            ReceiveQueue::Secondary => Disposition::Ignored,
        };

        if let Disposition::Discarded(_reason) = disposition {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "defmt")]
            warn!("Discarded {} frame ({}): {}", queue, _reason, frame);
        }
        disposition
    }

    /// Frames dropped for identifier, format or RTR since start
    pub fn discarded_frames(&self) -> u32 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn primary(&self, frame: &CanFrame) -> Disposition {
        if !frame.is_standard() {
            return Disposition::Discarded(DiscardReason::UnexpectedFormat);
        }
        if !self.filter.accepts(frame) {
            return Disposition::Discarded(DiscardReason::WrongIdentifier);
        }
        if frame.remote {
            return Disposition::Discarded(DiscardReason::RemoteFrame);
        }
        match self.sink.accept(&frame.data) {
            Some(data) => Disposition::Decoded(data),
            None => Disposition::Unrecognized,
        }
    }
}
