//! In-process bus for running the poller without a CAN controller.

use heapless::Deque;

use super::CanTransmit;
use crate::CanFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Transmitted frames are queued until someone pops them
#[derive(Debug, Default)]
pub struct LoopbackBus<const N: usize> {
    queue: Deque<CanFrame, N>,
}

impl<const N: usize> LoopbackBus<N> {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    pub fn pop(&mut self) -> Option<CanFrame> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<const N: usize> CanTransmit for LoopbackBus<N> {
    type Error = QueueFull;

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        self.queue.push_back(frame.clone()).map_err(|_| QueueFull)
    }
}
