//! Round robin request scheduling.
//!
//! One request goes out per timer period: the nine cells, the pack voltage,
//! then either the production date (once per power cycle) or the state of
//! charge. Responses are not correlated with requests, the cursor moves on
//! whether or not an answer arrived.

#[cfg(feature = "defmt")]
use defmt::debug;

use crate::timer::{Granularity, TimerBank, TimerError};
use crate::transport::CanTransmit;
use crate::{encode_request, ParameterIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollerConfig {
    /// Timer slot driving the cadence
    pub slot: usize,
    pub granularity: Granularity,
    /// Ticks between two requests
    pub send_period: u16,
}

impl PollerConfig {
    pub fn period_millis(&self) -> u32 {
        self.send_period as u32 * self.granularity.tick_millis()
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            slot: 0,
            granularity: Granularity::Millisecond,
            send_period: 1000,
        }
    }
}

/// Next parameter to request
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestCursor {
    index: u8,
    production_date_fetched: bool,
}

impl RequestCursor {
    /// Cursor position shared by production date and state of charge
    pub const LAST: u8 = 10;

    pub const fn new() -> Self {
        Self {
            index: 0,
            production_date_fetched: false,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn production_date_fetched(&self) -> bool {
        self.production_date_fetched
    }

    /// Parameter at the current position, without moving
    pub fn peek(&self) -> ParameterIndex {
        match self.index {
            0..=9 => ParameterIndex(self.index),
            _ if !self.production_date_fetched => ParameterIndex::PRODUCTION_DATE,
            _ => ParameterIndex::STATE_OF_CHARGE,
        }
    }

    /// Take the parameter at the current position and move on
    pub fn advance(&mut self) -> ParameterIndex {
        let parameter = self.peek();
        if parameter == ParameterIndex::PRODUCTION_DATE {
            self.production_date_fetched = true;
        }

        self.index += 1;
        if self.index > Self::LAST {
            self.index = 0;
        }
        parameter
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollState {
    #[default]
    Idle,
    /// Waiting for the period to elapse
    Armed,
    Requesting,
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollError<E> {
    Timer(TimerError),
    /// The request could not be queued, the cursor has moved on anyway
    Transmit { parameter: ParameterIndex, error: E },
}

impl<E> From<TimerError> for PollError<E> {
    fn from(error: TimerError) -> Self {
        PollError::Timer(error)
    }
}

pub struct Poller {
    config: PollerConfig,
    cursor: RequestCursor,
    state: PollState,
    redraw_needed: bool,
    requests_sent: u32,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            cursor: RequestCursor::new(),
            state: PollState::Idle,
            // first screen shows the zeroed reading
            redraw_needed: true,
            requests_sent: 0,
        }
    }

    /// Run one pass of the state machine.
    ///
    /// Returns the parameter requested in this pass, if the period had elapsed.
    pub fn poll<B: CanTransmit, const N: usize>(
        &mut self,
        timers: &mut TimerBank<N>,
        bus: &mut B,
    ) -> Result<Option<ParameterIndex>, PollError<B::Error>> {
        let PollerConfig {
            slot,
            granularity,
            send_period,
        } = self.config;

        loop {
            match self.state {
                PollState::Idle => {
                    timers.timer_mut(slot, granularity)?.arm();
                    self.state = PollState::Armed;
                }
                PollState::Armed => {
                    if !timers.timer_mut(slot, granularity)?.check(send_period) {
                        return Ok(None);
                    }
                    self.state = PollState::Requesting;
                }
                PollState::Requesting => {
                    let parameter = self.cursor.advance();
                    #[cfg(feature = "defmt")]
                    debug!("Requesting parameter {=u8:#04X}", parameter.as_raw());
                    let sent = bus.transmit(&encode_request(parameter));
                    if sent.is_ok() {
                        self.requests_sent = self.requests_sent.wrapping_add(1);
                    }

                    self.state = PollState::CoolingDown;
                    self.cool_down(timers)?;
                    return sent
                        .map(|()| Some(parameter))
                        .map_err(|error| PollError::Transmit { parameter, error });
                }
                PollState::CoolingDown => self.cool_down(timers)?,
            }
        }
    }

    /// Whether the screen should be redrawn, clears the request
    pub fn take_redraw(&mut self) -> bool {
        core::mem::take(&mut self.redraw_needed)
    }

    pub fn cursor(&self) -> &RequestCursor {
        &self.cursor
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Requests accepted by the transmit queue
    pub fn requests_sent(&self) -> u32 {
        self.requests_sent
    }

    fn cool_down<const N: usize>(&mut self, timers: &mut TimerBank<N>) -> Result<(), TimerError> {
        timers.reset(self.config.slot, self.config.granularity)?;
        self.redraw_needed = true;
        self.state = PollState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TickSource;
    use crate::transport::loopback::{LoopbackBus, QueueFull};
    use crate::transport::{AcceptanceFilter, Disposition, ReceiveQueue, Receiver};
    use crate::{BatteryReading, CanFrame, RESPONSE_ID};
    use assert2::{assert, let_assert};
    use embedded_can::StandardId;
    use std::vec::Vec;

    fn every_tick() -> PollerConfig {
        PollerConfig {
            slot: 0,
            granularity: Granularity::Millisecond,
            send_period: 1,
        }
    }

    /// Tick once, then poll until the poller sends
    fn next_request<const N: usize>(
        poller: &mut Poller,
        source: &TickSource,
        timers: &mut TimerBank<N>,
        bus: &mut LoopbackBus<16>,
    ) -> ParameterIndex {
        poller.poll(timers, bus).unwrap();
        source.toggle(Granularity::Millisecond);
        timers.observe(source);
        let_assert!(Ok(Some(parameter)) = poller.poll(timers, bus));
        parameter
    }

    #[test]
    fn cursor_cycle() {
        let mut cursor = RequestCursor::new();
        let first: Vec<u8> = (0..11).map(|_| cursor.advance().as_raw()).collect();
        assert!(first == [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x11]);
        assert!(cursor.index() == 0);
        assert!(cursor.production_date_fetched());

        let second: Vec<u8> = (0..11).map(|_| cursor.advance().as_raw()).collect();
        assert!(second == [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x14]);
        assert!(cursor.index() == 0);
    }

    #[test]
    fn production_date_is_requested_once() {
        let mut cursor = RequestCursor::new();
        let date_requests = (0..11 * 5)
            .map(|_| cursor.advance())
            .filter(|p| *p == ParameterIndex::PRODUCTION_DATE)
            .count();
        assert!(date_requests == 1);
    }

    #[test]
    fn waits_for_the_period() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<16>::new();
        let mut poller = Poller::new(PollerConfig {
            send_period: 3,
            ..every_tick()
        });

        for _ in 0..2 {
            assert!(poller.poll(&mut timers, &mut bus) == Ok(None));
            assert!(poller.state() == PollState::Armed);
            source.toggle(Granularity::Millisecond);
            timers.observe(&source);
        }
        assert!(poller.poll(&mut timers, &mut bus) == Ok(None));
        assert!(bus.is_empty());

        source.toggle(Granularity::Millisecond);
        timers.observe(&source);
        assert!(poller.poll(&mut timers, &mut bus) == Ok(Some(ParameterIndex(0))));
        assert!(poller.state() == PollState::Idle);
        assert!(timers.timer(0, Granularity::Millisecond).unwrap().ticks() == 0);
        assert!(bus.len() == 1);
    }

    #[test]
    fn requests_follow_the_cursor() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<16>::new();
        let mut poller = Poller::new(every_tick());

        for expected in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x11, 0, 1] {
            let parameter = next_request(&mut poller, &source, &mut timers, &mut bus);
            assert!(parameter == ParameterIndex(expected));
            let frame = bus.pop().unwrap();
            assert!(frame.data[3] == expected);
        }
        assert!(poller.requests_sent() == 13);
        assert!(poller.cursor().index() == 2);
    }

    #[test]
    fn redraw_after_every_request() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<16>::new();
        let mut poller = Poller::new(every_tick());

        assert!(poller.take_redraw());
        assert!(!poller.take_redraw());
        next_request(&mut poller, &source, &mut timers, &mut bus);
        assert!(poller.take_redraw());
        assert!(!poller.take_redraw());
    }

    #[test]
    fn full_bus_still_advances() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<1>::new();
        let mut poller = Poller::new(every_tick());

        for expected in 0..3u8 {
            poller.poll(&mut timers, &mut bus).ok();
            source.toggle(Granularity::Millisecond);
            timers.observe(&source);
            let result = poller.poll(&mut timers, &mut bus);
            if expected == 0 {
                assert!(result == Ok(Some(ParameterIndex(0))));
            } else {
                assert!(
                    result
                        == Err(PollError::Transmit {
                            parameter: ParameterIndex(expected),
                            error: QueueFull
                        })
                );
            }
        }
        assert!(poller.cursor().index() == 3);
        assert!(poller.requests_sent() == 1);
    }

    #[test]
    fn invalid_slot_is_reported() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<16>::new();
        let mut poller = Poller::new(PollerConfig {
            slot: 1,
            ..every_tick()
        });

        let_assert!(
            Err(PollError::Timer(TimerError::InvalidSlot(1))) = poller.poll(&mut timers, &mut bus)
        );
    }

    /// Answer a request the way the battery controller does
    fn respond(request: &CanFrame) -> Option<CanFrame> {
        let value: [u8; 4] = match request.data[3] {
            index @ 0..=8 => [0x0F, 0x50 + index, 0, 0],
            0x09 => [0x2E, 0xE0, 0, 0],
            0x11 => [0x20, 0x03, 0x10, 0x05],
            0x14 => [0x02, 0x3A, 0, 0],
            _ => return None,
        };
        let [a, b, c, d] = value;
        Some(CanFrame::from_payload(
            StandardId::new(RESPONSE_ID).unwrap(),
            &[0x07, 0x62, 0xD9, request.data[3], a, b, c, d],
        ))
    }

    #[test]
    fn full_cycle_over_loopback() {
        let source = TickSource::new();
        let mut timers = TimerBank::<1>::new(&source);
        let mut bus = LoopbackBus::<16>::new();
        let mut poller = Poller::new(every_tick());
        let reading = BatteryReading::default();
        let receiver = Receiver::new(AcceptanceFilter::exact(RESPONSE_ID), &reading);

        for _ in 0..22 {
            next_request(&mut poller, &source, &mut timers, &mut bus);
            while let Some(request) = bus.pop() {
                let response = respond(&request).unwrap();
                let_assert!(
                    Disposition::Decoded(_) = receiver.on_receive(ReceiveQueue::Primary, &response)
                );
            }
        }

        let snapshot = reading.snapshot();
        for (cell, millivolts) in snapshot.cell_millivolts.iter().enumerate() {
            assert!(*millivolts == 0x0F50 + cell as u16);
        }
        assert!(snapshot.high_voltage_centivolts == 12000);
        assert!(snapshot.production_date == 0x20 | 0x03 | 0x10 | 0x05);
        assert!(snapshot.state_of_charge_decipercent == 570);
        assert!(snapshot.last_parameter == Some(ParameterIndex::STATE_OF_CHARGE));
        assert!(receiver.discarded_frames() == 0);
    }

    #[test]
    fn period_in_milliseconds() {
        assert!(PollerConfig::default().period_millis() == 1000);
        let config = PollerConfig {
            granularity: Granularity::Decisecond,
            send_period: 10,
            ..Default::default()
        };
        assert!(config.period_millis() == 1000);
    }
}
