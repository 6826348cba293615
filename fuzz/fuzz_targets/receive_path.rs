#![no_main]

use libfuzzer_sys::fuzz_target;
use mhb_can_protocol::transport::{AcceptanceFilter, ReceiveQueue, Receiver};
use mhb_can_protocol::{BatteryReading, CanFrame, ProductionDateDecoding, RESPONSE_ID};

// Neither the receive path nor the decoder may panic, whatever arrives on the bus
fuzz_target!(|input: (bool, bool, CanFrame)| {
    let (secondary, big_endian_date, frame) = input;
    let decoding = if big_endian_date {
        ProductionDateDecoding::BigEndian
    } else {
        ProductionDateDecoding::BitwiseOr
    };
    let battery = BatteryReading::new(decoding);
    let receiver = Receiver::new(AcceptanceFilter::exact(RESPONSE_ID), &battery);

    let queue = if secondary {
        ReceiveQueue::Secondary
    } else {
        ReceiveQueue::Primary
    };
    let _ = receiver.on_receive(queue, &frame);
    let _ = battery.snapshot();
});
