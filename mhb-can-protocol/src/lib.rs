#![cfg_attr(not(test), no_std)]

//! Diagnostic protocol engine for the monitoring hybrid battery (MHB) controller.
//!
//! The battery controller answers `0x22 0xD9 <index>` read requests sent to
//! [`REQUEST_ID`] with a frame on [`RESPONSE_ID`] that echoes the parameter
//! index in byte 3 and carries the value in bytes 4..8.

pub mod battery;
pub mod can_frame;
pub mod poller;
pub mod timer;
pub mod transport;

use embedded_can::StandardId;

pub use battery::{BatteryReading, BatterySnapshot, ProductionDateDecoding, CELL_COUNT};
pub use can_frame::CanFrame;

/// Diagnostic request identifier of the battery controller
pub const REQUEST_ID: u16 = 0x723;
/// Identifier the battery controller responds on
pub const RESPONSE_ID: u16 = 0x72B;

pub const REQUEST_STD_ID: StandardId = match StandardId::new(REQUEST_ID) {
    Some(id) => id,
    None => panic!("request identifier exceeds 11 bits"),
};
pub const RESPONSE_STD_ID: StandardId = match StandardId::new(RESPONSE_ID) {
    Some(id) => id,
    None => panic!("response identifier exceeds 11 bits"),
};

/// Length, service and data identifier prefix of every request
pub const REQUEST_PREFIX: [u8; 3] = [0x03, 0x22, 0xD9];

/// Diagnostic parameter index, echoed by the responder in byte 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParameterIndex(pub u8);

impl ParameterIndex {
    /// Aggregate high voltage, right after the nine cells
    pub const HIGH_VOLTAGE: Self = Self(0x09);
    pub const PRODUCTION_DATE: Self = Self(0x11);
    pub const STATE_OF_CHARGE: Self = Self(0x14);

    /// Index of cell `n`, counted from zero
    pub const fn cell(n: u8) -> Self {
        Self(n)
    }

    pub const fn as_raw(self) -> u8 {
        self.0
    }
}

impl From<u8> for ParameterIndex {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

/// Decoded content of a single battery controller response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MhbData {
    /// Cell voltage in millivolts, cell counted from zero
    CellVoltage { cell: u8, millivolts: u16 },
    /// Pack voltage in centivolts
    HighVoltage(u16),
    /// State of charge in tenths of a percent
    StateOfCharge(u16),
    /// Production date raw word
    ProductionDate(u32),
}

impl MhbData {
    /// Parameter index this value answers
    pub fn parameter(&self) -> ParameterIndex {
        match self {
            MhbData::CellVoltage { cell, .. } => ParameterIndex::cell(*cell),
            MhbData::HighVoltage(_) => ParameterIndex::HIGH_VOLTAGE,
            MhbData::StateOfCharge(_) => ParameterIndex::STATE_OF_CHARGE,
            MhbData::ProductionDate(_) => ParameterIndex::PRODUCTION_DATE,
        }
    }
}

/// Decode the payload of a response frame.
///
/// The dispatch key is `payload[3]`. Unknown indices and payloads too short
/// for the addressed field yield `None`.
pub fn parse_mhb_response(
    payload: &[u8],
    date_decoding: ProductionDateDecoding,
) -> Option<MhbData> {
    let index = *payload.get(3)?;

    match index {
        0x14 => Some(MhbData::StateOfCharge(bytes_be_to_u16(payload.get(4..6)?)?)),
        0x00..=0x08 => Some(MhbData::CellVoltage {
            cell: index,
            millivolts: bytes_be_to_u16(payload.get(4..6)?)?,
        }),
        0x09 => Some(MhbData::HighVoltage(bytes_be_to_u16(payload.get(4..6)?)?)),
        0x11 => {
            let raw: [u8; 4] = payload.get(4..8)?.try_into().ok()?;
            Some(MhbData::ProductionDate(date_decoding.decode(raw)))
        }
        _ => None,
    }
}

/// Build the read request for `index`.
///
/// Any byte value is accepted, the responder decides what it knows.
pub fn encode_request(index: impl Into<ParameterIndex>) -> CanFrame {
    let [length, service, identifier] = REQUEST_PREFIX;
    CanFrame::from_payload(
        REQUEST_STD_ID,
        &[length, service, identifier, index.into().as_raw(), 0, 0, 0, 0],
    )
}

fn bytes_be_to_u16(bytes: &[u8]) -> Option<u16> {
    let arr: [u8; 2] = bytes.try_into().ok()?;
    Some(u16::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};
    use embedded_can::Id;

    #[test]
    fn cell_voltage() {
        let data = parse_mhb_response(
            &0x0000_0000_0FA0_0000_u64.to_be_bytes(),
            ProductionDateDecoding::default(),
        );
        assert!(data == Some(MhbData::CellVoltage { cell: 0, millivolts: 4000 }));
    }

    #[test]
    fn every_cell_index_maps_to_its_cell() {
        for cell in 0..=8u8 {
            let payload = [0x05, 0x62, 0xD9, cell, 0x0E, 0x10 + cell, 0, 0];
            let_assert!(
                Some(MhbData::CellVoltage { cell: decoded, millivolts }) =
                    parse_mhb_response(&payload, ProductionDateDecoding::default())
            );
            assert!(decoded == cell);
            assert!(millivolts == 0x0E10 + cell as u16);
        }
    }

    #[test]
    fn high_voltage() {
        let data = parse_mhb_response(
            &[0x05, 0x62, 0xD9, 0x09, 0x2E, 0xE0, 0, 0],
            ProductionDateDecoding::default(),
        );
        assert!(data == Some(MhbData::HighVoltage(12000)));
    }

    #[test]
    fn state_of_charge() {
        let data = parse_mhb_response(
            &[0, 0, 0, 0x14, 0x00, 0x64, 0, 0],
            ProductionDateDecoding::default(),
        );
        assert!(data == Some(MhbData::StateOfCharge(100)));
    }

    #[test]
    fn production_date_is_or_combined_by_default() {
        // likely not what the controller means, but existing readouts were
        // taken this way
        let data = parse_mhb_response(
            &[0, 0, 0, 0x11, 0x20, 0x03, 0x10, 0x05],
            ProductionDateDecoding::BitwiseOr,
        );
        assert!(data == Some(MhbData::ProductionDate(0x20 | 0x03 | 0x10 | 0x05)));
    }

    #[test]
    fn production_date_big_endian() {
        let data = parse_mhb_response(
            &[0, 0, 0, 0x11, 0x20, 0x03, 0x10, 0x05],
            ProductionDateDecoding::BigEndian,
        );
        assert!(data == Some(MhbData::ProductionDate(0x2003_1005)));
    }

    #[test]
    fn unknown_index_is_ignored() {
        for index in (0x0A..=0xFF).filter(|i| *i != 0x11 && *i != 0x14) {
            let payload = [0x05, 0x62, 0xD9, index, 0x12, 0x34, 0x56, 0x78];
            assert!(parse_mhb_response(&payload, ProductionDateDecoding::default()) == None);
        }
    }

    #[test]
    fn short_payload_is_ignored() {
        assert!(parse_mhb_response(&[], ProductionDateDecoding::default()) == None);
        let decoding = ProductionDateDecoding::default();
        assert!(parse_mhb_response(&[0, 0, 0, 0x00, 0x0F], decoding) == None);
        assert!(parse_mhb_response(&[0, 0, 0, 0x11, 1, 2, 3], decoding) == None);
    }

    #[test]
    fn request_layout() {
        for index in 0..=u8::MAX {
            let frame = encode_request(index);
            assert!(frame.id == Id::Standard(StandardId::new(0x723).unwrap()));
            assert!(!frame.remote);
            assert!(&frame.data[..3] == &[0x03, 0x22, 0xD9]);
            assert!(frame.data[3] == index);
            assert!(&frame.data[4..] == &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn identifiers_are_standard() {
        assert!(REQUEST_STD_ID.as_raw() == 0x723);
        assert!(RESPONSE_STD_ID.as_raw() == 0x72B);
        assert!(encode_request(0x14).id == Id::Standard(REQUEST_STD_ID));
    }

    #[test]
    fn decoded_value_reports_its_parameter() {
        assert!(MhbData::HighVoltage(1).parameter() == ParameterIndex::HIGH_VOLTAGE);
        assert!(MhbData::CellVoltage { cell: 4, millivolts: 1 }.parameter() == ParameterIndex(4));
    }
}
