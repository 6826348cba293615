use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::{parse_mhb_response, MhbData, ParameterIndex};

/// Number of monitored cells
pub const CELL_COUNT: usize = 9;

const NO_PARAMETER: u8 = u8::MAX;

/// How the four production date bytes are combined
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProductionDateDecoding {
    /// `b4 | b5 | b6 | b7`, matches readouts taken with earlier tooling
    #[default]
    BitwiseOr,
    /// `b4 b5 b6 b7` as big endian 32 bit word
    BigEndian,
}

impl ProductionDateDecoding {
    pub fn decode(self, bytes: [u8; 4]) -> u32 {
        match self {
            ProductionDateDecoding::BitwiseOr => bytes.iter().fold(0, |acc, b| acc | *b as u32),
            ProductionDateDecoding::BigEndian => u32::from_be_bytes(bytes),
        }
    }
}

/// Latest values reported by the battery controller.
///
/// Written from the receive path only, read by anything. Every field is a
/// single word sized atomic, readers may see one field a response newer
/// than another.
pub struct BatteryReading {
    cells: [AtomicU16; CELL_COUNT],
    high_voltage: AtomicU16,
    state_of_charge: AtomicU16,
    production_date: AtomicU32,
    last_parameter: AtomicU8,
    date_decoding: ProductionDateDecoding,
}

impl BatteryReading {
    pub const fn new(date_decoding: ProductionDateDecoding) -> Self {
        Self {
            cells: [const { AtomicU16::new(0) }; CELL_COUNT],
            high_voltage: AtomicU16::new(0),
            state_of_charge: AtomicU16::new(0),
            production_date: AtomicU32::new(0),
            last_parameter: AtomicU8::new(NO_PARAMETER),
            date_decoding,
        }
    }

    /// Decode a response payload and store the value it carries
    pub fn update(&self, payload: &[u8]) -> Option<MhbData> {
        let data = parse_mhb_response(payload, self.date_decoding)?;
        self.store(data);
        Some(data)
    }

    pub fn store(&self, data: MhbData) {
        match data {
            MhbData::CellVoltage { cell, millivolts } => {
                if let Some(slot) = self.cells.get(cell as usize) {
                    slot.store(millivolts, Ordering::Relaxed);
                }
            }
            MhbData::HighVoltage(centivolts) => {
                self.high_voltage.store(centivolts, Ordering::Relaxed)
            }
            MhbData::StateOfCharge(decipercent) => {
                self.state_of_charge.store(decipercent, Ordering::Relaxed)
            }
            MhbData::ProductionDate(raw) => self.production_date.store(raw, Ordering::Relaxed),
        }
        self.last_parameter
            .store(data.parameter().as_raw(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BatterySnapshot {
        let last_parameter = self.last_parameter.load(Ordering::Relaxed);
        BatterySnapshot {
            cell_millivolts: core::array::from_fn(|cell| self.cells[cell].load(Ordering::Relaxed)),
            high_voltage_centivolts: self.high_voltage.load(Ordering::Relaxed),
            state_of_charge_decipercent: self.state_of_charge.load(Ordering::Relaxed),
            production_date: self.production_date.load(Ordering::Relaxed),
            last_parameter: (last_parameter != NO_PARAMETER).then_some(ParameterIndex(last_parameter)),
        }
    }
}

impl Default for BatteryReading {
    fn default() -> Self {
        Self::new(ProductionDateDecoding::default())
    }
}

/// Copy of a [`BatteryReading`] in raw controller units
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BatterySnapshot {
    pub cell_millivolts: [u16; CELL_COUNT],
    pub high_voltage_centivolts: u16,
    pub state_of_charge_decipercent: u16,
    pub production_date: u32,
    /// Parameter of the most recent update, `None` before the first response
    pub last_parameter: Option<ParameterIndex>,
}

impl BatterySnapshot {
    pub fn cell_voltage(&self, cell: usize) -> Option<f32> {
        Some(*self.cell_millivolts.get(cell)? as f32 / 1000.0)
    }

    pub fn high_voltage(&self) -> f32 {
        self.high_voltage_centivolts as f32 / 100.0
    }

    pub fn state_of_charge(&self) -> f32 {
        self.state_of_charge_decipercent as f32 / 10.0
    }
}
