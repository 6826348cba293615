//! Stand-in for the battery controller, answers diagnostic requests with a
//! slowly discharging and recharging pack.

use std::sync::Arc;

use mhb_can_protocol::{
    CanFrame, ParameterIndex, CELL_COUNT, REQUEST_ID, REQUEST_PREFIX, RESPONSE_STD_ID,
};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::bus::{from_socketcan, to_socketcan};

/// Positive response to read data by identifier
const RESPONSE_SERVICE: u8 = 0x62;
const LOWEST_CHARGE: u16 = 200;
const HIGHEST_CHARGE: u16 = 900;

pub struct BatteryEmulator {
    /// Tenths of a percent
    state_of_charge: u16,
    charging: bool,
    production_date: [u8; 4],
}

impl Default for BatteryEmulator {
    fn default() -> Self {
        Self {
            state_of_charge: 650,
            charging: false,
            production_date: [0x20, 0x21, 0x09, 0x14],
        }
    }
}

impl BatteryEmulator {
    pub fn cell_millivolts(&self, cell: usize) -> u16 {
        // 3.40 V empty to 4.15 V full, cells drift apart by a few millivolts
        3400 + self.state_of_charge * 3 / 4 + cell as u16 * 3
    }

    pub fn high_voltage_centivolts(&self) -> u16 {
        let total: u32 = (0..CELL_COUNT)
            .map(|cell| self.cell_millivolts(cell) as u32)
            .sum();
        (total / 10) as u16
    }

    pub fn state_of_charge(&self) -> u16 {
        self.state_of_charge
    }

    fn step(&mut self) {
        if self.state_of_charge <= LOWEST_CHARGE {
            self.charging = true;
        } else if self.state_of_charge >= HIGHEST_CHARGE {
            self.charging = false;
        }
        if self.charging {
            self.state_of_charge += 1;
        } else {
            self.state_of_charge -= 1;
        }
    }

    /// Answer for a request frame, `None` for anything the controller would not answer
    pub fn respond(&mut self, request: &CanFrame) -> Option<CanFrame> {
        if request.remote
            || request.standard_id() != Some(REQUEST_ID)
            || request.data.len() < 4
            || request.data[..3] != REQUEST_PREFIX
        {
            return None;
        }

        let parameter = ParameterIndex(request.data[3]);
        let mut payload = [0u8; CanFrame::MAX_LEN];
        payload[1] = RESPONSE_SERVICE;
        payload[2] = REQUEST_PREFIX[2];
        payload[3] = parameter.as_raw();

        let value = match parameter {
            ParameterIndex(cell @ 0x00..=0x08) => self.cell_millivolts(cell as usize),
            ParameterIndex::HIGH_VOLTAGE => self.high_voltage_centivolts(),
            ParameterIndex::STATE_OF_CHARGE => {
                self.step();
                self.state_of_charge
            }
            ParameterIndex::PRODUCTION_DATE => {
                payload[0] = 0x07;
                payload[4..].copy_from_slice(&self.production_date);
                return Some(self.response(payload));
            }
            ParameterIndex(other) => {
                debug!("No data for parameter {:#04X}", other);
                return None;
            }
        };

        payload[0] = 0x05;
        payload[4..6].copy_from_slice(&value.to_be_bytes());
        Some(self.response(payload))
    }

    fn response(&self, payload: [u8; CanFrame::MAX_LEN]) -> CanFrame {
        CanFrame::from_payload(RESPONSE_STD_ID, &payload)
    }
}

/// Listen on its own socket and answer every request seen on the bus
pub async fn run(
    socket: Arc<socketcan::tokio::AsyncCanSocket<socketcan::CanSocket>>,
    mut emulator: BatteryEmulator,
) {
    info!("Emulating the battery controller");
    loop {
        let frame = match socket.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                error!("Emulator failed to read CAN frame: {}", e);
                continue;
            }
        };
        let Some((_, request)) = from_socketcan(&frame) else {
            continue;
        };
        let Some(response) = emulator.respond(&request).as_ref().and_then(to_socketcan) else {
            continue;
        };
        trace!("Emulator answering {:?}", request);
        if let Err(e) = socket.write_frame(response).await {
            warn!("Emulator failed to send response: {}", e);
        }
    }
}
