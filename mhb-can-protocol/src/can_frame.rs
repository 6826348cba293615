use core::fmt::{Debug, Formatter};

use embedded_can::Id;

/// CAN frame consisting of ID, data and the remote transmission request flag
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// The ID of the frame
    pub id: Id,
    /// The payload of the frame, empty for remote frames
    pub data: heapless::Vec<u8, { Self::MAX_LEN }>,
    /// Remote transmission request
    pub remote: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// More than eight data bytes were supplied
    PayloadTooLong(usize),
}

#[cfg(feature = "arbitrary")]
use embedded_can::{ExtendedId, StandardId};
#[cfg(feature = "arbitrary")]
impl arbitrary::Arbitrary<'_> for CanFrame {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let raw: u32 = u.int_in_range(0..=ExtendedId::MAX.as_raw())?;
        let id = if raw <= StandardId::MAX.as_raw() as u32 {
            Id::Standard(StandardId::new(raw as u16).ok_or(arbitrary::Error::IncorrectFormat)?)
        } else {
            Id::Extended(ExtendedId::new(raw).ok_or(arbitrary::Error::IncorrectFormat)?)
        };
        let remote = u.arbitrary()?;
        let data_len = if remote {
            0
        } else {
            u.int_in_range(0..=Self::MAX_LEN as u8)?
        };
        let mut data = heapless::Vec::new();
        for _ in 0..data_len {
            data.push(u.arbitrary()?)
                .map_err(|_| arbitrary::Error::IncorrectFormat)?;
        }
        Ok(Self { id, data, remote })
    }
}

impl CanFrame {
    pub const MAX_LEN: usize = 8;

    /// Wrap a full eight byte payload, the shape of every diagnostic frame on this bus
    pub fn from_payload(id: impl Into<Id>, payload: &[u8; Self::MAX_LEN]) -> Self {
        let mut data = heapless::Vec::new();
        // capacity equals payload length
        let _ = data.extend_from_slice(payload);
        Self {
            id: id.into(),
            data,
            remote: false,
        }
    }

    /// Wrap an already encoded data frame of arbitrary length
    pub fn from_encoded(id: impl Into<Id>, data: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            id: id.into(),
            data: heapless::Vec::from_slice(data)
                .map_err(|_| FrameError::PayloadTooLong(data.len()))?,
            remote: false,
        })
    }

    /// Remote transmission request without payload
    pub fn remote_request(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            data: heapless::Vec::new(),
            remote: true,
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self.id, Id::Standard(_))
    }

    /// The 11 bit identifier, `None` for extended frames
    pub fn standard_id(&self) -> Option<u16> {
        match self.id {
            Id::Standard(id) => Some(id.as_raw()),
            Id::Extended(_) => None,
        }
    }
}

impl Debug for CanFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        struct DebugId(Id);
        impl Debug for DebugId {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                match self.0 {
                    Id::Extended(e) => f.write_fmt(format_args!("{:#010X}", e.as_raw())),
                    Id::Standard(s) => f.write_fmt(format_args!("{:#05X}", s.as_raw())),
                }
            }
        }

        struct DebugData<'a>(&'a [u8]);
        impl Debug for DebugData<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                let mut list = f.debug_list();
                for &elem in self.0 {
                    list.entry(&format_args!("{:#04X}", elem));
                }
                list.finish()
            }
        }

        let mut debug = f.debug_struct("CanFrame");
        debug
            .field("id", &DebugId(self.id))
            .field("data", &DebugData(&self.data));
        if self.remote {
            debug.field("remote", &self.remote);
        }
        debug.finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, fmt: defmt::Formatter) {
        struct DebugId(Id);
        impl defmt::Format for DebugId {
            fn format(&self, fmt: defmt::Formatter) {
                match self.0 {
                    Id::Extended(e) => defmt::write!(fmt, "{=u32:#010X}", e.as_raw()),
                    Id::Standard(s) => defmt::write!(fmt, "{=u16:#05X}", s.as_raw()),
                }
            }
        }

        defmt::write!(
            fmt,
            "CanFrame {{ id: {}, data: {=[u8]:#04X}, remote: {=bool} }}",
            &DebugId(self.id),
            &self.data,
            self.remote
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};
    use embedded_can::{ExtendedId, StandardId};
    use std::format;

    fn ext(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::from_encoded(ExtendedId::new(id).unwrap(), data).unwrap()
    }

    fn std(id: u16, data: &[u8]) -> CanFrame {
        CanFrame::from_encoded(StandardId::new(id).unwrap(), data).unwrap()
    }

    #[test]
    fn debug_formats_nicely() {
        let debug = format!("{:?}", ext(0x2A, &[]));
        assert!(debug == "CanFrame { id: 0x0000002A, data: [] }");

        let debug = format!("{:?}", std(0x72B, &[0x03, 0x62, 0xD9, 0x00, 0x0F, 0xA0]));
        assert!(debug == "CanFrame { id: 0x72B, data: [0x03, 0x62, 0xD9, 0x00, 0x0F, 0xA0] }");

        let debug = format!(
            "{:?}",
            CanFrame::remote_request(StandardId::new(0x723).unwrap())
        );
        assert!(debug == "CanFrame { id: 0x723, data: [], remote: true }");
    }

    #[test]
    fn rejects_oversized_payload() {
        let_assert!(
            Err(FrameError::PayloadTooLong(9)) =
                CanFrame::from_encoded(StandardId::new(0x72B).unwrap(), &[0; 9])
        );
    }

    #[test]
    fn standard_id_is_only_reported_for_base_frames() {
        assert!(std(0x72B, &[]).standard_id() == Some(0x72B));
        assert!(std(0x72B, &[]).is_standard());
        assert!(ext(0x72B, &[]).standard_id() == None);
        assert!(!ext(0x72B, &[]).is_standard());
    }
}
