#![cfg_attr(not(test), no_std)]

mod graphics;

use core::fmt::Write;

use heapless::String;
use mhb_can_protocol::{BatterySnapshot, CELL_COUNT};

pub use graphics::GraphicsTextDisplay;

mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Width of the small font, values are placed right after their label
const SMALL_GLYPH_WIDTH: i32 = 6;
const ROW_HEIGHT: i32 = 10;
const RIGHT_COLUMN_X: i32 = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Font {
    /// 6x10 pixels, ten rows of text on a 64 pixel display
    Small,
    /// 10x20 pixels
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Color {
    /// Lit pixel
    White,
    Black,
}

/// Character oriented view of a small monochrome display
pub trait TextDisplay {
    type Error;

    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Top left corner of the next text
    fn set_cursor(&mut self, x: i32, y: i32);

    /// Draw at the cursor and move the cursor behind the text
    fn draw_text(&mut self, text: &str, font: Font, color: Color) -> Result<(), Self::Error>;

    /// Push the frame to the panel
    fn flush(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RenderError<E> {
    Display(E),
    /// Formatted value did not fit its buffer
    Format,
}

type ValueString = String<16>;

/// `raw / divisor` with a fixed number of decimals, without going through floats.
///
/// A zero divisor or a scale beyond `u32` is reported as a format error.
pub fn format_fixed(raw: u32, divisor: u32, decimals: u32) -> Result<ValueString, core::fmt::Error> {
    if divisor == 0 {
        return Err(core::fmt::Error);
    }
    let scale = 10u32.checked_pow(decimals).ok_or(core::fmt::Error)?;
    let fraction = (raw % divisor) as u64 * scale as u64 / divisor as u64;

    let mut text = ValueString::new();
    if decimals == 0 {
        write!(text, "{}", raw / divisor)?;
    } else {
        write!(
            text,
            "{}.{:0width$}",
            raw / divisor,
            fraction,
            width = decimals as usize
        )?;
    }
    Ok(text)
}

/// Millivolts as volts, `4000` becomes `4.000`
pub fn format_cell_voltage(millivolts: u16) -> Result<ValueString, core::fmt::Error> {
    format_fixed(millivolts as u32, 1000, 3)
}

/// Centivolts as volts, `12000` becomes `120.000`
pub fn format_high_voltage(centivolts: u16) -> Result<ValueString, core::fmt::Error> {
    format_fixed(centivolts as u32, 100, 3)
}

/// Tenths of a percent as percent, `100` becomes `10.0`
pub fn format_state_of_charge(decipercent: u16) -> Result<ValueString, core::fmt::Error> {
    format_fixed(decipercent as u32, 10, 1)
}

fn labelled<D: TextDisplay>(
    display: &mut D,
    x: i32,
    y: i32,
    label: &str,
    value: &str,
) -> Result<(), RenderError<D::Error>> {
    display.set_cursor(x, y);
    display
        .draw_text(label, Font::Small, Color::White)
        .map_err(RenderError::Display)?;
    display.set_cursor(x + label.len() as i32 * SMALL_GLYPH_WIDTH, y);
    display
        .draw_text(value, Font::Small, Color::White)
        .map_err(RenderError::Display)
}

/// Boot screen, shown until the first response arrives
pub fn draw_splash<D: TextDisplay>(display: &mut D) -> Result<(), RenderError<D::Error>> {
    display.clear().map_err(RenderError::Display)?;

    display.set_cursor(5, 10);
    display
        .draw_text("MAZDA CX-30", Font::Large, Color::White)
        .map_err(RenderError::Display)?;
    display.set_cursor(38, 33);
    display
        .draw_text("M-HYBRID", Font::Small, Color::White)
        .map_err(RenderError::Display)?;

    let mut version: String<32> = String::new();
    write!(
        &mut version,
        "v{} {:.7}{}",
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH.unwrap_or("unknown"),
        if built_info::GIT_DIRTY.unwrap_or(false) {
            "+"
        } else {
            ""
        }
    )
    .map_err(|_| RenderError::Format)?;
    display.set_cursor(0, 54);
    display
        .draw_text(version.as_str(), Font::Small, Color::White)
        .map_err(RenderError::Display)?;

    display.flush().map_err(RenderError::Display)
}

/// The single battery screen.
///
/// Left column cells 1-5 and the state of charge, right column cells 6-9
/// and the pack voltage.
pub fn draw_battery_screen<D: TextDisplay>(
    display: &mut D,
    snapshot: &BatterySnapshot,
) -> Result<(), RenderError<D::Error>> {
    display.clear().map_err(RenderError::Display)?;

    let mut label: String<8> = String::new();
    for (cell, millivolts) in snapshot.cell_millivolts.iter().enumerate() {
        let (x, row) = if cell < 5 {
            (0, cell)
        } else {
            (RIGHT_COLUMN_X, cell - 5)
        };
        label.clear();
        write!(&mut label, "C{}: ", cell + 1).map_err(|_| RenderError::Format)?;
        let value = format_cell_voltage(*millivolts).map_err(|_| RenderError::Format)?;
        labelled(display, x, row as i32 * ROW_HEIGHT, &label, &value)?;
    }

    let value = format_state_of_charge(snapshot.state_of_charge_decipercent)
        .map_err(|_| RenderError::Format)?;
    labelled(display, 0, 5 * ROW_HEIGHT, "SOC: ", &value)?;

    // seven characters, the label is kept short to stay inside 128 pixels
    let value =
        format_high_voltage(snapshot.high_voltage_centivolts).map_err(|_| RenderError::Format)?;
    let hv_row = (CELL_COUNT - 5) as i32;
    labelled(display, RIGHT_COLUMN_X, hv_row * ROW_HEIGHT, "V: ", &value)?;

    display.flush().map_err(RenderError::Display)
}
