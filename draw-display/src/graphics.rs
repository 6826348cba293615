use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};

use crate::{Color, Font, TextDisplay};

impl Font {
    pub fn mono_font(self) -> &'static MonoFont<'static> {
        match self {
            Font::Small => &FONT_6X10,
            Font::Large => &FONT_10X20,
        }
    }
}

impl From<Color> for BinaryColor {
    fn from(color: Color) -> Self {
        match color {
            Color::White => BinaryColor::On,
            Color::Black => BinaryColor::Off,
        }
    }
}

/// [`TextDisplay`] on top of any monochrome embedded-graphics target.
///
/// Targets with their own frame buffer (SSD1306 in buffered mode) pass a flush
/// function, everything else flushes as a no-op.
pub struct GraphicsTextDisplay<D: DrawTarget<Color = BinaryColor>> {
    target: D,
    cursor: Point,
    flush: fn(&mut D) -> Result<(), D::Error>,
}

impl<D: DrawTarget<Color = BinaryColor>> GraphicsTextDisplay<D> {
    pub fn new(target: D) -> Self {
        Self::with_flush(target, |_| Ok(()))
    }

    pub fn with_flush(target: D, flush: fn(&mut D) -> Result<(), D::Error>) -> Self {
        Self {
            target,
            cursor: Point::zero(),
            flush,
        }
    }

    pub fn cursor(&self) -> Point {
        self.cursor
    }

    pub fn inner(&self) -> &D {
        &self.target
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.target
    }

    pub fn into_inner(self) -> D {
        self.target
    }
}

impl<D: DrawTarget<Color = BinaryColor>> TextDisplay for GraphicsTextDisplay<D> {
    type Error = D::Error;

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.cursor = Point::zero();
        self.target.clear(BinaryColor::Off)
    }

    fn set_cursor(&mut self, x: i32, y: i32) {
        self.cursor = Point::new(x, y);
    }

    fn draw_text(&mut self, text: &str, font: Font, color: Color) -> Result<(), Self::Error> {
        let style = MonoTextStyle::new(font.mono_font(), color.into());
        self.cursor =
            Text::with_baseline(text, self.cursor, style, Baseline::Top).draw(&mut self.target)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (self.flush)(&mut self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{draw_battery_screen, draw_splash};
    use assert2::assert;
    use embedded_graphics::mock_display::MockDisplay;
    use mhb_can_protocol::BatterySnapshot;

    fn mock() -> MockDisplay<BinaryColor> {
        let mut display = MockDisplay::new();
        display.set_allow_overdraw(true);
        display
    }

    #[test]
    fn cursor_moves_behind_text() {
        let mut display = GraphicsTextDisplay::new(mock());
        display.set_cursor(0, 0);
        display.draw_text("C1: ", Font::Small, Color::White).unwrap();
        assert!(display.cursor() == Point::new(24, 0));

        display.set_cursor(5, 10);
        display.draw_text("MAZDA", Font::Large, Color::White).unwrap();
        assert!(display.cursor() == Point::new(55, 10));
    }

    #[test]
    fn text_is_drawn_below_cursor() {
        let mut display = GraphicsTextDisplay::new(mock());
        display.set_cursor(0, 0);
        display.draw_text("8", Font::Small, Color::White).unwrap();

        let area = display.inner().affected_area();
        assert!(area.top_left.y >= 0);
        assert!(area.bottom_right().map(|p| p.y < 10) == Some(true));
    }

    /// 128x64 panel that remembers the lowest and rightmost lit pixel
    #[derive(Default)]
    struct Panel {
        corner: Point,
    }

    impl OriginDimensions for Panel {
        fn size(&self) -> Size {
            Size::new(128, 64)
        }
    }

    impl DrawTarget for Panel {
        type Color = BinaryColor;
        type Error = core::convert::Infallible;

        fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where
            I: IntoIterator<Item = Pixel<Self::Color>>,
        {
            for Pixel(point, color) in pixels {
                if color == BinaryColor::On {
                    self.corner = self.corner.component_max(point);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn battery_screen_fits_on_the_display() {
        let mut display = GraphicsTextDisplay::new(Panel::default());
        let snapshot = BatterySnapshot {
            cell_millivolts: [4200; 9],
            high_voltage_centivolts: 50_000,
            state_of_charge_decipercent: 1000,
            ..BatterySnapshot::default()
        };
        draw_battery_screen(&mut display, &snapshot).unwrap();

        let corner = display.inner().corner;
        assert!(corner.x < 128);
        assert!(corner.y < 64);
        assert!(corner.x > 100);
    }

    #[test]
    fn splash_fits_on_the_display() {
        let mut display = GraphicsTextDisplay::new(Panel::default());
        draw_splash(&mut display).unwrap();

        let corner = display.inner().corner;
        assert!(corner.x < 128);
        assert!(corner.y < 64);
    }

    #[test]
    fn flush_reaches_the_target() {
        let mut display = GraphicsTextDisplay::with_flush(mock(), |target| {
            Pixel(Point::new(63, 63), BinaryColor::On).draw(target)
        });
        display.flush().unwrap();
        assert!(display.into_inner().get_pixel(Point::new(63, 63)) == Some(BinaryColor::On));
    }
}
