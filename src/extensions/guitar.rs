use bitflags::bitflags;

use crate::dynamics::{Joystick, JoystickCalibration};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct GuitarButtons: u16 {
        const STRUM_UP = 0x0001;
        const YELLOW = 0x0008;
        const GREEN = 0x0010;
        const BLUE = 0x0020;
        const RED = 0x0040;
        const ORANGE = 0x0080;
        const PLUS = 0x0400;
        const MINUS = 0x1000;
        const STRUM_DOWN = 0x4000;
    }
}

// The guitar carries no calibration block; these are the factory ranges.
const JOYSTICK_CALIBRATION: JoystickCalibration = JoystickCalibration {
    min: (0x06, 0x05),
    center: (0x20, 0x20),
    max: (0x3A, 0x39),
};
const WHAMMY_MIN: u8 = 0x14;
const WHAMMY_MAX: u8 = 0x1F;

/// The guitar controller peripheral: fret and strum buttons, whammy bar and
/// a joystick.
#[derive(Debug)]
pub struct Guitar {
    pub joystick_calibration: JoystickCalibration,
    pub joystick: Joystick,
    /// Whammy bar travel in [0, 1].
    pub whammy: f32,
    pressed: GuitarButtons,
    held: GuitarButtons,
    released: GuitarButtons,
}

impl Default for Guitar {
    fn default() -> Self {
        Self {
            joystick_calibration: JOYSTICK_CALIBRATION,
            joystick: Joystick::default(),
            whammy: 0.0,
            pressed: GuitarButtons::default(),
            held: GuitarButtons::default(),
            released: GuitarButtons::default(),
        }
    }
}

impl Guitar {
    /// Decodes one 6-byte report block: joystick, whammy bar position and
    /// the active-low button word.
    pub(crate) fn decode(&mut self, data: &[u8]) {
        if data.len() < 6 {
            return;
        }
        self.joystick =
            Joystick::from_raw(&self.joystick_calibration, data[0] & 0x3F, data[1] & 0x3F);

        let whammy = (data[3] & 0x1F).clamp(WHAMMY_MIN, WHAMMY_MAX) - WHAMMY_MIN;
        self.whammy = f32::from(whammy) / f32::from(WHAMMY_MAX - WHAMMY_MIN);

        let now = GuitarButtons::from_bits_truncate(!u16::from_be_bytes([data[4], data[5]]));
        self.held = now.intersection(self.pressed);
        self.released = self.pressed.union(self.held).difference(now);
        self.pressed = now;
    }

    #[must_use]
    pub const fn pressed(&self) -> GuitarButtons {
        self.pressed
    }

    #[must_use]
    pub const fn held(&self) -> GuitarButtons {
        self.held
    }

    #[must_use]
    pub const fn released(&self) -> GuitarButtons {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frets_and_strum() {
        let mut guitar = Guitar::default();

        // Green fret (low byte bit 4) and strum down (high byte bit 6).
        let word: u16 = !(GuitarButtons::GREEN | GuitarButtons::STRUM_DOWN).bits();
        let data = [0x20, 0x20, 0x00, WHAMMY_MIN, (word >> 8) as u8, word as u8];
        guitar.decode(&data);
        assert_eq!(
            guitar.pressed(),
            GuitarButtons::GREEN | GuitarButtons::STRUM_DOWN
        );
        assert_eq!(guitar.whammy, 0.0);
    }

    #[test]
    fn test_whammy_range() {
        let mut guitar = Guitar::default();

        guitar.decode(&[0x20, 0x20, 0x00, WHAMMY_MAX, 0xFF, 0xFF]);
        assert_eq!(guitar.whammy, 1.0);

        // Below the mechanical minimum clamps to rest.
        guitar.decode(&[0x20, 0x20, 0x00, 0x02, 0xFF, 0xFF]);
        assert_eq!(guitar.whammy, 0.0);
    }

    #[test]
    fn test_joystick_uses_factory_range() {
        let mut guitar = Guitar::default();
        guitar.decode(&[0x3A, 0x20, 0x00, WHAMMY_MIN, 0xFF, 0xFF]);
        assert!((guitar.joystick.x - 1.0).abs() < 1e-4);
        assert!((guitar.joystick.angle - 90.0).abs() < 1e-4);
    }
}
