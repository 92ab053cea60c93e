use bitflags::bitflags;

use crate::dynamics::{
    calculate_orientation, AccelCalibration, AccelSample, GravityForce, Joystick,
    JoystickCalibration, Orientation,
};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct NunchukButtons: u8 {
        const Z = 0x01;
        const C = 0x02;
    }
}

/// The analog joystick peripheral with its own accelerometer and the C/Z
/// trigger buttons.
#[derive(Debug, Default)]
pub struct Nunchuk {
    pub accel_calibration: AccelCalibration,
    pub joystick_calibration: JoystickCalibration,
    pub joystick: Joystick,
    pub accel: AccelSample,
    pub orientation: Orientation,
    pub gravity: GravityForce,
    pressed: NunchukButtons,
    held: NunchukButtons,
    released: NunchukButtons,
}

impl Nunchuk {
    /// Parses the peripheral calibration block: accelerometer zero and 1g
    /// points like the remote's own block, followed by the joystick extremes
    /// and rest position.
    pub(crate) fn parse_calibration(&mut self, data: &[u8]) {
        if data.len() < 14 {
            return;
        }
        if let Some(calibration) = AccelCalibration::from_factory_block(data) {
            self.accel_calibration = calibration;
        }
        self.joystick_calibration = JoystickCalibration {
            max: (data[8], data[11]),
            min: (data[9], data[12]),
            center: (data[10], data[13]),
        };
    }

    /// Decodes one 6-byte report block. The last byte packs the low
    /// accelerometer bits and the two buttons, buttons are active low.
    pub(crate) fn decode(&mut self, data: &[u8], smoothing: Option<f32>) {
        if data.len() < 6 {
            return;
        }
        let accel = AccelSample {
            x: (u16::from(data[2]) << 2) | (u16::from(data[5]) >> 2 & 0b11),
            y: (u16::from(data[3]) << 2) | (u16::from(data[5]) >> 4 & 0b11),
            z: (u16::from(data[4]) << 2) | (u16::from(data[5]) >> 6 & 0b11),
        };
        let buttons = NunchukButtons::from_bits_truncate(!data[5] & 0x03);
        self.update(data[0], data[1], accel, buttons, smoothing);
    }

    /// Decodes a pass-through frame. The shared channel relocates the
    /// button bits and drops the lowest accelerometer bit of each axis.
    pub(crate) fn decode_passthrough(&mut self, data: &[u8], smoothing: Option<f32>) {
        if data.len() < 6 {
            return;
        }
        let accel = AccelSample {
            x: (u16::from(data[2]) << 2) | (u16::from(data[5]) >> 3 & 0b10),
            y: (u16::from(data[3]) << 2) | (u16::from(data[5]) >> 4 & 0b10),
            z: (u16::from(data[4] & 0xFE) << 2) | (u16::from(data[5]) >> 5 & 0b110),
        };
        let mut buttons = NunchukButtons::empty();
        if data[5] & 0x04 == 0 {
            buttons |= NunchukButtons::Z;
        }
        if data[5] & 0x08 == 0 {
            buttons |= NunchukButtons::C;
        }
        self.update(data[0], data[1], accel, buttons, smoothing);
    }

    fn update(
        &mut self,
        stick_x: u8,
        stick_y: u8,
        accel: AccelSample,
        buttons: NunchukButtons,
        smoothing: Option<f32>,
    ) {
        self.joystick = Joystick::from_raw(&self.joystick_calibration, stick_x, stick_y);
        self.accel = accel;
        self.gravity = self.accel_calibration.gravity_force(&accel);
        calculate_orientation(
            &self.accel_calibration,
            &accel,
            &mut self.orientation,
            smoothing,
        );

        self.held = buttons.intersection(self.pressed);
        self.released = self.pressed.union(self.held).difference(buttons);
        self.pressed = buttons;
    }

    #[must_use]
    pub const fn pressed(&self) -> NunchukButtons {
        self.pressed
    }

    #[must_use]
    pub const fn held(&self) -> NunchukButtons {
        self.held
    }

    #[must_use]
    pub const fn released(&self) -> NunchukButtons {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated() -> Nunchuk {
        let mut nunchuk = Nunchuk::default();
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&[0x80, 0x80, 0x80, 0x00, 0xB0, 0xB0, 0xB0, 0x00]);
        block[8..14].copy_from_slice(&[0xE0, 0x20, 0x80, 0xE0, 0x20, 0x80]);
        nunchuk.parse_calibration(&block);
        nunchuk
    }

    #[test]
    fn test_calibration_parse() {
        let nunchuk = calibrated();
        assert_eq!(nunchuk.accel_calibration.x_zero, 0x80);
        assert_eq!(nunchuk.accel_calibration.z_gravity, 0xB0);
        assert_eq!(nunchuk.joystick_calibration.center, (0x80, 0x80));
        assert_eq!(nunchuk.joystick_calibration.max, (0xE0, 0xE0));
    }

    #[test]
    fn test_decode_buttons_active_low() {
        let mut nunchuk = calibrated();

        // Bits 0-1 clear: both buttons pressed.
        nunchuk.decode(&[0x80, 0x80, 0x80, 0x80, 0xB0, 0b0000_0000], None);
        assert_eq!(nunchuk.pressed(), NunchukButtons::Z | NunchukButtons::C);

        // Bits 0-1 set: released.
        nunchuk.decode(&[0x80, 0x80, 0x80, 0x80, 0xB0, 0b0000_0011], None);
        assert_eq!(nunchuk.pressed(), NunchukButtons::empty());
        assert_eq!(nunchuk.released(), NunchukButtons::Z | NunchukButtons::C);
    }

    #[test]
    fn test_decode_accel_and_joystick() {
        let mut nunchuk = calibrated();

        // Stick pushed straight up, accelerometer at one gravity on Z with
        // low bits 0b11 for Z folded into byte 5 bits 6-7.
        nunchuk.decode(&[0x80, 0xE0, 0x80, 0x80, 0xB0, 0b1100_0011], None);
        assert_eq!(nunchuk.joystick.angle, 0.0);
        assert!((nunchuk.joystick.magnitude - 1.0).abs() < 1e-4);
        assert_eq!(nunchuk.accel.z, (0xB0 << 2) | 0b11);
        // 707 raw against zero 512 and 1g 704: slightly above one gravity.
        assert!((nunchuk.gravity.z - 195.0 / 192.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_passthrough_unswizzles_buttons() {
        let mut nunchuk = calibrated();

        // Z at bit 2, C at bit 3, active low: only Z pressed.
        nunchuk.decode_passthrough(&[0x80, 0x80, 0x80, 0x80, 0xB0, 0b0000_1000], None);
        assert_eq!(nunchuk.pressed(), NunchukButtons::Z);

        // Accelerometer Z loses its lowest bit in pass-through framing.
        assert_eq!(nunchuk.accel.z, u16::from(0xB0u8 & 0xFE) << 2);
    }
}
