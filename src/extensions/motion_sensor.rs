use crate::dynamics::{angular_rate_axis, AngularRate};

/// Raw 14-bit gyroscope readings, one per rotation axis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GyroSample {
    pub yaw: u16,
    pub roll: u16,
    pub pitch: u16,
}

impl GyroSample {
    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// The peripheral sharing the motion sensor's pass-through channel.
#[derive(Debug, Default)]
pub enum Passthrough {
    #[default]
    None,
    Nunchuk(super::Nunchuk),
    Classic(super::ClassicController),
}

// A resting gyro reads near 0x1F7F on every axis. The first frame with all
// three axes above this sentinel (and below full scale) while no calibration
// was recorded yet is taken as the zero-rate point.
const CALIBRATION_SENTINEL: u16 = 5000;
const RAW_FULL_SCALE: u16 = 0x3FFF;

/// The motion-sensing gyroscope add-on.
///
/// Frames on the expansion channel either carry a gyroscope sample or, in
/// pass-through mode, a sample of the nested peripheral; bit 1 of the last
/// byte tags which one.
#[derive(Debug, Default)]
pub struct MotionSensor {
    pub raw: GyroSample,
    /// Zero-rate calibration latched from the first resting frame.
    pub calibration: GyroSample,
    pub angular_rate: AngularRate,
    /// Fast/slow mode code: bit 2 roll, bit 1 pitch, bit 0 yaw. A set bit
    /// means the axis rotates slowly (or not at all) and reports at the
    /// fine raw scale.
    pub speed_mode: u8,
    /// Whether a peripheral is plugged into the pass-through port.
    pub port_present: bool,
    pub passthrough: Passthrough,
}

impl MotionSensor {
    #[must_use]
    pub(crate) fn with_passthrough(passthrough: Passthrough) -> Self {
        Self {
            passthrough,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn roll_slow(&self) -> bool {
        self.speed_mode & 0b100 != 0
    }

    #[must_use]
    pub const fn pitch_slow(&self) -> bool {
        self.speed_mode & 0b010 != 0
    }

    #[must_use]
    pub const fn yaw_slow(&self) -> bool {
        self.speed_mode & 0b001 != 0
    }

    /// Decodes one 6-byte frame from the expansion channel.
    pub(crate) fn decode(&mut self, data: &[u8], smoothing: Option<f32>) {
        if data.len() < 6 {
            return;
        }
        if data[5] & 0x02 != 0 {
            self.decode_gyro(data);
        } else {
            match &mut self.passthrough {
                Passthrough::None => {}
                Passthrough::Nunchuk(nunchuk) => nunchuk.decode_passthrough(data, smoothing),
                Passthrough::Classic(classic) => classic.decode_passthrough(data),
            }
        }
    }

    /// A gyroscope frame: the high 8 bits of each axis in the first three
    /// bytes, the low 6 bits in the upper halves of the last three, with the
    /// mode and port bits tucked into the freed low ends.
    fn decode_gyro(&mut self, data: &[u8]) {
        self.speed_mode = ((data[4] & 0x02) << 1) | (data[3] & 0x03);
        self.port_present = data[4] & 0x01 != 0;

        self.raw = GyroSample {
            yaw: (u16::from(data[3] & 0xFC) << 6) | u16::from(data[0]),
            roll: (u16::from(data[4] & 0xFC) << 6) | u16::from(data[1]),
            pitch: (u16::from(data[5] & 0xFC) << 6) | u16::from(data[2]),
        };

        if self.calibration.is_zero() && self.resting_frame() {
            self.calibration = self.raw;
        }

        self.angular_rate = AngularRate {
            roll: angular_rate_axis(self.raw.roll, self.calibration.roll, self.roll_slow()),
            pitch: angular_rate_axis(self.raw.pitch, self.calibration.pitch, self.pitch_slow()),
            yaw: angular_rate_axis(self.raw.yaw, self.calibration.yaw, self.yaw_slow()),
        };
    }

    fn resting_frame(&self) -> bool {
        let axes = [self.raw.yaw, self.raw.roll, self.raw.pitch];
        axes.iter()
            .all(|&axis| axis > CALIBRATION_SENTINEL && axis < RAW_FULL_SCALE)
    }
}
