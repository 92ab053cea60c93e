mod balance_board;
mod classic;
mod guitar;
mod motion_sensor;
mod nunchuk;

pub use balance_board::{BalanceBoard, BalanceBoardCalibration, BalanceBoardData, WeightValues};
pub(crate) use balance_board::TEMPERATURE_ADDRESS as BOARD_TEMPERATURE_ADDRESS;
pub use classic::{ClassicButtons, ClassicController};
pub use guitar::{Guitar, GuitarButtons};
pub use motion_sensor::{GyroSample, MotionSensor, Passthrough};
pub use nunchuk::{Nunchuk, NunchukButtons};

/// Register holding the 6-byte identification block of an initialized
/// expansion.
pub(crate) const IDENTITY_ADDRESS: u32 = 0xA4_00FA;
/// First init register: writing 0x55 wakes the peripheral up unencrypted.
pub(crate) const INIT_REGISTER_1: u32 = 0xA4_00F0;
/// Second init register: writing 0x00 completes the init sequence.
pub(crate) const INIT_REGISTER_2: u32 = 0xA4_00FB;
/// Start of the peripheral calibration block.
pub(crate) const CALIBRATION_ADDRESS: u32 = 0xA4_0020;
/// Motion sensor activation register: writing 0x04 maps the sensor onto the
/// expansion bus, 0x05/0x07 select the pass-through modes.
pub(crate) const MOTION_SENSOR_ENABLE: u32 = 0xA6_00FE;

const IDENTITY_NUNCHUK: u32 = 0xA420_0000;
const IDENTITY_CLASSIC: u32 = 0xA420_0101;
const IDENTITY_GUITAR: u32 = 0xA420_0103;
const IDENTITY_BALANCE_BOARD: u32 = 0xA420_0402;
const IDENTITY_MOTION_SENSOR: u32 = 0xA420_0405;
const IDENTITY_MOTION_SENSOR_NUNCHUK: u32 = 0xA420_0505;
const IDENTITY_MOTION_SENSOR_CLASSIC: u32 = 0xA420_0705;

/// Assembles the identity word from the 6-byte identification block.
///
/// The first two bytes only distinguish hardware revisions and are left
/// out; the two interior bytes land in the high half of the word. This
/// byte-to-value assembly is a compatibility contract, the identity
/// constants above are written against it.
#[must_use]
pub fn assemble_identity(data: &[u8]) -> Option<u32> {
    if data.len() < 6 {
        return None;
    }
    Some(
        (u32::from(data[2]) << 24)
            | (u32::from(data[3]) << 16)
            | (u32::from(data[4]) << 8)
            | u32::from(data[5]),
    )
}

/// The kind of peripheral attached to the expansion port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionKind {
    Nunchuk,
    Classic,
    Guitar,
    BalanceBoard,
    MotionSensor,
    /// Motion sensor with a nunchuk sharing the pass-through channel.
    MotionSensorNunchuk,
    /// Motion sensor with a classic controller sharing the pass-through
    /// channel.
    MotionSensorClassic,
}

impl ExpansionKind {
    /// Classifies an identity word against the known peripherals.
    #[must_use]
    pub fn classify(identity: u32) -> Option<Self> {
        match identity {
            IDENTITY_NUNCHUK => Some(Self::Nunchuk),
            IDENTITY_CLASSIC => Some(Self::Classic),
            IDENTITY_GUITAR => Some(Self::Guitar),
            IDENTITY_BALANCE_BOARD => Some(Self::BalanceBoard),
            IDENTITY_MOTION_SENSOR => Some(Self::MotionSensor),
            IDENTITY_MOTION_SENSOR_NUNCHUK => Some(Self::MotionSensorNunchuk),
            IDENTITY_MOTION_SENSOR_CLASSIC => Some(Self::MotionSensorClassic),
            _ => None,
        }
    }
}

/// The peripheral currently attached to the expansion port.
///
/// Exactly one variant is active at a time. Switching variants goes through
/// [`Expansion::activate`], which starts from a fully zeroed sub-structure;
/// calibration never leaks between peripherals.
#[derive(Debug, Default)]
pub enum Expansion {
    #[default]
    None,
    Nunchuk(Nunchuk),
    Classic(ClassicController),
    Guitar(Guitar),
    BalanceBoard(BalanceBoard),
    MotionSensor(MotionSensor),
}

impl Expansion {
    /// Creates the zeroed variant for a freshly identified peripheral.
    #[must_use]
    pub(crate) fn activate(kind: ExpansionKind) -> Self {
        match kind {
            ExpansionKind::Nunchuk => Self::Nunchuk(Nunchuk::default()),
            ExpansionKind::Classic => Self::Classic(ClassicController::default()),
            ExpansionKind::Guitar => Self::Guitar(Guitar::default()),
            ExpansionKind::BalanceBoard => Self::BalanceBoard(BalanceBoard::default()),
            ExpansionKind::MotionSensor => Self::MotionSensor(MotionSensor::default()),
            ExpansionKind::MotionSensorNunchuk => {
                Self::MotionSensor(MotionSensor::with_passthrough(Passthrough::Nunchuk(
                    Nunchuk::default(),
                )))
            }
            ExpansionKind::MotionSensorClassic => {
                Self::MotionSensor(MotionSensor::with_passthrough(Passthrough::Classic(
                    ClassicController::default(),
                )))
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<ExpansionKind> {
        match self {
            Self::None => None,
            Self::Nunchuk(_) => Some(ExpansionKind::Nunchuk),
            Self::Classic(_) => Some(ExpansionKind::Classic),
            Self::Guitar(_) => Some(ExpansionKind::Guitar),
            Self::BalanceBoard(_) => Some(ExpansionKind::BalanceBoard),
            Self::MotionSensor(sensor) => Some(match sensor.passthrough {
                Passthrough::None => ExpansionKind::MotionSensor,
                Passthrough::Nunchuk(_) => ExpansionKind::MotionSensorNunchuk,
                Passthrough::Classic(_) => ExpansionKind::MotionSensorClassic,
            }),
        }
    }

    /// Decodes the expansion block of a data report into the active variant.
    pub(crate) fn decode(&mut self, data: &[u8], smoothing: Option<f32>) {
        match self {
            Self::None => {}
            Self::Nunchuk(nunchuk) => nunchuk.decode(data, smoothing),
            Self::Classic(classic) => classic.decode(data),
            Self::Guitar(guitar) => guitar.decode(data),
            Self::BalanceBoard(board) => board.decode(data),
            Self::MotionSensor(sensor) => sensor.decode(data, smoothing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_assembly() {
        // Plain motion sensor identification block.
        let block = [0x00, 0x00, 0xA4, 0x20, 0x04, 0x05];
        assert_eq!(assemble_identity(&block), Some(0xA420_0405));
        assert!(assemble_identity(&block[..4]).is_none());
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ExpansionKind::classify(0xA420_0000),
            Some(ExpansionKind::Nunchuk)
        );
        assert_eq!(
            ExpansionKind::classify(0xA420_0101),
            Some(ExpansionKind::Classic)
        );
        assert_eq!(
            ExpansionKind::classify(0xA420_0405),
            Some(ExpansionKind::MotionSensor)
        );
        assert_eq!(
            ExpansionKind::classify(0xA420_0505),
            Some(ExpansionKind::MotionSensorNunchuk)
        );
        assert_eq!(ExpansionKind::classify(0xDEAD_BEEF), None);
    }

    #[test]
    fn test_activation_resets_state() {
        let expansion = Expansion::activate(ExpansionKind::Nunchuk);
        assert_eq!(expansion.kind(), Some(ExpansionKind::Nunchuk));
        if let Expansion::Nunchuk(nunchuk) = expansion {
            assert!(!nunchuk.accel_calibration.is_populated());
            assert_eq!(nunchuk.joystick_calibration, Default::default());
        }

        let expansion = Expansion::activate(ExpansionKind::MotionSensorClassic);
        assert_eq!(expansion.kind(), Some(ExpansionKind::MotionSensorClassic));
    }
}
