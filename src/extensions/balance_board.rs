use crate::calibration::remap;
use crate::result::{ProtocolError, RemoteResult};

/// Register holding the board's reference temperature.
pub(crate) const TEMPERATURE_ADDRESS: u32 = 0xA4_0060;

/// Factory calibration of the four load cells: raw readings at 0 kg, 17 kg
/// and 34 kg per cell, plus the battery and temperature reference points.
#[derive(Debug, Default, Clone)]
pub struct BalanceBoardCalibration {
    weights_0kg: WeightData,
    weights_17kg: WeightData,
    weights_34kg: WeightData,
    reference_battery: u8,
    reference_temperature: u8,
}

impl BalanceBoardCalibration {
    /// Builds the calibration from the 32-byte block at the calibration
    /// address and the 2-byte reference temperature register.
    ///
    /// The block carries a CRC32 over the calibration bytes, the two block
    /// header bytes and the temperature register.
    pub(crate) fn from_blocks(block: &[u8], temperature: &[u8]) -> RemoteResult<Self> {
        if block.len() < 32 || temperature.len() < 2 {
            return Err(ProtocolError::MissingData.into());
        }

        let mut checksum_data = [0u8; 4];
        checksum_data.copy_from_slice(&block[28..32]);
        let checksum = u32::from_be_bytes(checksum_data);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[4..28]);
        hasher.update(&block[..2]);
        hasher.update(&temperature[..2]);

        if hasher.finalize() != checksum {
            return Err(ProtocolError::InvalidChecksum.into());
        }

        Ok(Self {
            weights_0kg: WeightData::read(&block[4..12]).ok_or(ProtocolError::InvalidData)?,
            weights_17kg: WeightData::read(&block[12..20]).ok_or(ProtocolError::InvalidData)?,
            weights_34kg: WeightData::read(&block[20..28]).ok_or(ProtocolError::InvalidData)?,
            reference_battery: block[1],
            reference_temperature: temperature[0],
        })
    }

    /// Converts a raw reading to kg per load cell using the calibration.
    #[must_use]
    pub fn get_weights(&self, data: &BalanceBoardData) -> WeightValues {
        macro_rules! weight_value {
            ($position:ident) => {
                Self::get_weight_value(
                    data.weights.$position,
                    self.weights_0kg.$position,
                    self.weights_17kg.$position,
                    self.weights_34kg.$position,
                )
            };
        }

        let temperature_scale = data.temperature.map_or(1.0, |temperature| {
            let temp = f32::from(temperature) - f32::from(self.reference_temperature);
            0.999 * 0.0007f32.mul_add(-temp, 1.0)
        });

        WeightValues {
            top_right: weight_value!(top_right) * temperature_scale,
            bottom_right: weight_value!(bottom_right) * temperature_scale,
            top_left: weight_value!(top_left) * temperature_scale,
            bottom_left: weight_value!(bottom_left) * temperature_scale,
            battery: data
                .battery
                .map(|battery| battery.saturating_sub(self.reference_battery)),
        }
    }

    fn get_weight_value(value: u16, ref_0kg: u16, ref_17kg: u16, ref_34kg: u16) -> f32 {
        let value = f32::from(value);
        let ref_0kg = f32::from(ref_0kg);
        let ref_17kg = f32::from(ref_17kg);
        let ref_34kg = f32::from(ref_34kg);

        if value <= ref_0kg {
            0.0
        } else if value <= ref_17kg {
            remap(value, ref_0kg, ref_17kg, 0.0, 17.0)
        } else {
            remap(value, ref_17kg, ref_34kg, 17.0, 34.0)
        }
    }
}

/// Weight in kg per load cell.
#[derive(Debug, Default, Clone)]
pub struct WeightValues {
    pub top_right: f32,
    pub bottom_right: f32,
    pub top_left: f32,
    pub bottom_left: f32,
    /// Battery level above the reference point:
    /// - `0x00`: empty
    /// - `0x01` to `0x0E`: 1 bar
    /// - `0x0F` to `0x13`: 2 bars
    /// - `0x14` to `0x18`: 3 bars
    /// - `0x19` or greater: 4 bars
    pub battery: Option<u8>,
}

impl WeightValues {
    #[must_use]
    pub fn total(&self) -> f32 {
        self.top_right + self.bottom_right + self.top_left + self.bottom_left
    }
}

#[derive(Debug, Default, Clone)]
struct WeightData {
    top_right: u16,
    bottom_right: u16,
    top_left: u16,
    bottom_left: u16,
}

impl WeightData {
    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(Self {
            top_right: u16::from_be_bytes([data[0], data[1]]),
            bottom_right: u16::from_be_bytes([data[2], data[3]]),
            top_left: u16::from_be_bytes([data[4], data[5]]),
            bottom_left: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Raw load cell readings from one report block.
#[derive(Debug, Default, Clone)]
pub struct BalanceBoardData {
    weights: WeightData,
    temperature: Option<u8>,
    battery: Option<u8>,
}

/// The balance board peripheral. It presents itself as a remote with a
/// permanently attached expansion carrying four load cells.
#[derive(Debug, Default)]
pub struct BalanceBoard {
    pub calibration: BalanceBoardCalibration,
    /// Interpolated weights of the latest report.
    pub weights: WeightValues,
    raw: BalanceBoardData,
}

impl BalanceBoard {
    pub(crate) fn set_calibration(&mut self, calibration: BalanceBoardCalibration) {
        self.calibration = calibration;
    }

    /// Decodes one report block: four big-endian raw cell readings,
    /// followed by temperature and battery when the report is long enough.
    pub(crate) fn decode(&mut self, data: &[u8]) {
        let Some(weights) = WeightData::read(data) else {
            return;
        };
        self.raw = BalanceBoardData {
            weights,
            temperature: (data.len() > 8).then(|| data[8]),
            battery: (data.len() > 10).then(|| data[10]),
        };
        self.weights = self.calibration.get_weights(&self.raw);
    }
}
