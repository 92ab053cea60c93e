use crate::ir::IrFormat;
use crate::prelude::*;
use bitflags::bitflags;

const STATUS_ID: u8 = 0x20;
const READ_MEMORY_ID: u8 = 0x21;
const ACKNOWLEDGE_ID: u8 = 0x22;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const BATTERY_LOW = 0b0000_0001;
        const EXPANSION_CONNECTED = 0b0000_0010;
        const SPEAKER_ENABLED = 0b0000_0100;
        const IR_CAMERA_ENABLED = 0b0000_1000;
        const LED_1 = 0b0001_0000;
        const LED_2 = 0b0010_0000;
        const LED_3 = 0b0100_0000;
        const LED_4 = 0b1000_0000;
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ButtonFlags: u16 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const DOWN = 1 << 2;
        const UP = 1 << 3;
        const PLUS = 1 << 4;

        const TWO = 1 << 8;
        const ONE = 1 << 9;
        const B = 1 << 10;
        const A = 1 << 11;
        const MINUS = 1 << 12;

        const HOME = 1 << 15;
    }
}

impl ButtonFlags {
    /// Bits 5-6 of each button byte carry accelerometer data, bit 7 of the
    /// second byte is unused. Only these bits are actual buttons.
    pub const ALL: Self = Self::from_bits_retain(0b1001_1111_0001_1111);
}

#[repr(C, packed)]
#[derive(Debug)]
pub struct StatusData {
    buttons: ButtonFlags,
    flags: StatusFlags,
    _reserved: [u8; 2],
    battery_level: u8,
}

impl StatusData {
    /// Returns the core button data.
    #[must_use]
    pub const fn buttons(&self) -> ButtonFlags {
        self.buttons
    }

    /// Returns the status flags.
    #[must_use]
    pub const fn flags(&self) -> StatusFlags {
        self.flags
    }

    /// Returns the raw battery level, `0xC8` is fully charged.
    #[must_use]
    pub const fn battery_level(&self) -> u8 {
        self.battery_level
    }
}

#[repr(C, packed)]
#[derive(Debug)]
pub struct MemoryData {
    buttons: ButtonFlags,
    size_error_flags: u8,
    address: [u8; 2],
    pub data: [u8; 16],
}

impl MemoryData {
    /// Returns the core button data.
    #[must_use]
    pub const fn buttons(&self) -> ButtonFlags {
        self.buttons
    }

    /// Returns the size of the data in bytes.
    #[must_use]
    pub const fn size(&self) -> u8 {
        (self.size_error_flags >> 4) + 1
    }

    /// Returns the error flag.
    ///
    /// Known values:
    /// - 0: No error
    /// - 7: Attempted to read from a write-only register or a disconnected
    ///   expansion
    /// - 8: Attempted to read from a non-existing address
    #[must_use]
    pub const fn error_flag(&self) -> u8 {
        self.size_error_flags & 0x0F
    }

    /// Returns the 2 least significant bytes of the address of the first byte.
    #[must_use]
    pub const fn address_offset(&self) -> u16 {
        u16::from_be_bytes(self.address)
    }
}

#[repr(C, packed)]
#[derive(Debug)]
pub struct AcknowledgeData {
    buttons: ButtonFlags,
    report_number: u8,
    error_code: u8,
}

impl AcknowledgeData {
    /// Returns the core button data.
    #[must_use]
    pub const fn buttons(&self) -> ButtonFlags {
        self.buttons
    }

    /// Returns the id of the output report being acknowledged.
    #[must_use]
    pub const fn report_number(&self) -> u8 {
        self.report_number
    }

    /// Returns the error code, 0 on success.
    #[must_use]
    pub const fn error_code(&self) -> u8 {
        self.error_code
    }
}

#[repr(C, packed)]
#[derive(Debug)]
pub struct ReportData {
    pub data: [u8; 21],
}

impl ReportData {
    /// Returns the core button data.
    ///
    /// This is invalid for report mode 0x3D which only carries expansion data.
    #[must_use]
    pub const fn buttons(&self) -> ButtonFlags {
        let bits = u16::from_le_bytes([self.data[0], self.data[1]]);
        ButtonFlags::from_bits_retain(bits)
    }
}

/// Payload layout of one data-report mode.
///
/// Offsets are relative to the start of the payload (the two button bytes).
#[derive(Debug, Clone, Copy)]
pub struct ModeLayout {
    /// Payload carries an accelerometer sample at bytes 2-4.
    pub accel: bool,
    /// Offset and format of the IR dot block, if present.
    pub ir: Option<(usize, IrFormat)>,
    /// Offset and length of the expansion block, if present.
    pub extension: Option<(usize, usize)>,
}

/// Returns the payload layout for a data-report mode.
///
/// The interleaved modes 0x3E/0x3F spread one sample over two reports and
/// have no fixed single-report layout, they are handled separately.
#[must_use]
pub const fn mode_layout(mode: u8) -> Option<ModeLayout> {
    const fn layout(
        accel: bool,
        ir: Option<(usize, IrFormat)>,
        extension: Option<(usize, usize)>,
    ) -> Option<ModeLayout> {
        Some(ModeLayout {
            accel,
            ir,
            extension,
        })
    }

    match mode {
        0x30 => layout(false, None, None),
        0x31 => layout(true, None, None),
        0x32 => layout(false, None, Some((2, 8))),
        0x33 => layout(true, Some((5, IrFormat::Extended)), None),
        0x34 => layout(false, None, Some((2, 19))),
        0x35 => layout(true, None, Some((5, 16))),
        0x36 => layout(false, Some((2, IrFormat::Basic)), Some((12, 9))),
        0x37 => layout(true, Some((5, IrFormat::Basic)), Some((15, 6))),
        0x3D => layout(false, None, Some((0, 21))),
        _ => None,
    }
}

/// An input report represents the data sent from the remote to the host.
#[derive(Debug)]
pub enum InputReport {
    /// Status information report (ID 0x20).
    ///
    /// Can be requested with an `OutputReport::StatusRequest` and is sent
    /// unsolicited whenever an expansion is connected or disconnected.
    StatusInformation(StatusData),
    /// Read memory data report (ID 0x21).
    ///
    /// One 16-byte chunk of the answer to a read memory request.
    ReadMemory(MemoryData),
    /// Acknowledge report (ID 0x22).
    ///
    /// Sent as a response to an output report with the function result.
    Acknowledge(AcknowledgeData),
    /// Data report (IDs 0x30-0x3F).
    ///
    /// Carries buttons, accelerometer, IR and expansion data. The layout
    /// depends on the mode selected by `OutputReport::DataReportingMode`,
    /// see [`mode_layout`]. Defaults to 0x30, buttons only.
    DataReport(u8, ReportData),
}

macro_rules! transmute_data {
    ($value:expr, $type:ident) => {{
        const DATA_SIZE: usize = std::mem::size_of::<$type>();
        if $value.len() <= DATA_SIZE {
            return Err(ProtocolError::MissingData.into());
        }
        let mut slice = [0u8; DATA_SIZE];
        slice.copy_from_slice(&$value[1..=DATA_SIZE]);

        unsafe { std::mem::transmute::<[u8; DATA_SIZE], $type>(slice) }
    }};
}

impl InputReport {
    fn from_status_information(value: &[u8]) -> RemoteResult<Self> {
        let data = transmute_data!(value, StatusData);
        Ok(Self::StatusInformation(data))
    }

    fn from_read_memory_data(value: &[u8]) -> RemoteResult<Self> {
        let data = transmute_data!(value, MemoryData);
        Ok(Self::ReadMemory(data))
    }

    fn from_acknowledge(value: &[u8]) -> RemoteResult<Self> {
        let data = transmute_data!(value, AcknowledgeData);
        Ok(Self::Acknowledge(data))
    }

    fn from_data_report(value: &[u8]) -> Self {
        const DATA_SIZE: usize = 21;
        let mut data = [0u8; DATA_SIZE];
        let bytes_to_copy = usize::min(value.len() - 1, DATA_SIZE);
        data[..bytes_to_copy].copy_from_slice(&value[1..=bytes_to_copy]);

        Self::DataReport(value[0], ReportData { data })
    }
}

impl TryFrom<&[u8; REPORT_BUFFER_SIZE]> for InputReport {
    type Error = RemoteError;

    fn try_from(value: &[u8; REPORT_BUFFER_SIZE]) -> Result<Self, Self::Error> {
        let slice_without_length: &[u8] = value.as_slice();
        Self::try_from(slice_without_length)
    }
}

impl TryFrom<&[u8]> for InputReport {
    type Error = RemoteError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ProtocolError::MissingData.into());
        }
        match value[0] {
            STATUS_ID => Self::from_status_information(value),
            READ_MEMORY_ID => Self::from_read_memory_data(value),
            ACKNOWLEDGE_ID => Self::from_acknowledge(value),
            0x30..=0x3F => Ok(Self::from_data_report(value)),
            tag => Err(ProtocolError::UnknownReportTag(tag).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report() {
        let mut data = [0u8; REPORT_BUFFER_SIZE];
        data[0] = 0x20;
        data[1] = 0b0001_0100; // Plus and D-Pad down
        data[2] = 0b0000_0100; // B
        data[3] = 0b0010_0101; // Status (battery low, speaker, led 2)

        data[6] = 24; // Battery level

        let report = InputReport::try_from(&data).unwrap();

        assert!(matches!(report, InputReport::StatusInformation(_)));
        if let InputReport::StatusInformation(data) = report {
            assert_eq!(
                data.buttons().bits(),
                ButtonFlags::DOWN
                    .union(ButtonFlags::PLUS)
                    .union(ButtonFlags::B)
                    .bits()
            );
            assert_eq!(
                data.flags().bits(),
                StatusFlags::BATTERY_LOW
                    .union(StatusFlags::SPEAKER_ENABLED)
                    .union(StatusFlags::LED_2)
                    .bits()
            );
            assert_eq!(data.battery_level(), 24);
        }
    }

    #[test]
    fn test_read_memory_report() {
        let mut data = [0u8; REPORT_BUFFER_SIZE];
        data[0] = 0x21;
        data[1] = 0b0000_0000; // no button
        data[2] = 0b1000_0000; // Home
        data[3] = 0xF7; // Size and error flags
        data[4] = 0x12; // Address
        data[5] = 0xAB; // Address
        data[6..22].copy_from_slice(b"1234567890123456"); // Data

        let report = InputReport::try_from(&data).unwrap();

        assert!(matches!(report, InputReport::ReadMemory(_)));
        if let InputReport::ReadMemory(data) = report {
            assert_eq!(data.buttons().bits(), ButtonFlags::HOME.bits());
            assert_eq!(data.size(), 16);
            assert_eq!(data.error_flag(), 7);
            assert_eq!(data.address_offset(), 0x12AB);
            assert_eq!(data.data, *b"1234567890123456");
        }
    }

    #[test]
    fn test_acknowledge_report() {
        let data: &[u8] = &[
            0x22,
            0b0000_0000, // no button
            0b0000_0000, // no button
            0x16,        // report number
            0x04,        // error code
        ];

        let report = InputReport::try_from(data).unwrap();

        assert!(matches!(report, InputReport::Acknowledge(_)));
        if let InputReport::Acknowledge(data) = report {
            assert_eq!(data.buttons().bits(), 0);
            assert_eq!(data.report_number(), 0x16);
            assert_eq!(data.error_code(), 0x04);
        }
    }

    #[test]
    fn test_buttons_mode_0x30() {
        let data: &[u8] = &[
            0x30,
            0b0000_0001, // D-Pad left
            0b0000_0010, // One
        ];

        let report = InputReport::try_from(data).unwrap();

        assert!(matches!(report, InputReport::DataReport(0x30, _)));
        if let InputReport::DataReport(_, data) = report {
            assert_eq!(
                data.buttons().bits(),
                ButtonFlags::LEFT.union(ButtonFlags::ONE).bits()
            );
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let data: &[u8] = &[0x23, 0x00];
        assert!(matches!(
            InputReport::try_from(data),
            Err(RemoteError::Protocol(ProtocolError::UnknownReportTag(0x23)))
        ));
    }

    #[test]
    fn test_mode_layouts() {
        assert!(mode_layout(0x30).unwrap().extension.is_none());
        assert!(mode_layout(0x31).unwrap().accel);

        let full = mode_layout(0x37).unwrap();
        assert!(full.accel);
        assert_eq!(full.ir, Some((5, IrFormat::Basic)));
        assert_eq!(full.extension, Some((15, 6)));

        let extension_only = mode_layout(0x3D).unwrap();
        assert!(!extension_only.accel);
        assert_eq!(extension_only.extension, Some((0, 21)));

        assert!(mode_layout(0x3E).is_none());
        assert!(mode_layout(0x38).is_none());
    }
}
