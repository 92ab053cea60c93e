use crate::prelude::*;
use bitflags::bitflags;

const RUMBLE_ID: u8 = 0x10;
const PLAYER_LED_ID: u8 = 0x11;
const DATA_REPORTING_MODE_ID: u8 = 0x12;
const IR_CAMERA_ENABLE_ID: u8 = 0x13;
const SPEAKER_ENABLE_ID: u8 = 0x14;
const STATUS_REQUEST_ID: u8 = 0x15;
pub(crate) const WRITE_MEMORY_ID: u8 = 0x16;
const READ_MEMORY_ID: u8 = 0x17;
const SPEAKER_DATA_ID: u8 = 0x18;
const SPEAKER_MUTE_ID: u8 = 0x19;
const IR_CAMERA_ENABLE_2_ID: u8 = 0x1A;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct PlayerLedFlags: u8 {
        const LED_1 = 0b0001_0000;
        const LED_2 = 0b0010_0000;
        const LED_3 = 0b0100_0000;
        const LED_4 = 0b1000_0000;
    }
}

/// Input report mode requested from the remote, see report ids `0x30..=0x3F`.
#[derive(Debug, Clone, Copy)]
pub struct DataReportingMode {
    /// Report on every transmission cycle instead of only on change.
    pub continuous: bool,
    pub mode: u8,
}

/// Target of a memory read or write request.
///
/// The remote exposes two address spaces: its EEPROM and the memory-mapped
/// peripheral registers. The space is selected by a control bit sent with
/// the 3-byte big-endian address.
#[derive(Debug, Clone, Copy)]
pub struct Addressing {
    /// If true, access peripheral registers, otherwise EEPROM.
    registers: bool,
    pub(crate) address: u32,
    pub(crate) size: u16,
}

impl Addressing {
    #[must_use]
    pub const fn registers(address: u32, size: u16) -> Self {
        Self {
            registers: true,
            address,
            size,
        }
    }

    #[must_use]
    pub const fn eeprom(address: u32, size: u16) -> Self {
        Self {
            registers: false,
            address,
            size,
        }
    }
}

/// An output report carries one command from the host to the remote.
///
/// The least significant bit of the first payload byte of every output
/// report drives the rumble motor, so the current rumble state is re-sent
/// with each command.
#[derive(Debug)]
pub enum OutputReport {
    /// Turn rumble on or off without any other change.
    Rumble(bool),
    /// Set the player LED lights.
    PlayerLed(PlayerLedFlags),
    /// Select the input report mode.
    DataReportingMode(DataReportingMode),
    /// Enable or disable the IR camera clock (first half of the enable pair).
    IrCameraEnable(bool),
    /// Enable or disable the built-in speaker.
    SpeakerEnable(bool),
    /// Request a status input report.
    StatusRequest,
    /// Write up to 16 bytes to EEPROM or a peripheral register block.
    WriteMemory(Addressing, [u8; 16]),
    /// Read from EEPROM or a peripheral register block. The remote answers
    /// with one or more read-data input reports of up to 16 bytes each.
    ReadMemory(Addressing),
    /// Push samples to the built-in speaker. The first value is the number
    /// of valid bytes in the packet.
    SpeakerData(u8, [u8; 20]),
    /// Mute or unmute the built-in speaker.
    SpeakerMute(bool),
    /// Enable or disable the IR camera logic (second half of the enable pair).
    IrCameraEnable2(bool),
}

impl OutputReport {
    /// Converts the output report to a byte array, folding in the rumble
    /// state.
    ///
    /// Returns the byte array and the actual length of the data.
    #[must_use]
    pub fn to_array(&self, rumble: bool) -> ([u8; REPORT_BUFFER_SIZE], usize) {
        let mut buffer = [0u8; REPORT_BUFFER_SIZE];
        let length = self.fill_buffer(rumble, &mut buffer);
        (buffer, length)
    }

    /// Fills an existing buffer with the output report data, folding in the
    /// rumble state.
    ///
    /// Returns the actual length of the data.
    pub fn fill_buffer(&self, mut rumble: bool, buffer: &mut [u8]) -> usize {
        buffer[1] = 0;
        let length = match self {
            Self::Rumble(rumble_enabled) => {
                rumble = *rumble_enabled;
                buffer[0] = RUMBLE_ID;
                2
            }
            Self::PlayerLed(flags) => {
                buffer[0] = PLAYER_LED_ID;
                buffer[1] = flags.bits();
                2
            }
            Self::DataReportingMode(mode) => {
                buffer[0] = DATA_REPORTING_MODE_ID;
                buffer[1] = if mode.continuous { 0x04 } else { 0x00 };
                buffer[2] = mode.mode;
                3
            }
            Self::IrCameraEnable(enable) => {
                buffer[0] = IR_CAMERA_ENABLE_ID;
                buffer[1] = if *enable { 0x04 } else { 0x00 };
                2
            }
            Self::SpeakerEnable(enable) => {
                buffer[0] = SPEAKER_ENABLE_ID;
                buffer[1] = if *enable { 0x04 } else { 0x00 };
                2
            }
            Self::StatusRequest => {
                buffer[0] = STATUS_REQUEST_ID;
                2
            }
            Self::WriteMemory(addressing, data) => {
                buffer[0] = WRITE_MEMORY_ID;
                buffer[1..=4].copy_from_slice(&addressing.address.to_be_bytes());
                // The address is 3 bytes, the top byte carries the space
                // select and rumble bits instead.
                buffer[1] = if addressing.registers { 0x04 } else { 0x00 };
                buffer[5] = u8::min(addressing.size as u8, 16);
                buffer[6..=21].copy_from_slice(data);
                22
            }
            Self::ReadMemory(addressing) => {
                buffer[0] = READ_MEMORY_ID;
                buffer[1..=4].copy_from_slice(&addressing.address.to_be_bytes());
                buffer[1] = if addressing.registers { 0x04 } else { 0x00 };
                buffer[5..=6].copy_from_slice(&addressing.size.to_be_bytes());
                7
            }
            Self::SpeakerData(length, data) => {
                buffer[0] = SPEAKER_DATA_ID;
                buffer[1] = (*length) << 3;
                buffer[2..=21].copy_from_slice(data);
                22
            }
            Self::SpeakerMute(mute) => {
                buffer[0] = SPEAKER_MUTE_ID;
                buffer[1] = if *mute { 0x04 } else { 0x00 };
                2
            }
            Self::IrCameraEnable2(enable) => {
                buffer[0] = IR_CAMERA_ENABLE_2_ID;
                buffer[1] = if *enable { 0x04 } else { 0x00 };
                2
            }
        };
        if rumble {
            // Any output report updates the rumble motor through bit 0 of
            // its first payload byte.
            buffer[1] |= 0x01;
        }
        length
    }
}
