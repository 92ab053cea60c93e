use bitflags::bitflags;
use log::{debug, warn};

use crate::dynamics::{
    calculate_orientation, AccelCalibration, AccelSample, GravityForce, Orientation,
    DEFAULT_SMOOTH_ALPHA,
};
use crate::events::{ButtonState, Event};
use crate::extensions::{
    assemble_identity, BalanceBoard, BalanceBoardCalibration, Expansion, ExpansionKind,
    BOARD_TEMPERATURE_ADDRESS, CALIBRATION_ADDRESS, IDENTITY_ADDRESS, INIT_REGISTER_1,
    INIT_REGISTER_2, MOTION_SENSOR_ENABLE,
};
use crate::input::{mode_layout, InputReport, ReportData, StatusData, StatusFlags};
use crate::ir::{self, Aspect, IrState, SensorBarPosition};
use crate::output::{
    Addressing, DataReportingMode, OutputReport, PlayerLedFlags, WRITE_MEMORY_ID,
};
use crate::queue::{CompletedRead, CompletedWrite, Continuation, RequestHandle, RequestQueue};
use crate::result::{ProtocolError, RemoteError, RemoteResult, TransportError};
use crate::transport::Transport;
use crate::REPORT_BUFFER_SIZE;

// Factory accelerometer calibration block in EEPROM.
const ACCEL_CALIBRATION_ADDRESS: u32 = 0x0016;
const ACCEL_CALIBRATION_SIZE: u16 = 8;

const BATTERY_FULL_SCALE: f32 = 0xC8 as f32;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    struct StateFlags: u16 {
        /// Startup handshake is running.
        const HANDSHAKE = 1 << 0;
        /// Startup handshake finished, calibration and state are valid.
        const HANDSHAKE_COMPLETE = 1 << 1;
        const CONNECTED = 1 << 2;
        const RUMBLE = 1 << 3;
        const ACCEL = 1 << 4;
        const IR = 1 << 5;
        const SPEAKER = 1 << 6;
        const EXPANSION = 1 << 7;
        const CONTINUOUS = 1 << 8;
        /// Expansion identification/calibration sequence is running.
        const EXPANSION_HANDSHAKE = 1 << 9;
        /// The last expansion handshake failed; no retry until the next
        /// insertion edge.
        const EXPANSION_FAILED = 1 << 10;
    }
}

/// Progress of the startup handshake. `Complete` is sticky: re-entering the
/// handshake entry point afterwards is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Init,
    WaitCalibration,
    ProbeExpansionOff,
    WaitExpansionOff,
    QueryStatus,
    Complete,
}

/// One session with a remote.
///
/// All protocol work runs inside [`Remote::poll`], which the caller drives:
/// it drains at most one input report from the transport, advances whatever
/// multi-step sequence is waiting on it and returns one [`Event`]. The
/// session spawns no threads and never blocks on the transport.
pub struct Remote<T: Transport> {
    transport: Option<T>,
    identifier: String,
    state: StateFlags,
    handshake: HandshakeState,
    queue: RequestQueue,
    event: Event,
    pending_event: Option<Event>,
    last_error: Option<RemoteError>,

    leds: PlayerLedFlags,
    battery_level: f32,
    buttons: ButtonState,
    report_mode: u8,

    accel_calibration: AccelCalibration,
    accel: AccelSample,
    orientation: Orientation,
    gravity: GravityForce,
    smoothing: bool,
    smooth_alpha: f32,

    ir: IrState,
    expansion: Expansion,

    interleaved_first: Option<[u8; 21]>,
    board_block: Option<Vec<u8>>,
}

impl<T: Transport> Remote<T> {
    /// Opens a session over a connected transport and begins the startup
    /// handshake. The session is usable once [`Remote::poll`] returns
    /// [`Event::Connect`].
    ///
    /// # Errors
    ///
    /// This function will return an error if the transport rejects the
    /// first handshake writes.
    pub fn new(transport: T) -> RemoteResult<Self> {
        let identifier = transport.identifier();
        let mut remote = Self {
            transport: Some(transport),
            identifier,
            state: StateFlags::empty(),
            handshake: HandshakeState::Init,
            queue: RequestQueue::default(),
            event: Event::None,
            pending_event: None,
            last_error: None,
            leds: PlayerLedFlags::empty(),
            battery_level: 0.0,
            buttons: ButtonState::default(),
            report_mode: 0x30,
            accel_calibration: AccelCalibration::default(),
            accel: AccelSample::default(),
            orientation: Orientation::default(),
            gravity: GravityForce::default(),
            smoothing: true,
            smooth_alpha: DEFAULT_SMOOTH_ALPHA,
            ir: IrState::default(),
            expansion: Expansion::None,
            interleaved_first: None,
            board_block: None,
        };
        remote.ir.update_offset();
        remote.start()?;
        Ok(remote)
    }

    /// Begins the startup handshake: reset the report mode, fetch the
    /// factory accelerometer calibration and force the expansion port into
    /// a known disabled state.
    ///
    /// Calling this again while the handshake runs or after it completed is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// This function will return an error if the transport rejects the
    /// initial writes.
    pub fn start(&mut self) -> RemoteResult<()> {
        if self.handshake != HandshakeState::Init {
            return Ok(());
        }
        debug!("{}: starting handshake", self.identifier);
        self.state = StateFlags::HANDSHAKE;
        self.report_mode = 0x30;
        self.write_report(&OutputReport::DataReportingMode(DataReportingMode {
            continuous: false,
            mode: 0x30,
        }))?;
        self.queue.enqueue_read(
            Addressing::eeprom(ACCEL_CALIBRATION_ADDRESS, ACCEL_CALIBRATION_SIZE),
            Continuation::HandshakeCalibration,
        );
        self.handshake = HandshakeState::WaitCalibration;
        self.flush_requests()
    }

    /// Shuts the session down. Queued requests are dropped without running
    /// their continuations; the next poll reports [`Event::Disconnect`] and
    /// the session stays inert until [`Remote::reconnect`].
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            debug!("{}: disconnected", self.identifier);
            self.pending_event = Some(Event::Disconnect);
        }
        if !self.queue.is_empty() {
            debug!("{}: dropping queued requests", self.identifier);
        }
        self.queue.clear();
        self.state = StateFlags::empty();
        self.handshake = HandshakeState::Init;
    }

    /// Re-attaches a transport to an inert session and restarts the
    /// handshake from scratch.
    ///
    /// # Errors
    ///
    /// This function will return an error if the transport rejects the
    /// initial handshake writes.
    pub fn reconnect(&mut self, transport: T) -> RemoteResult<()> {
        self.queue.clear();
        self.state = StateFlags::empty();
        self.handshake = HandshakeState::Init;
        self.pending_event = None;
        self.buttons.clear();
        self.expansion = Expansion::None;
        self.accel_calibration = AccelCalibration::default();
        self.transport = Some(transport);
        self.start()
    }

    /// Drains at most one pending input report and returns the resulting
    /// event.
    ///
    /// Transport failures are not propagated: they surface exactly once as
    /// [`Event::UnexpectedDisconnect`], afterwards the session is inert and
    /// polls return [`Event::None`].
    pub fn poll(&mut self) -> Event {
        if let Some(event) = self.pending_event.take() {
            return event;
        }
        let Some(transport) = self.transport.as_mut() else {
            return Event::None;
        };

        let mut buffer = [0u8; REPORT_BUFFER_SIZE];
        let length = match transport.read(&mut buffer) {
            Ok(Some(length)) => length,
            Ok(None) => return Event::None,
            Err(error) => {
                self.fail(error);
                return self.pending_event.take().unwrap_or(Event::None);
            }
        };

        self.event = Event::None;
        match InputReport::try_from(&buffer[..length]) {
            Ok(report) => self.handle_report(report),
            Err(error) => {
                warn!("{}: dropping malformed report: {error}", self.identifier);
                self.last_error = Some(error);
            }
        }
        std::mem::take(&mut self.event)
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the handshake finished and the transport is still attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some() && self.state.contains(StateFlags::CONNECTED)
    }

    /// Whether a transport is attached, regardless of handshake progress.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.transport.is_some()
    }

    #[must_use]
    pub const fn buttons(&self) -> &ButtonState {
        &self.buttons
    }

    #[must_use]
    pub const fn accel(&self) -> AccelSample {
        self.accel
    }

    /// Meaningful only once the connect event fired; before that the
    /// calibration is zeroed and derived values are nominal.
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[must_use]
    pub const fn gravity_force(&self) -> GravityForce {
        self.gravity
    }

    #[must_use]
    pub const fn accel_calibration(&self) -> &AccelCalibration {
        &self.accel_calibration
    }

    #[must_use]
    pub const fn ir(&self) -> &IrState {
        &self.ir
    }

    #[must_use]
    pub const fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    /// Battery level in [0, 1], updated by status reports.
    #[must_use]
    pub const fn battery_level(&self) -> f32 {
        self.battery_level
    }

    #[must_use]
    pub const fn leds(&self) -> PlayerLedFlags {
        self.leds
    }

    /// The last absorbed error: a dropped report, an unavailable
    /// calibration or an unknown expansion identity.
    #[must_use]
    pub const fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }

    /// Whether the last expansion identification failed. Cleared on the
    /// next removal edge.
    #[must_use]
    pub const fn expansion_failed(&self) -> bool {
        self.state.contains(StateFlags::EXPANSION_FAILED)
    }

    /// The input report mode currently requested from the remote.
    #[must_use]
    pub const fn report_mode(&self) -> u8 {
        self.report_mode
    }

    /// Sets the player LEDs.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_leds(&mut self, leds: PlayerLedFlags) -> RemoteResult<()> {
        self.leds = leds;
        self.write_report(&OutputReport::PlayerLed(leds))
    }

    /// Turns the rumble motor on or off. The state is folded into every
    /// following output report.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_rumble(&mut self, enabled: bool) -> RemoteResult<()> {
        self.state.set(StateFlags::RUMBLE, enabled);
        self.write_report(&OutputReport::Rumble(enabled))
    }

    /// Enables or disables accelerometer reporting.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_accelerometer(&mut self, enabled: bool) -> RemoteResult<()> {
        self.state.set(StateFlags::ACCEL, enabled);
        self.update_report_mode()
    }

    /// Switches between change-triggered and continuous data reports.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_continuous_reporting(&mut self, enabled: bool) -> RemoteResult<()> {
        self.state.set(StateFlags::CONTINUOUS, enabled);
        self.update_report_mode()
    }

    /// Enables or disables the built-in speaker.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_speaker(&mut self, enabled: bool) -> RemoteResult<()> {
        self.state.set(StateFlags::SPEAKER, enabled);
        self.write_report(&OutputReport::SpeakerEnable(enabled))
    }

    /// Mutes or unmutes the built-in speaker.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_speaker_mute(&mut self, muted: bool) -> RemoteResult<()> {
        self.write_report(&OutputReport::SpeakerMute(muted))
    }

    /// Requests a status report; the reply arrives as [`Event::Status`].
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn status_request(&mut self) -> RemoteResult<()> {
        self.write_report(&OutputReport::StatusRequest)
    }

    /// Sends a raw output report, folding in the current rumble state.
    ///
    /// Most commands have a dedicated method; this is the escape hatch for
    /// the rest, such as streaming speaker data packets.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn write(&mut self, report: &OutputReport) -> RemoteResult<()> {
        self.write_report(report)
    }

    /// Enables or disables orientation smoothing.
    pub fn set_smoothing(&mut self, enabled: bool) {
        self.smoothing = enabled;
    }

    /// Sets the orientation smoothing blend factor, clamped to [0, 1].
    pub fn set_smooth_alpha(&mut self, alpha: f32) {
        self.smooth_alpha = alpha.clamp(0.0, 1.0);
    }

    /// Enables or disables IR tracking.
    ///
    /// Requested before the handshake finished, the camera is configured as
    /// part of the handshake's final step. The configuration sequence runs
    /// through the write queue; tracking data starts once the last register
    /// write is acknowledged.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_ir(&mut self, enabled: bool) -> RemoteResult<()> {
        if !enabled {
            self.state.remove(StateFlags::IR);
            self.write_report(&OutputReport::IrCameraEnable(false))?;
            self.write_report(&OutputReport::IrCameraEnable2(false))?;
            return self.update_report_mode();
        }

        if !self.state.contains(StateFlags::HANDSHAKE_COMPLETE) {
            self.state.insert(StateFlags::IR);
            return Ok(());
        }
        if self.state.contains(StateFlags::IR) {
            return Ok(());
        }

        self.write_report(&OutputReport::IrCameraEnable(true))?;
        self.write_report(&OutputReport::IrCameraEnable2(true))?;

        let (block_1, block_2) = ir::sensitivity_blocks(self.ir.sensitivity);
        self.queue.enqueue_write(
            Addressing::registers(ir::ENABLE_REGISTER, 1),
            &[0x08],
            Continuation::None,
        );
        self.queue.enqueue_write(
            Addressing::registers(ir::SENSITIVITY_BLOCK_1_ADDRESS, 9),
            &block_1,
            Continuation::None,
        );
        self.queue.enqueue_write(
            Addressing::registers(ir::SENSITIVITY_BLOCK_2_ADDRESS, 2),
            &block_2,
            Continuation::None,
        );
        self.queue.enqueue_write(
            Addressing::registers(ir::MODE_REGISTER, 1),
            &[self.ir_format_mode()],
            Continuation::None,
        );
        self.queue.enqueue_write(
            Addressing::registers(ir::ENABLE_REGISTER, 1),
            &[0x08],
            Continuation::IrConfigured,
        );
        self.flush_requests()
    }

    /// Sets the camera sensitivity level (1-5) and reconfigures the camera
    /// if it is running.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_ir_sensitivity(&mut self, level: u8) -> RemoteResult<()> {
        self.ir.sensitivity = level.clamp(1, 5);
        if self.state.contains(StateFlags::IR) {
            let (block_1, block_2) = ir::sensitivity_blocks(self.ir.sensitivity);
            self.queue.enqueue_write(
                Addressing::registers(ir::SENSITIVITY_BLOCK_1_ADDRESS, 9),
                &block_1,
                Continuation::None,
            );
            self.queue.enqueue_write(
                Addressing::registers(ir::SENSITIVITY_BLOCK_2_ADDRESS, 2),
                &block_2,
                Continuation::None,
            );
            self.flush_requests()?;
        }
        Ok(())
    }

    /// Sets the virtual resolution the IR cursor is mapped onto.
    pub fn set_ir_vres(&mut self, x: u32, y: u32) {
        self.ir.vres = (x, y);
    }

    pub fn set_aspect_ratio(&mut self, aspect: Aspect) {
        self.ir.aspect = aspect;
        self.ir.update_offset();
    }

    pub fn set_sensor_bar_position(&mut self, position: SensorBarPosition) {
        self.ir.position = position;
        self.ir.update_offset();
    }

    /// Activates or deactivates the motion-sensing gyroscope add-on.
    ///
    /// Activation maps the sensor onto the expansion bus; the following
    /// identification read reports it (or one of its pass-through modes)
    /// like any other peripheral and raises
    /// [`Event::MotionSensorActivated`].
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn set_motion_sensor(&mut self, enabled: bool) -> RemoteResult<()> {
        if self.state.contains(StateFlags::EXPANSION_HANDSHAKE) {
            return Ok(());
        }
        if enabled {
            self.state.insert(StateFlags::EXPANSION_HANDSHAKE);
            self.queue.enqueue_write(
                Addressing::registers(MOTION_SENSOR_ENABLE, 1),
                &[0x04],
                Continuation::MotionSensorEnabled,
            );
        } else {
            if matches!(self.expansion, Expansion::MotionSensor(_)) {
                self.remove_expansion();
                self.pending_event = Some(std::mem::take(&mut self.event));
            }
            self.state.insert(StateFlags::EXPANSION_HANDSHAKE);
            self.queue.enqueue_write(
                Addressing::registers(INIT_REGISTER_1, 1),
                &[0x55],
                Continuation::MotionSensorDisableFirst,
            );
        }
        self.flush_requests()
    }

    /// Issues a read against the remote's register/EEPROM space. The
    /// completion arrives as [`Event::ReadCompleted`] carrying the handle
    /// returned here.
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn read_data(&mut self, addressing: Addressing) -> RemoteResult<RequestHandle> {
        let handle = self.queue.enqueue_read(addressing, Continuation::UserRead);
        self.flush_requests()?;
        Ok(handle)
    }

    /// Issues a write of up to 16 bytes against the remote's
    /// register/EEPROM space. The acknowledgment arrives as
    /// [`Event::WriteCompleted`].
    ///
    /// # Errors
    ///
    /// This function will return an error if the remote is disconnected.
    pub fn write_data(&mut self, addressing: Addressing, data: &[u8]) -> RemoteResult<RequestHandle> {
        let handle = self
            .queue
            .enqueue_write(addressing, data, Continuation::UserWrite);
        self.flush_requests()?;
        Ok(handle)
    }

    fn handle_report(&mut self, report: InputReport) {
        match report {
            InputReport::StatusInformation(status) => self.handle_status(&status),
            InputReport::ReadMemory(memory) => {
                self.buttons.update(memory.buttons());
                if let Some(completed) = self.queue.complete_read_chunk(&memory) {
                    self.dispatch_read(completed);
                }
                _ = self.flush_requests();
            }
            InputReport::Acknowledge(acknowledge) => {
                self.buttons.update(acknowledge.buttons());
                if acknowledge.report_number() == WRITE_MEMORY_ID {
                    if let Some(completed) = self.queue.complete_write(&acknowledge) {
                        self.dispatch_write(completed);
                    }
                    _ = self.flush_requests();
                } else if acknowledge.error_code() != 0 {
                    warn!(
                        "{}: output report {:#04x} failed with error {}",
                        self.identifier,
                        acknowledge.report_number(),
                        acknowledge.error_code()
                    );
                }
            }
            InputReport::DataReport(mode, data) => self.handle_data_report(mode, &data),
        }
    }

    fn handle_status(&mut self, status: &StatusData) {
        self.buttons.update(status.buttons());
        self.battery_level = f32::from(status.battery_level()) / BATTERY_FULL_SCALE;
        self.leds = PlayerLedFlags::from_bits_truncate(status.flags().bits());
        self.event = Event::Status;

        let attached = status.flags().contains(StatusFlags::EXPANSION_CONNECTED);
        let mut expansion_changed = false;
        if attached {
            if !self.state.intersects(
                StateFlags::EXPANSION | StateFlags::EXPANSION_HANDSHAKE | StateFlags::EXPANSION_FAILED,
            ) {
                self.begin_expansion_handshake();
                expansion_changed = true;
            }
        } else {
            // The removal edge clears the failure latch and cancels an
            // identification still in flight; its queued completions are
            // dropped as stale when they arrive.
            self.state
                .remove(StateFlags::EXPANSION_FAILED | StateFlags::EXPANSION_HANDSHAKE);
            if !matches!(self.expansion, Expansion::None) {
                // The removal must land before the next report is decoded,
                // stale payloads must not reach the old variant's decoder.
                self.remove_expansion();
                expansion_changed = true;
            }
        }

        if !expansion_changed && self.state.contains(StateFlags::HANDSHAKE_COMPLETE) {
            // An unsolicited status report resets the report mode.
            _ = self.update_report_mode();
        }
    }

    fn handle_data_report(&mut self, mode: u8, data: &ReportData) {
        if mode == 0x3E || mode == 0x3F {
            self.handle_interleaved(mode, data);
            return;
        }
        let Some(layout) = mode_layout(mode) else {
            warn!("{}: unsupported data report mode {mode:#04x}", self.identifier);
            return;
        };
        if mode != 0x3D {
            self.buttons.update(data.buttons());
        }
        if layout.accel {
            self.accel = AccelSample::from_buttons_accel(&data.data);
            self.update_motion();
        }
        if let Some((offset, format)) = layout.ir {
            self.ir.decode(format, &data.data[offset..]);
        }
        if let Some((offset, length)) = layout.extension {
            let end = usize::min(offset + length, data.data.len());
            let smoothing = self.smoothing_option();
            self.expansion.decode(&data.data[offset..end], smoothing);
        }
        self.event = Event::Update;
    }

    /// Interleaved modes spread one accelerometer sample over a 0x3E/0x3F
    /// report pair; the sample is decoded once both halves arrived.
    fn handle_interleaved(&mut self, mode: u8, data: &ReportData) {
        self.buttons.update(data.buttons());
        if mode == 0x3E {
            self.interleaved_first = Some(data.data);
        } else if let Some(first) = self.interleaved_first.take() {
            self.accel = AccelSample::from_interleaved(&first, &data.data);
            self.update_motion();
        }
        self.event = Event::Update;
    }

    fn update_motion(&mut self) {
        self.gravity = self.accel_calibration.gravity_force(&self.accel);
        let smoothing = self.smoothing_option();
        calculate_orientation(
            &self.accel_calibration,
            &self.accel,
            &mut self.orientation,
            smoothing,
        );
    }

    fn smoothing_option(&self) -> Option<f32> {
        self.smoothing.then_some(self.smooth_alpha)
    }

    fn dispatch_read(&mut self, completed: CompletedRead) {
        if completed.continuation.is_expansion_step()
            && !self.state.contains(StateFlags::EXPANSION_HANDSHAKE)
        {
            // The peripheral was pulled while its identification or
            // calibration read was in flight.
            debug!("{}: dropping stale expansion completion", self.identifier);
            return;
        }
        match completed.continuation {
            Continuation::HandshakeCalibration => self.handshake_calibration(&completed),
            Continuation::ExpansionIdentify => self.expansion_identified(&completed),
            Continuation::ExpansionCalibration(kind) => {
                let mut expansion = Expansion::activate(kind);
                match &mut expansion {
                    Expansion::Nunchuk(nunchuk) => nunchuk.parse_calibration(&completed.data),
                    Expansion::Classic(classic) => classic.parse_calibration(&completed.data),
                    _ => {}
                }
                self.install_expansion(expansion, kind);
            }
            Continuation::BoardCalibrationBlock => {
                self.board_block = Some(completed.data);
            }
            Continuation::BoardReferenceTemperature => self.board_calibrated(&completed),
            Continuation::UserRead => {
                self.event = Event::ReadCompleted {
                    handle: completed.handle,
                    data: completed.data,
                };
            }
            _ => {}
        }
    }

    fn dispatch_write(&mut self, completed: CompletedWrite) {
        if completed.continuation.is_expansion_step()
            && !self.state.contains(StateFlags::EXPANSION_HANDSHAKE)
        {
            debug!("{}: dropping stale expansion completion", self.identifier);
            return;
        }
        match completed.continuation {
            Continuation::HandshakeDisableFirst => {
                // An error here just means no peripheral was attached; the
                // disable writes are idempotent either way.
                self.handshake = HandshakeState::WaitExpansionOff;
                self.queue.enqueue_write(
                    Addressing::registers(INIT_REGISTER_2, 1),
                    &[0x00],
                    Continuation::HandshakeDisableSecond,
                );
            }
            Continuation::HandshakeDisableSecond => self.finish_handshake(),
            Continuation::ExpansionInitFirst => {
                if completed.error != 0 {
                    self.expansion_handshake_failed(ProtocolError::InvalidData.into());
                } else {
                    self.queue.enqueue_write(
                        Addressing::registers(INIT_REGISTER_2, 1),
                        &[0x00],
                        Continuation::ExpansionInitSecond,
                    );
                }
            }
            Continuation::ExpansionInitSecond => {
                if completed.error != 0 {
                    self.expansion_handshake_failed(ProtocolError::InvalidData.into());
                } else {
                    self.queue.enqueue_read(
                        Addressing::registers(IDENTITY_ADDRESS, 6),
                        Continuation::ExpansionIdentify,
                    );
                }
            }
            Continuation::MotionSensorEnabled => {
                if completed.error != 0 {
                    self.expansion_handshake_failed(ProtocolError::InvalidData.into());
                } else {
                    self.queue.enqueue_read(
                        Addressing::registers(IDENTITY_ADDRESS, 6),
                        Continuation::ExpansionIdentify,
                    );
                }
            }
            Continuation::MotionSensorDisableFirst => {
                self.queue.enqueue_write(
                    Addressing::registers(INIT_REGISTER_2, 1),
                    &[0x00],
                    Continuation::MotionSensorDisableSecond,
                );
            }
            Continuation::MotionSensorDisableSecond => {
                self.state.remove(StateFlags::EXPANSION_HANDSHAKE);
                _ = self.update_report_mode();
                _ = self.status_request();
            }
            Continuation::IrConfigured => {
                self.state.insert(StateFlags::IR);
                debug!("{}: IR camera configured", self.identifier);
                _ = self.update_report_mode();
            }
            Continuation::UserWrite => {
                if completed.error != 0 {
                    self.last_error = Some(ProtocolError::InvalidData.into());
                }
                self.event = Event::WriteCompleted {
                    handle: completed.handle,
                };
            }
            _ => {}
        }
    }

    fn handshake_calibration(&mut self, completed: &CompletedRead) {
        let calibration = if completed.error == 0 {
            AccelCalibration::from_factory_block(&completed.data)
        } else {
            None
        };
        match calibration {
            Some(calibration) if calibration.is_populated() => {
                debug!(
                    "{}: accelerometer calibration zero ({:#04x}, {:#04x}, {:#04x})",
                    self.identifier, calibration.x_zero, calibration.y_zero, calibration.z_zero
                );
                self.accel_calibration = calibration;
            }
            _ => {
                // Never block the connect on a bad calibration block.
                warn!("{}: accelerometer calibration unavailable", self.identifier);
                self.last_error = Some(RemoteError::CalibrationUnavailable);
            }
        }

        self.handshake = HandshakeState::ProbeExpansionOff;
        self.queue.enqueue_write(
            Addressing::registers(INIT_REGISTER_1, 1),
            &[0x55],
            Continuation::HandshakeDisableFirst,
        );
    }

    fn finish_handshake(&mut self) {
        self.handshake = HandshakeState::QueryStatus;
        self.state.remove(StateFlags::HANDSHAKE);
        self.state
            .insert(StateFlags::HANDSHAKE_COMPLETE | StateFlags::CONNECTED);
        debug!("{}: handshake complete", self.identifier);

        if self.state.contains(StateFlags::IR) {
            // IR was requested while the handshake was still running.
            self.state.remove(StateFlags::IR);
            _ = self.set_ir(true);
        }

        self.event = Event::Connect;
        _ = self.write_report(&OutputReport::StatusRequest);
        self.handshake = HandshakeState::Complete;
    }

    fn begin_expansion_handshake(&mut self) {
        debug!("{}: expansion inserted, identifying", self.identifier);
        self.state.insert(StateFlags::EXPANSION_HANDSHAKE);
        self.queue.enqueue_write(
            Addressing::registers(INIT_REGISTER_1, 1),
            &[0x55],
            Continuation::ExpansionInitFirst,
        );
        _ = self.flush_requests();
    }

    fn expansion_identified(&mut self, completed: &CompletedRead) {
        if completed.error != 0 {
            self.expansion_handshake_failed(ProtocolError::InvalidData.into());
            return;
        }
        let Some(identity) = assemble_identity(&completed.data) else {
            self.expansion_handshake_failed(ProtocolError::MissingData.into());
            return;
        };
        let Some(kind) = ExpansionKind::classify(identity) else {
            self.expansion_handshake_failed(RemoteError::UnknownExpansionIdentity(identity));
            return;
        };
        debug!("{}: identified expansion {kind:?}", self.identifier);
        match kind {
            ExpansionKind::Nunchuk | ExpansionKind::Classic => {
                self.queue.enqueue_read(
                    Addressing::registers(CALIBRATION_ADDRESS, 16),
                    Continuation::ExpansionCalibration(kind),
                );
            }
            ExpansionKind::BalanceBoard => {
                self.board_block = None;
                self.queue.enqueue_read(
                    Addressing::registers(CALIBRATION_ADDRESS, 32),
                    Continuation::BoardCalibrationBlock,
                );
                self.queue.enqueue_read(
                    Addressing::registers(BOARD_TEMPERATURE_ADDRESS, 2),
                    Continuation::BoardReferenceTemperature,
                );
            }
            ExpansionKind::Guitar
            | ExpansionKind::MotionSensor
            | ExpansionKind::MotionSensorNunchuk
            | ExpansionKind::MotionSensorClassic => {
                self.install_expansion(Expansion::activate(kind), kind);
            }
        }
    }

    fn board_calibrated(&mut self, completed: &CompletedRead) {
        let mut board = BalanceBoard::default();
        if completed.error == 0 {
            if let Some(block) = self.board_block.take() {
                match BalanceBoardCalibration::from_blocks(&block, &completed.data) {
                    Ok(calibration) => board.set_calibration(calibration),
                    Err(error) => {
                        // Activate anyway, weights stay raw-only meaningful.
                        warn!("{}: balance board calibration rejected: {error}", self.identifier);
                        self.last_error = Some(error);
                    }
                }
            }
        }
        self.install_expansion(Expansion::BalanceBoard(board), ExpansionKind::BalanceBoard);
    }

    fn install_expansion(&mut self, expansion: Expansion, kind: ExpansionKind) {
        self.expansion = expansion;
        self.state
            .remove(StateFlags::EXPANSION_HANDSHAKE | StateFlags::EXPANSION_FAILED);
        self.state.insert(StateFlags::EXPANSION);
        self.event = Self::inserted_event(kind);
        _ = self.update_report_mode();
        if self.state.contains(StateFlags::IR) {
            self.update_ir_format();
        }
    }

    fn remove_expansion(&mut self) {
        let kind = self.expansion.kind();
        self.expansion = Expansion::None;
        self.state
            .remove(StateFlags::EXPANSION | StateFlags::EXPANSION_HANDSHAKE);
        if let Some(kind) = kind {
            debug!("{}: expansion {kind:?} removed", self.identifier);
            self.event = Self::removed_event(kind);
        }
        _ = self.update_report_mode();
        if self.state.contains(StateFlags::IR) {
            self.update_ir_format();
        }
    }

    fn expansion_handshake_failed(&mut self, error: RemoteError) {
        warn!("{}: expansion handshake failed: {error}", self.identifier);
        self.state.remove(StateFlags::EXPANSION_HANDSHAKE);
        self.state.insert(StateFlags::EXPANSION_FAILED);
        self.last_error = Some(error);
    }

    const fn inserted_event(kind: ExpansionKind) -> Event {
        match kind {
            ExpansionKind::Nunchuk => Event::NunchukInserted,
            ExpansionKind::Classic => Event::ClassicInserted,
            ExpansionKind::Guitar => Event::GuitarInserted,
            ExpansionKind::BalanceBoard => Event::BalanceBoardInserted,
            ExpansionKind::MotionSensor
            | ExpansionKind::MotionSensorNunchuk
            | ExpansionKind::MotionSensorClassic => Event::MotionSensorActivated,
        }
    }

    const fn removed_event(kind: ExpansionKind) -> Event {
        match kind {
            ExpansionKind::Nunchuk => Event::NunchukRemoved,
            ExpansionKind::Classic => Event::ClassicRemoved,
            ExpansionKind::Guitar => Event::GuitarRemoved,
            ExpansionKind::BalanceBoard => Event::BalanceBoardRemoved,
            ExpansionKind::MotionSensor
            | ExpansionKind::MotionSensorNunchuk
            | ExpansionKind::MotionSensorClassic => Event::MotionSensorRemoved,
        }
    }

    /// Picks the report mode matching the enabled features. IR tracking
    /// rides on modes that include the accelerometer data.
    fn update_report_mode(&mut self) -> RemoteResult<()> {
        let accel = self.state.contains(StateFlags::ACCEL);
        let ir = self.state.contains(StateFlags::IR);
        let expansion = self.state.contains(StateFlags::EXPANSION);

        let mode = match (accel, ir, expansion) {
            (true, true, true) => 0x37,
            (true, false, true) => 0x35,
            (_, true, false) => 0x33,
            (false, true, true) => 0x36,
            (false, false, true) => 0x34,
            (true, false, false) => 0x31,
            (false, false, false) => 0x30,
        };
        self.report_mode = mode;
        self.write_report(&OutputReport::DataReportingMode(DataReportingMode {
            continuous: self.state.contains(StateFlags::CONTINUOUS),
            mode,
        }))
    }

    fn ir_format_mode(&self) -> u8 {
        if self.state.contains(StateFlags::EXPANSION) {
            ir::MODE_BASIC
        } else {
            ir::MODE_EXTENDED
        }
    }

    /// Rewrites the camera format register after an expansion change moved
    /// IR data between the basic and extended report layouts.
    fn update_ir_format(&mut self) {
        self.queue.enqueue_write(
            Addressing::registers(ir::MODE_REGISTER, 1),
            &[self.ir_format_mode()],
            Continuation::None,
        );
        _ = self.flush_requests();
    }

    fn write_report(&mut self, report: &OutputReport) -> RemoteResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(RemoteError::Disconnected);
        };
        let mut buffer = [0u8; REPORT_BUFFER_SIZE];
        let rumble = self.state.contains(StateFlags::RUMBLE);
        let size = report.fill_buffer(rumble, &mut buffer);
        match transport.write(&buffer[..size]) {
            Ok(_) => Ok(()),
            Err(error) => {
                self.fail(error);
                Err(RemoteError::Disconnected)
            }
        }
    }

    /// Puts the head of each request queue on the wire if it is not in
    /// flight yet. At most one read and one write are outstanding at any
    /// time.
    fn flush_requests(&mut self) -> RemoteResult<()> {
        if let Some(addressing) = self.queue.next_read_to_send() {
            self.write_report(&OutputReport::ReadMemory(addressing))?;
        }
        if let Some((addressing, data)) = self.queue.next_write_to_send() {
            self.write_report(&OutputReport::WriteMemory(addressing, data))?;
        }
        Ok(())
    }

    /// A transport error is fatal: drop everything and surface the failure
    /// exactly once as an unexpected disconnect.
    fn fail(&mut self, error: TransportError) {
        warn!("{}: transport failed: {error}", self.identifier);
        let was_active = self.transport.take().is_some();
        self.queue.clear();
        if was_active {
            self.pending_event = Some(Event::UnexpectedDisconnect);
        }
        self.state.remove(StateFlags::CONNECTED);
        self.handshake = HandshakeState::Init;
        self.last_error = Some(error.into());
    }
}

impl<T: Transport> Drop for Remote<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
