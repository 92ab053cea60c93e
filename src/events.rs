use crate::input::ButtonFlags;
use crate::queue::RequestHandle;

/// The event produced by one poll of a session.
///
/// At most one event is raised per poll; expansion hot-plug events take
/// precedence over the status report that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Event {
    /// Nothing happened, or no report was pending at the transport.
    #[default]
    None,
    /// A data report updated buttons, motion, IR or expansion state.
    Update,
    /// A status report updated battery, LED and expansion-port state.
    Status,
    /// The startup handshake finished; calibration and state are now valid.
    Connect,
    /// The session was shut down by the caller.
    Disconnect,
    /// The transport failed mid-session; the session is inert until
    /// reconnected.
    UnexpectedDisconnect,
    /// A read issued through the register access API completed.
    ReadCompleted {
        handle: RequestHandle,
        data: Vec<u8>,
    },
    /// A write issued through the register access API was acknowledged.
    WriteCompleted { handle: RequestHandle },
    NunchukInserted,
    NunchukRemoved,
    ClassicInserted,
    ClassicRemoved,
    GuitarInserted,
    GuitarRemoved,
    BalanceBoardInserted,
    BalanceBoardRemoved,
    MotionSensorActivated,
    MotionSensorRemoved,
}

/// Button state across polls: what is pressed now, what is being held and
/// what was released by the latest report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ButtonState {
    pressed: ButtonFlags,
    held: ButtonFlags,
    released: ButtonFlags,
}

impl ButtonState {
    /// Folds the buttons of a new report into the pressed/held/released
    /// masks: held are buttons pressed before and still pressed, released
    /// are buttons down in the previous report but not in this one.
    pub(crate) fn update(&mut self, now: ButtonFlags) {
        let now = now.intersection(ButtonFlags::ALL);
        self.held = now.intersection(self.pressed);
        self.released = self.pressed.union(self.held).difference(now);
        self.pressed = now;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub const fn pressed(&self) -> ButtonFlags {
        self.pressed
    }

    #[must_use]
    pub const fn held(&self) -> ButtonFlags {
        self.held
    }

    #[must_use]
    pub const fn released(&self) -> ButtonFlags {
        self.released
    }

    #[must_use]
    pub fn is_pressed(&self, button: ButtonFlags) -> bool {
        self.pressed.contains(button)
    }

    #[must_use]
    pub fn is_held(&self, button: ButtonFlags) -> bool {
        self.held.contains(button)
    }

    /// Whether the button went down with the latest report.
    #[must_use]
    pub fn is_just_pressed(&self, button: ButtonFlags) -> bool {
        self.is_pressed(button) && !self.is_held(button)
    }

    #[must_use]
    pub fn is_released(&self, button: ButtonFlags) -> bool {
        self.released.contains(button)
    }
}
