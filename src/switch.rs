//! Switch and interface control.
//!
//! Three connection points (load 1, load 2, source) can each have at most one device
//! attached. The hardware holds this as a 6-bit field on the switch control port, two
//! bits per point, point `p` at bits `2p..2p+1`, value = device number (0 = none).
//! Business logic works on [`SwitchState`]; the bit field only exists at the port.
//!
//! The controller also drives the over-current reset lines. A reset asserts the line
//! of one interface and releases it automatically after [`RESET_PULSE_TICKS`] ticks.

use crate::hardware::board::{
    RESET_LINES, RESET_PULSE_TICKS, SWITCH_CONTROL_MASK, SWITCH_CONTROL_PORT,
    SWITCH_CONTROL_SHIFT,
};
use crate::hardware::capabilities::Gpio;
use crate::measurement::NUM_INTERFACES;
use tracing::{debug, info, warn};

/// A device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Device 1.
    One = 1,
    /// Device 2.
    Two = 2,
    /// Device 3.
    Three = 3,
}

impl Device {
    /// Every device.
    pub const ALL: [Device; 3] = [Device::One, Device::Two, Device::Three];

    /// Device for a number 1-3.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Device::One),
            2 => Some(Device::Two),
            3 => Some(Device::Three),
            _ => None,
        }
    }

    /// Device number used on the link.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Interface index of this device (0-2).
    pub fn interface(self) -> usize {
        usize::from(self.number() - 1)
    }
}

/// A switchable terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPoint {
    /// First load.
    Load1 = 0,
    /// Second load.
    Load2 = 1,
    /// Source terminal.
    Source = 2,
}

impl ConnectionPoint {
    /// Every connection point.
    pub const ALL: [ConnectionPoint; 3] = [
        ConnectionPoint::Load1,
        ConnectionPoint::Load2,
        ConnectionPoint::Source,
    ];

    /// Point for an internal index 0-2.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Zero-based position in the matrix.
    pub fn index(self) -> usize {
        self as usize
    }

    fn shift(self) -> u8 {
        (self as u8) << 1
    }
}

/// Which device (if any) is attached to each connection point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchState {
    points: [Option<Device>; 3],
}

impl SwitchState {
    /// Device routed to `point`.
    pub fn device_at(&self, point: ConnectionPoint) -> Option<Device> {
        self.points[point.index()]
    }

    /// Same state with `point` routed to `device`.
    pub fn with(mut self, point: ConnectionPoint, device: Option<Device>) -> Self {
        self.points[point.index()] = device;
        self
    }

    /// Pack into the 6-bit hardware field.
    pub fn pack(&self) -> u8 {
        ConnectionPoint::ALL.iter().fold(0u8, |bits, point| {
            let value = self.device_at(*point).map_or(0, Device::number);
            bits | (value << point.shift())
        })
    }

    /// Unpack a 6-bit hardware field. Bits above the field are ignored.
    pub fn unpack(bits: u8) -> Self {
        let mut state = Self::default();
        for point in ConnectionPoint::ALL {
            state.points[point.index()] = Device::from_number((bits >> point.shift()) & 0x03);
        }
        state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingReset {
    interface: usize,
    remaining: u8,
}

/// Owns the switch control field and the reset lines.
pub struct SwitchController {
    gpio: Box<dyn Gpio>,
    pending_reset: Option<PendingReset>,
}

impl SwitchController {
    /// Controller with every point disconnected.
    pub fn new(gpio: Box<dyn Gpio>) -> Self {
        Self {
            gpio,
            pending_reset: None,
        }
    }

    /// Attach `device` to `point` (`None` disconnects it).
    ///
    /// Read-modify-write of the control port: other points and the port's other bits
    /// are left as they are.
    pub fn set_connection(&mut self, device: Option<Device>, point: ConnectionPoint) {
        let state = self.state().with(point, device);
        self.write_bits(state.pack());
        debug!(
            device = device.map_or(0, Device::number),
            point = ?point,
            bits = state.pack(),
            "switch set"
        );
    }

    /// Disconnect every connection point.
    pub fn disconnect_all(&mut self) {
        for point in ConnectionPoint::ALL {
            self.set_connection(None, point);
        }
    }

    /// The packed 6-bit field as currently driven on the port.
    pub fn connection_bits(&self) -> u8 {
        let port = self.gpio.read_port(SWITCH_CONTROL_PORT);
        ((port >> SWITCH_CONTROL_SHIFT) & SWITCH_CONTROL_MASK) as u8
    }

    /// Current routing.
    pub fn state(&self) -> SwitchState {
        SwitchState::unpack(self.connection_bits())
    }

    /// Overwrite the whole field with raw bits.
    pub fn restore_bits(&mut self, bits: u8) {
        self.write_bits(bits & SWITCH_CONTROL_MASK as u8);
    }

    fn write_bits(&mut self, bits: u8) {
        let port = self.gpio.read_port(SWITCH_CONTROL_PORT)
            & !(SWITCH_CONTROL_MASK << SWITCH_CONTROL_SHIFT);
        self.gpio.write_port(
            SWITCH_CONTROL_PORT,
            port | (u16::from(bits) << SWITCH_CONTROL_SHIFT),
        );
    }

    /// Assert the reset line of `interface` (0-5) and arm its release.
    ///
    /// Only one reset is tracked. A request while another is pending replaces it and the
    /// earlier line is not released by the timer.
    pub fn reset_interface(&mut self, interface: usize) -> bool {
        let Some((port, bit)) = RESET_LINES.get(interface).copied() else {
            return false;
        };
        if let Some(previous) = self.pending_reset {
            warn!(
                previous = previous.interface,
                interface, "reset already pending, replacing it"
            );
        }
        self.gpio.set_bits(port, bit);
        self.pending_reset = Some(PendingReset {
            interface,
            remaining: RESET_PULSE_TICKS,
        });
        info!(interface, "over-current reset asserted");
        true
    }

    /// Deassert the reset line of `interface`.
    pub fn release_interface(&mut self, interface: usize) {
        if let Some((port, bit)) = RESET_LINES.get(interface).copied() {
            self.gpio.clear_bits(port, bit);
            debug!(interface, "over-current reset released");
        }
    }

    /// Interface whose reset is still pending.
    pub fn pending_reset(&self) -> Option<usize> {
        self.pending_reset.map(|p| p.interface)
    }

    /// Advance the reset pulse by one 10 ms tick.
    pub fn tick(&mut self) {
        let Some(mut pending) = self.pending_reset else {
            return;
        };
        if pending.remaining == 0 {
            self.pending_reset = None;
            self.release_interface(pending.interface);
        } else {
            pending.remaining -= 1;
            self.pending_reset = Some(pending);
        }
    }
}

const _: () = assert!(RESET_LINES.len() == NUM_INTERFACES);
