//! Board definitions for the battery test bench.
//!
//! Port and bit assignments for the external peripherals: the relay switch field and
//! the over-current reset lines of the six interfaces.

use super::capabilities::Port;

/// Port carrying the 6-bit switch control field.
pub const SWITCH_CONTROL_PORT: Port = Port::C;

/// Bit position of the switch control field within its port.
pub const SWITCH_CONTROL_SHIFT: u16 = 5;

/// Mask of the switch control field before shifting.
pub const SWITCH_CONTROL_MASK: u16 = 0x3F;

/// Reset line per interface: devices 1-3, loads 1-2, source.
pub const RESET_LINES: [(Port, u16); 6] = [
    (Port::A, 1 << 8),
    (Port::A, 1 << 13),
    (Port::A, 1 << 14),
    (Port::A, 1 << 15),
    (Port::C, 1 << 11),
    (Port::C, 1 << 12),
];

/// Systick ticks (10 ms each) an over-current reset line stays asserted.
pub const RESET_PULSE_TICKS: u8 = 25;

/// Serial link speed of the board's USART.
pub const BAUD_RATE: u32 = 38_400;
