pub mod connection;
pub mod decoder;
pub mod status;

/// Holding register where the ASCII serial number starts.
pub const SERIAL_NUMBER_ADDRESS: u16 = 6672;
/// Registers holding the serial number, two characters each.
pub const SERIAL_NUMBER_REGISTERS: u16 = 7;
