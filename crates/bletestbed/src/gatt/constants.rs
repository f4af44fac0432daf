//! GATT status codes as reported by the platform stack

pub const GATT_SUCCESS: u16 = 0x0000;
pub const GATT_READ_NOT_PERMITTED: u16 = 0x0002;
pub const GATT_WRITE_NOT_PERMITTED: u16 = 0x0003;
pub const GATT_REQUEST_NOT_SUPPORTED: u16 = 0x0006;
pub const GATT_INVALID_OFFSET: u16 = 0x0007;
pub const GATT_FAILURE: u16 = 0x0101;
