//! Topic layout of the published readings.

use crate::frame::Address;

pub const RAW_PREFIX: &str = "iot/raw/nrf24";
pub const DATA_PREFIX: &str = "iot/data";

/// `iot/raw/nrf24/{network}.{channel}/{node}`
pub fn raw(address: &Address) -> String {
    format!("{}/{}", RAW_PREFIX, address)
}

/// `iot/data/sensor{node}/{field}`
pub fn sensor(node: u16, field: &str) -> String {
    format!("{}/sensor{}/{}", DATA_PREFIX, node, field)
}
