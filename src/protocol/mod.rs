//! Wire protocol of the standard Heart Rate profile.
//!
//! This module contains:
//! - GATT identifiers for the service, measurement characteristic and CCC descriptor
//! - The measurement frame decoder

pub mod frame;
pub mod gatt;

// Re-export commonly used types
pub use frame::{decode, rr_to_millis, DecodeError, DecodedSample, SensorContact};
pub use gatt::{
    CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE, HEART_RATE_MEASUREMENT_UUID,
    HEART_RATE_SERVICE_UUID,
};
