//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used to find and talk to KICKR trainers.
//! These are defaults for [`TrainerProfile`](crate::config::TrainerProfile);
//! firmware revisions that move them only need a different profile.

use uuid::Uuid;

/// Build a 128-bit UUID from a 16-bit SIG-assigned number.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

// Standard SIG services
/// Fitness Machine Service UUID (0x1826).
pub const FITNESS_MACHINE_SERVICE_UUID: Uuid = sig_uuid(0x1826);
/// Cycling Power Service UUID (0x1818).
pub const CYCLING_POWER_SERVICE_UUID: Uuid = sig_uuid(0x1818);

// Wahoo vendor characteristics
/// Wahoo gear characteristic UUID (Notify): front/rear gear indices.
pub const WAHOO_GEAR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xa026_e03a_0a7d_4ab3_97fa_f1500f9feb8b);
/// Wahoo grade characteristic UUID (Notify): grade and lock frames.
pub const WAHOO_GRADE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xa026_e037_0a7d_4ab3_97fa_f1500f9feb8b);

/// Name substring KICKR devices advertise.
pub const KICKR_NAME_PATTERN: &str = "KICKR";

/// Check if a characteristic UUID belongs to the Wahoo vendor range.
pub fn is_wahoo_characteristic(uuid: &Uuid) -> bool {
    let bytes = uuid.as_bytes();
    bytes[0] == 0xa0 && bytes[1] == 0x26 && bytes[4..] == WAHOO_GEAR_CHARACTERISTIC_UUID.as_bytes()[4..]
}
