//! Well-known GATT identifiers and the discovered-service catalog
//!
//! The benchmark touches exactly two characteristics: the Manufacturer
//! Name String of the Device Information service (the read target) and
//! the Alert Level of the Immediate Alert service (the write target).
//! Both are Bluetooth SIG short-form identifiers, expanded here to their
//! full 128-bit form for lookup.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bluetooth Base UUID: 0000xxxx-0000-1000-8000-00805F9B34FB.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG-assigned number over the Bluetooth Base UUID.
pub fn short_uuid(assigned: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((assigned as u128) << 96))
}

/// Device Information service (0x180A).
pub fn device_information_service() -> Uuid {
    short_uuid(0x180A)
}

/// Manufacturer Name String characteristic (0x2A29).
pub fn manufacturer_name_string() -> Uuid {
    short_uuid(0x2A29)
}

/// Immediate Alert service (0x1802).
pub fn immediate_alert_service() -> Uuid {
    short_uuid(0x1802)
}

/// Alert Level characteristic (0x2A06).
pub fn alert_level() -> Uuid {
    short_uuid(0x2A06)
}

/// A characteristic located within a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// One service as reported by discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicRef>,
}

impl DiscoveredService {
    /// Build a service entry with the given characteristic identifiers.
    pub fn new(service: Uuid, characteristics: &[Uuid]) -> Self {
        Self {
            uuid: service,
            characteristics: characteristics
                .iter()
                .map(|c| CharacteristicRef {
                    service,
                    uuid: *c,
                })
                .collect(),
        }
    }
}

/// The service/characteristic listing produced by one discovery round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: Vec<DiscoveredService>,
}

impl ServiceCatalog {
    /// Locate a characteristic by service and characteristic identifier.
    ///
    /// Linear scan over the discovered services, then over the matched
    /// service's characteristics. `Uuid` comparison is canonical, so
    /// differing textual case on either side cannot cause a miss.
    /// Absence is not an error; callers decide what it means.
    pub fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<CharacteristicRef> {
        self.services
            .iter()
            .find(|s| s.uuid == service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            device_information_service().to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            manufacturer_name_string().to_string(),
            "00002a29-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            immediate_alert_service().to_string(),
            "00001802-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            alert_level().to_string(),
            "00002a06-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        // Uuid parsing canonicalizes case, so an upper-case identifier
        // from the platform still matches the lower-case constant.
        let upper: Uuid = "0000180A-0000-1000-8000-00805F9B34FB".parse().unwrap();
        let catalog = ServiceCatalog {
            services: vec![DiscoveredService::new(upper, &[manufacturer_name_string()])],
        };

        let found = catalog
            .find_characteristic(device_information_service(), manufacturer_name_string());
        assert!(found.is_some());
    }

    #[test]
    fn test_find_characteristic_hit_and_miss() {
        let catalog = ServiceCatalog {
            services: vec![
                DiscoveredService::new(
                    device_information_service(),
                    &[manufacturer_name_string()],
                ),
                DiscoveredService::new(immediate_alert_service(), &[alert_level()]),
            ],
        };

        let hit = catalog
            .find_characteristic(device_information_service(), manufacturer_name_string())
            .unwrap();
        assert_eq!(hit.service, device_information_service());
        assert_eq!(hit.uuid, manufacturer_name_string());

        // Known service, absent characteristic.
        assert!(catalog
            .find_characteristic(device_information_service(), alert_level())
            .is_none());

        // Absent service.
        assert!(catalog
            .find_characteristic(short_uuid(0x1803), alert_level())
            .is_none());
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ServiceCatalog::default();
        assert!(catalog
            .find_characteristic(device_information_service(), manufacturer_name_string())
            .is_none());
    }
}
