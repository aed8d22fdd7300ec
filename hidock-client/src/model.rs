//! Device models, cached identity and firmware feature gating.

use hidock_protocol::message::DeviceInfo;
use serde::Serialize;
use std::fmt;

/// Recorder models, derived from the USB product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceModel {
    #[serde(rename = "hidock-h1")]
    H1,
    #[serde(rename = "hidock-h1e")]
    H1E,
    #[serde(rename = "hidock-p1")]
    P1,
    #[serde(rename = "unknown")]
    Unknown,
}

impl DeviceModel {
    pub fn from_product_id(product_id: u16) -> Self {
        match product_id {
            0xAF0C => DeviceModel::H1,
            0xAF0D => DeviceModel::H1E,
            0xAF0E => DeviceModel::P1,
            _ => DeviceModel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceModel::H1 => "hidock-h1",
            DeviceModel::H1E => "hidock-h1e",
            DeviceModel::P1 => "hidock-p1",
            DeviceModel::Unknown => "unknown",
        }
    }

    /// Returns whether `feature` is available on this model at the given
    /// firmware version. An unknown version is not held against the device.
    pub fn supports(&self, feature: Feature, version_number: Option<u32>) -> bool {
        if feature == Feature::Bluetooth {
            return *self == DeviceModel::P1;
        }

        let minimum = match (self, feature) {
            (DeviceModel::H1, Feature::Settings) => 327714,
            (DeviceModel::H1E, Feature::Settings) => 393476,
            (DeviceModel::H1, Feature::CardInfo) => 327733,
            (DeviceModel::H1E, Feature::CardInfo) => 393504,
            (DeviceModel::H1, Feature::RecordingFile) => 327720,
            (DeviceModel::H1E, Feature::RecordingFile) => 393476,
            (DeviceModel::H1, Feature::FactoryRestore) => 327705,
            (DeviceModel::H1E, Feature::FactoryRestore) => 393476,
            _ => return true,
        };
        version_number.map_or(true, |v| v >= minimum)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations gated on model or firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Settings,
    CardInfo,
    RecordingFile,
    FactoryRestore,
    Bluetooth,
}

/// Identity cached on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub model: DeviceModel,
    pub version_code: Option<String>,
    pub version_number: Option<u32>,
    pub serial_number: Option<String>,
}

impl DeviceIdentity {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            version_code: None,
            version_number: None,
            serial_number: None,
        }
    }

    pub fn update(&mut self, info: &DeviceInfo) {
        self.version_code = Some(info.version_code.clone());
        self.version_number = Some(info.version_number);
        self.serial_number = Some(info.serial_number.clone());
    }

    /// Forgets firmware and serial so the next device-info reply refreshes them.
    pub fn clear(&mut self) {
        self.version_code = None;
        self.version_number = None;
        self.serial_number = None;
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.model.supports(feature, self.version_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ids() {
        assert_eq!(DeviceModel::from_product_id(0xAF0C), DeviceModel::H1);
        assert_eq!(DeviceModel::from_product_id(0xAF0D), DeviceModel::H1E);
        assert_eq!(DeviceModel::from_product_id(0xAF0E), DeviceModel::P1);
        assert_eq!(DeviceModel::from_product_id(0x1234), DeviceModel::Unknown);
        assert_eq!(DeviceModel::H1E.to_string(), "hidock-h1e");
    }

    #[test]
    fn test_version_gates() {
        assert!(!DeviceModel::H1.supports(Feature::Settings, Some(327713)));
        assert!(DeviceModel::H1.supports(Feature::Settings, Some(327714)));
        assert!(!DeviceModel::H1E.supports(Feature::CardInfo, Some(393503)));
        assert!(DeviceModel::H1E.supports(Feature::CardInfo, Some(393504)));
        assert!(DeviceModel::P1.supports(Feature::CardInfo, Some(0)));
        assert!(DeviceModel::H1.supports(Feature::FactoryRestore, None));
    }

    #[test]
    fn test_bluetooth_only_on_p1() {
        assert!(DeviceModel::P1.supports(Feature::Bluetooth, None));
        assert!(!DeviceModel::H1.supports(Feature::Bluetooth, Some(u32::MAX)));
        assert!(!DeviceModel::H1E.supports(Feature::Bluetooth, None));
        assert!(!DeviceModel::Unknown.supports(Feature::Bluetooth, None));
    }

    #[test]
    fn test_identity_update_and_clear() {
        let mut identity = DeviceIdentity::new(DeviceModel::H1);
        identity.update(&DeviceInfo {
            version_code: "5.0.42".to_string(),
            version_number: 327722,
            serial_number: "HD1E243".to_string(),
        });
        assert!(identity.supports(Feature::Settings));
        assert!(!identity.supports(Feature::CardInfo));

        identity.clear();
        assert_eq!(identity.version_number, None);
        assert_eq!(identity.model, DeviceModel::H1);
    }
}
