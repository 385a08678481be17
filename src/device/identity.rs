//! USB vendor/product identity used to target bus resets.

use crate::capture::ConfigError;
use std::fmt;
use std::str::FromStr;

/// A USB `vendor:product` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Creates an identity from numeric ids.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Parses `"VVVV:PPPP"` where both halves are hexadecimal.
    ///
    /// Exactly one colon is required and each half must be 1-4 hex digits;
    /// case is ignored. No `0x` prefix, sign or whitespace is accepted, and
    /// values above `0xffff` (e.g. `"12345:1"`) are errors.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidBusIdentity(text.to_string());

        let (vendor, product) = text.split_once(':').ok_or_else(invalid)?;
        if product.contains(':') {
            return Err(invalid());
        }

        let vendor_id = parse_hex_u16(vendor).ok_or_else(invalid)?;
        let product_id = parse_hex_u16(product).ok_or_else(invalid)?;
        Ok(Self::new(vendor_id, product_id))
    }

    /// Parses an optional identity from configuration.
    ///
    /// An empty string means "no reset target" and is not an error. A
    /// malformed string is logged and likewise disables resets.
    pub fn from_config(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            tracing::info!("No bus identity configured; usb reset disabled");
            return None;
        }
        match Self::parse(text) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(error = %e, "usb reset disabled");
                None
            }
        }
    }
}

/// 1-4 hex digits. Longer segments cannot name a USB id and are rejected
/// rather than truncated.
fn parse_hex_u16(segment: &str) -> Option<u16> {
    if segment.is_empty() || segment.len() > 4 || !segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(segment, 16).ok()
}

impl FromStr for DeviceIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_daheng_identity() {
        let identity = DeviceIdentity::parse("2BDF:0102").unwrap();
        assert_eq!(identity, DeviceIdentity::new(0x2BDF, 0x0102));
        assert_eq!(identity.to_string(), "2bdf:0102");
    }

    #[test]
    fn test_parse_short_segments() {
        assert_eq!(
            DeviceIdentity::parse("a:1").unwrap(),
            DeviceIdentity::new(0xa, 0x1)
        );
    }

    #[test]
    fn test_rejects_malformed() {
        for text in ["", "2bdf", "2bdf:", ":0102", "2bdf:0102:1", "0x2b:01", "zz:01", "2bdf :0102", "12345:1"] {
            assert!(
                matches!(DeviceIdentity::parse(text), Err(ConfigError::InvalidBusIdentity(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_rejects_values_wider_than_u16() {
        for text in ["12345:1", "1:10000", "000001:2"] {
            assert!(DeviceIdentity::parse(text).is_err(), "accepted {text:?}");
            assert_eq!(DeviceIdentity::from_config(text), None);
        }
    }

    #[test]
    fn test_from_config_empty_disables() {
        assert_eq!(DeviceIdentity::from_config(""), None);
        assert_eq!(DeviceIdentity::from_config("  "), None);
        assert_eq!(DeviceIdentity::from_config("not-an-id"), None);
        assert_eq!(
            DeviceIdentity::from_config("2bdf:0102"),
            Some(DeviceIdentity::new(0x2bdf, 0x0102))
        );
    }

    proptest! {
        #[test]
        fn prop_formatted_identity_round_trips(vendor in any::<u16>(), product in any::<u16>(), upper in any::<bool>()) {
            let text = if upper {
                format!("{vendor:X}:{product:X}")
            } else {
                format!("{vendor:x}:{product:x}")
            };
            let identity = DeviceIdentity::parse(&text).unwrap();
            prop_assert_eq!(identity, DeviceIdentity::new(vendor, product));
            prop_assert_eq!(identity.to_string().parse::<DeviceIdentity>().unwrap(), identity);
        }

        #[test]
        fn prop_without_single_colon_is_rejected(text in "[0-9a-fA-F]{0,8}(:[0-9a-fA-F]{0,4}:[0-9a-fA-F]{0,4})?") {
            prop_assume!(text.matches(':').count() != 1);
            prop_assert!(DeviceIdentity::parse(&text).is_err());
        }

        #[test]
        fn prop_non_hex_segment_is_rejected(vendor in "[0-9a-f]{1,4}", junk in "[g-zG-Z_ .-]{1,3}") {
            let text = format!("{vendor}:{junk}");
            prop_assert!(DeviceIdentity::parse(&text).is_err());
            let text = format!("{junk}:{vendor}");
            prop_assert!(DeviceIdentity::parse(&text).is_err());
        }
    }
}
