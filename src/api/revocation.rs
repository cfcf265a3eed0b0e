//! Revoked certificates as they appear on a CRL.

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::commons::util::ext_serde;


//------------ Serial --------------------------------------------------------

/// A certificate serial number.
///
/// Serials are unbounded unsigned integers. They are written in hex with a
/// `0x` prefix and read in that form or as plain decimal digits.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Serial(BigUint);

impl Serial {
    pub fn new(value: BigUint) -> Self {
        Serial(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for Serial {
    fn from(value: u64) -> Self {
        Serial(BigUint::from(value))
    }
}

impl From<BigUint> for Serial {
    fn from(value: BigUint) -> Self {
        Serial(value)
    }
}

impl FromStr for Serial {
    type Err = InvalidSerial;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
            None => BigUint::parse_bytes(s.as_bytes(), 10),
        };
        parsed.map(Serial).ok_or_else(|| InvalidSerial(s.to_string()))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for Serial {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}

impl<'de> Deserialize<'de> for Serial {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Serial::from_str(&s).map_err(serde::de::Error::custom)
    }
}


//------------ InvalidSerial -------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidSerial(String);

impl fmt::Display for InvalidSerial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid serial number: '{}'", self.0)
    }
}

impl std::error::Error for InvalidSerial {}


//------------ RevocationReason ----------------------------------------------

/// Identifies the reason a certificate was revoked, see RFC 5280 §5.3.1.
///
/// `RemoveFromCrl` is used on delta CRLs for entries that left the full
/// CRL because they were unrevoked or expired.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
    PartialOrd, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    #[default]
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // 7 is not defined.
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    const ALL: [RevocationReason; 10] = [
        RevocationReason::Unspecified,
        RevocationReason::KeyCompromise,
        RevocationReason::CaCompromise,
        RevocationReason::AffiliationChanged,
        RevocationReason::Superseded,
        RevocationReason::CessationOfOperation,
        RevocationReason::CertificateHold,
        RevocationReason::RemoveFromCrl,
        RevocationReason::PrivilegeWithdrawn,
        RevocationReason::AaCompromise,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    fn name(self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CaCompromise => "caCompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
            RevocationReason::RemoveFromCrl => "removeFromCrl",
            RevocationReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            RevocationReason::AaCompromise => "aaCompromise",
        }
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    /// Accepts the RFC 5280 name in any case or the numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| format!("unknown revocation reason code: {s}"))
        }
        Self::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown revocation reason: {s}"))
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


//------------ EntryExtension ------------------------------------------------

/// An entry extension that is carried over to the CRL unchanged.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EntryExtension {
    pub oid: String,

    #[serde(default)]
    pub critical: bool,

    #[serde(
        serialize_with = "ext_serde::ser_bytes",
        deserialize_with = "ext_serde::de_bytes"
    )]
    pub value: Vec<u8>,
}


//------------ RevokedEntry --------------------------------------------------

/// A single revoked certificate.
///
/// Besides the fields that end up on the CRL, this carries the class of
/// the certificate (CA or not, issuing profile) so that the content
/// filters of an issuing point can be applied.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevokedEntry {
    pub serial: Serial,
    pub revocation_date: DateTime<Utc>,
    pub reason: RevocationReason,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<EntryExtension>,

    #[serde(default)]
    pub is_ca: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl RevokedEntry {
    pub fn new(
        serial: Serial,
        revocation_date: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Self {
        RevokedEntry {
            serial,
            revocation_date,
            reason,
            extensions: vec![],
            is_ca: false,
            profile: None,
        }
    }

    pub fn with_ca(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_extension(mut self, extension: EntryExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Returns the entry that tells delta CRL users to drop this serial.
    pub fn removal_marker(&self, date: DateTime<Utc>) -> Self {
        RevokedEntry {
            serial: self.serial.clone(),
            revocation_date: date,
            reason: RevocationReason::RemoveFromCrl,
            extensions: vec![],
            is_ca: self.is_ca,
            profile: self.profile.clone(),
        }
    }

    pub fn is_removal_marker(&self) -> bool {
        self.reason == RevocationReason::RemoveFromCrl
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print_serials() {
        let hex = Serial::from_str("0x10").unwrap();
        let dec = Serial::from_str("16").unwrap();
        assert_eq!(hex, dec);
        assert_eq!(hex.to_string(), "0x10");

        let big = Serial::from_str(
            "0x1234567890abcdef1234567890abcdef1234567890"
        ).unwrap();
        assert!(big > Serial::from(u64::MAX));

        assert!(Serial::from_str("0xzz").is_err());
        assert!(Serial::from_str("-1").is_err());
    }

    #[test]
    fn serials_order_numerically() {
        let mut serials: Vec<Serial> = ["0x100", "0x2", "10"]
            .iter()
            .map(|s| Serial::from_str(s).unwrap())
            .collect();
        serials.sort();
        assert_eq!(
            serials.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["0x2", "0xa", "0x100"]
        );
    }

    #[test]
    fn reasons() {
        assert_eq!(
            RevocationReason::from_str("KeyCompromise").unwrap(),
            RevocationReason::KeyCompromise
        );
        assert_eq!(
            RevocationReason::from_str("6").unwrap(),
            RevocationReason::CertificateHold
        );
        assert!(RevocationReason::from_str("7").is_err());
        assert_eq!(
            serde_json::to_string(&RevocationReason::CaCompromise).unwrap(),
            "\"caCompromise\""
        );
    }

    #[test]
    fn entry_json() {
        let date = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = RevokedEntry::new(
            Serial::from(0x10), date, RevocationReason::KeyCompromise
        ).with_profile("tls-server");

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"serial\":\"0x10\""));
        assert!(!json.contains("extensions"));

        let back: RevokedEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);

        let marker = entry.removal_marker(date);
        assert!(marker.is_removal_marker());
        assert_eq!(marker.serial, entry.serial);
    }
}
