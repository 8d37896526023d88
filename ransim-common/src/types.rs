//! Core 5G identity and session types shared across the simulator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Public Land Mobile Network identifier (MCC + MNC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Plmn {
    /// Mobile Country Code (3 digits)
    pub mcc: u16,
    /// Mobile Network Code (2-3 digits)
    pub mnc: u16,
    /// True if the MNC is 3 digits
    #[serde(default)]
    pub long_mnc: bool,
}

impl Plmn {
    /// Creates a new PLMN with a 2-digit MNC.
    pub fn new(mcc: u16, mnc: u16) -> Self {
        Self {
            mcc,
            mnc,
            long_mnc: false,
        }
    }

    /// Encodes the PLMN into the 3-octet BCD wire format (TS 24.501 9.11.3.4).
    pub fn encode(&self) -> [u8; 3] {
        let mcc1 = (self.mcc / 100 % 10) as u8;
        let mcc2 = (self.mcc / 10 % 10) as u8;
        let mcc3 = (self.mcc % 10) as u8;
        let (mnc1, mnc2, mnc3) = if self.long_mnc {
            (
                (self.mnc / 100 % 10) as u8,
                (self.mnc / 10 % 10) as u8,
                (self.mnc % 10) as u8,
            )
        } else {
            (0x0f, (self.mnc / 10 % 10) as u8, (self.mnc % 10) as u8)
        };
        [mcc2 << 4 | mcc1, mnc1 << 4 | mcc3, mnc3 << 4 | mnc2]
    }

    /// Decodes a PLMN from its 3-octet BCD wire format.
    pub fn decode(octets: &[u8; 3]) -> Self {
        let mcc1 = (octets[0] & 0x0f) as u16;
        let mcc2 = (octets[0] >> 4) as u16;
        let mcc3 = (octets[1] & 0x0f) as u16;
        let mnc1 = (octets[1] >> 4) as u16;
        let mnc2 = (octets[2] & 0x0f) as u16;
        let mnc3 = (octets[2] >> 4) as u16;
        let long_mnc = mnc1 != 0x0f;
        let mnc = if long_mnc {
            mnc1 * 100 + mnc2 * 10 + mnc3
        } else {
            mnc2 * 10 + mnc3
        };
        Self {
            mcc: mcc1 * 100 + mcc2 * 10 + mcc3,
            mnc,
            long_mnc,
        }
    }
}

impl fmt::Display for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.long_mnc {
            write!(f, "{:03}/{:03}", self.mcc, self.mnc)
        } else {
            write!(f, "{:03}/{:02}", self.mcc, self.mnc)
        }
    }
}

/// Single Network Slice Selection Assistance Information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snssai {
    /// Slice/Service Type
    pub sst: u8,
    /// Slice Differentiator (24 bits), optional
    #[serde(default)]
    pub sd: Option<u32>,
}

impl Default for Snssai {
    fn default() -> Self {
        Self { sst: 1, sd: None }
    }
}

impl fmt::Display for Snssai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sd {
            Some(sd) => write!(f, "sst={} sd=0x{sd:06x}", self.sst),
            None => write!(f, "sst={}", self.sst),
        }
    }
}

/// 5G Globally Unique Temporary Identifier, assigned by the AMF after
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guti5G {
    /// PLMN of the assigning network
    pub plmn: Plmn,
    /// AMF region id
    pub amf_region_id: u8,
    /// AMF set id (10 bits)
    pub amf_set_id: u16,
    /// AMF pointer (6 bits)
    pub amf_pointer: u8,
    /// 5G-TMSI
    pub tmsi: u32,
}

impl fmt::Display for Guti5G {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "5g-guti-{}-{:02x}-{:03x}-{:02x}-{:08x}",
            self.plmn, self.amf_region_id, self.amf_set_id, self.amf_pointer, self.tmsi
        )
    }
}

/// PDU session type (TS 24.501 9.11.4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PduSessionType {
    /// IPv4 PDU session
    #[default]
    Ipv4,
    /// IPv6 PDU session
    Ipv6,
    /// IPv4v6 (dual-stack) PDU session
    Ipv4v6,
}

impl PduSessionType {
    /// Wire value per TS 24.501.
    pub fn value(self) -> u8 {
        match self {
            PduSessionType::Ipv4 => 1,
            PduSessionType::Ipv6 => 2,
            PduSessionType::Ipv4v6 => 3,
        }
    }

    /// Parses the wire value.
    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            1 => Some(PduSessionType::Ipv4),
            2 => Some(PduSessionType::Ipv6),
            3 => Some(PduSessionType::Ipv4v6),
            _ => None,
        }
    }
}

impl fmt::Display for PduSessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduSessionType::Ipv4 => write!(f, "IPv4"),
            PduSessionType::Ipv6 => write!(f, "IPv6"),
            PduSessionType::Ipv4v6 => write!(f, "IPv4v6"),
        }
    }
}

/// Allocated PDU address. Only IPv4 allocation is modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduAddress {
    /// IPv4 address assigned by the network
    Ipv4(Ipv4Addr),
}

impl fmt::Display for PduAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduAddress::Ipv4(addr) => write!(f, "{addr}"),
        }
    }
}

/// Derives the SUCI from a SUPI of the form `imsi-<15 digits>`.
///
/// Null-scheme concealment only: the SUCI carries the MSIN in the clear with
/// protection scheme id 0, which is what the simulator sends in registration
/// requests before any security context exists.
pub fn supi_to_suci(supi: &str, plmn: &Plmn) -> Result<Vec<u8>, crate::Error> {
    let digits = supi
        .strip_prefix("imsi-")
        .ok_or_else(|| crate::Error::Decode(format!("unsupported SUPI format: {supi}")))?;
    if digits.len() != 15 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(crate::Error::Decode(format!("invalid IMSI: {digits}")));
    }

    // SUPI format (0 = IMSI), PLMN, routing indicator 0, scheme 0 (null),
    // home network public key id 0, then the MSIN as BCD.
    let mut suci = Vec::with_capacity(16);
    suci.push(0x01); // type: SUCI, format: IMSI
    suci.extend_from_slice(&plmn.encode());
    suci.extend_from_slice(&[0xf0, 0xff]); // routing indicator "0"
    suci.push(0x00); // protection scheme: null
    suci.push(0x00); // home network public key id
    let msin = &digits[digits.len() - 10..];
    let msin_bytes = msin.as_bytes();
    for pair in msin_bytes.chunks(2) {
        let low = pair[0] - b'0';
        let high = if pair.len() > 1 { pair[1] - b'0' } else { 0x0f };
        suci.push(high << 4 | low);
    }
    Ok(suci)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plmn_encode_decode() {
        let plmn = Plmn::new(208, 93);
        let encoded = plmn.encode();
        assert_eq!(Plmn::decode(&encoded), plmn);

        let long = Plmn {
            mcc: 310,
            mnc: 410,
            long_mnc: true,
        };
        assert_eq!(Plmn::decode(&long.encode()), long);
    }

    #[test]
    fn test_plmn_display() {
        assert_eq!(Plmn::new(208, 93).to_string(), "208/93");
    }

    #[test]
    fn test_pdu_session_type_values() {
        assert_eq!(PduSessionType::Ipv4.value(), 1);
        assert_eq!(PduSessionType::from_value(3), Some(PduSessionType::Ipv4v6));
        assert_eq!(PduSessionType::from_value(9), None);
    }

    #[test]
    fn test_supi_to_suci() {
        let plmn = Plmn::new(208, 93);
        let suci = supi_to_suci("imsi-208930000000001", &plmn).unwrap();
        assert_eq!(suci[0], 0x01);
        assert_eq!(&suci[1..4], &plmn.encode());
        // 10-digit MSIN packs into 5 BCD octets after the 8-octet prefix
        assert_eq!(suci.len(), 13);
    }

    #[test]
    fn test_supi_to_suci_rejects_malformed() {
        let plmn = Plmn::new(208, 93);
        assert!(supi_to_suci("208930000000001", &plmn).is_err());
        assert!(supi_to_suci("imsi-12345", &plmn).is_err());
    }

    #[test]
    fn test_guti_display() {
        let guti = Guti5G {
            plmn: Plmn::new(208, 93),
            amf_region_id: 1,
            amf_set_id: 2,
            amf_pointer: 3,
            tmsi: 0xdeadbeef,
        };
        assert_eq!(guti.to_string(), "5g-guti-208/93-01-002-03-deadbeef");
    }
}
