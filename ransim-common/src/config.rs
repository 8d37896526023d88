//! Simulator configuration
//!
//! YAML configuration describing the simulated gNodeBs, the AMFs they attach
//! to, the UE profiles (identities and key material) and the scripted test
//! profiles. Loaded once at startup and immutable afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Error;
use crate::events::ProcedureType;
use crate::types::{PduSessionType, Plmn, Snssai};

/// Top-level simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Simulated gNodeBs, keyed by name
    pub gnbs: HashMap<String, GnbConfig>,
    /// Core network AMFs, keyed by name
    pub amfs: HashMap<String, AmfConfig>,
    /// UE profiles (identity ranges and key material), keyed by model name
    #[serde(rename = "ueProfiles")]
    pub ue_profiles: HashMap<String, UeProfile>,
    /// Scripted test profiles to execute
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
    /// Default log level
    #[serde(rename = "logLevel", default)]
    pub log_level: Option<String>,
}

/// One simulated gNodeB.
#[derive(Debug, Clone, Deserialize)]
pub struct GnbConfig {
    /// Local N2 (control plane) bind address
    #[serde(rename = "n2BindAddr")]
    pub n2_bind_addr: String,
    /// Local N3 (user plane, GTP-U) bind address
    #[serde(rename = "n3BindAddr")]
    pub n3_bind_addr: String,
    /// Serving PLMN
    pub plmn: Plmn,
    /// Tracking area code (24 bits)
    pub tac: u32,
    /// NR cell identity (36 bits)
    pub nci: u64,
    /// gNB index used to partition the NGAP id space between gNBs
    #[serde(rename = "gnbIndex", default)]
    pub gnb_index: u8,
    /// Name of the AMF this gNB attaches to
    pub amf: String,
}

/// One AMF endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AmfConfig {
    /// Host name or IP address
    pub host: String,
    /// N2 port
    pub port: u16,
}

/// UE security capability flags advertised in the registration request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SecurityCapabilities {
    /// 5G-EA0 (null ciphering)
    #[serde(default = "default_true")]
    pub ea0: bool,
    /// 128-5G-EA1
    #[serde(default)]
    pub ea1: bool,
    /// 128-5G-EA2
    #[serde(default = "default_true")]
    pub ea2: bool,
    /// 128-5G-EA3
    #[serde(default)]
    pub ea3: bool,
    /// 5G-IA0 (null integrity)
    #[serde(default)]
    pub ia0: bool,
    /// 128-5G-IA1
    #[serde(default)]
    pub ia1: bool,
    /// 128-5G-IA2
    #[serde(default = "default_true")]
    pub ia2: bool,
    /// 128-5G-IA3
    #[serde(default)]
    pub ia3: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SecurityCapabilities {
    fn default() -> Self {
        Self {
            ea0: true,
            ea1: false,
            ea2: true,
            ea3: false,
            ia0: false,
            ia1: false,
            ia2: true,
            ia3: false,
        }
    }
}

impl SecurityCapabilities {
    /// Encodes the capabilities into the two octets carried in the
    /// registration request (EA flags, then IA flags, MSB first).
    pub fn encode(&self) -> [u8; 2] {
        let mut ea = 0u8;
        for (i, flag) in [self.ea0, self.ea1, self.ea2, self.ea3].iter().enumerate() {
            if *flag {
                ea |= 0x80 >> i;
            }
        }
        let mut ia = 0u8;
        for (i, flag) in [self.ia0, self.ia1, self.ia2, self.ia3].iter().enumerate() {
            if *flag {
                ia |= 0x80 >> i;
            }
        }
        [ea, ia]
    }
}

/// One UE profile: an identity range plus the key material and session
/// defaults shared by every UE instantiated from it.
#[derive(Debug, Clone, Deserialize)]
pub struct UeProfile {
    /// First SUPI of the range, `imsi-` followed by 15 digits
    #[serde(rename = "startSupi")]
    pub start_supi: String,
    /// Number of UEs drawn from this profile
    #[serde(rename = "numUes", default = "default_num_ues")]
    pub num_ues: u32,
    /// Permanent subscriber key K, 32 hex digits
    pub key: String,
    /// Operator key OPc, 32 hex digits
    pub opc: String,
    /// Initial sequence number, 12 hex digits
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: String,
    /// Home PLMN
    pub plmn: Plmn,
    /// Default data network name
    pub dnn: String,
    /// Default slice selector
    #[serde(rename = "sNssai", default)]
    pub snssai: Snssai,
    /// Requested PDU session type
    #[serde(rename = "sessionType", default)]
    pub session_type: PduSessionType,
    /// Advertised security capabilities
    #[serde(rename = "securityCapabilities", default)]
    pub security: SecurityCapabilities,
}

fn default_num_ues() -> u32 {
    1
}

impl UeProfile {
    /// Parses the permanent key K.
    pub fn key_bytes(&self) -> Result<[u8; 16], Error> {
        parse_key_hex(&self.key, "key")
    }

    /// Parses the operator key OPc.
    pub fn opc_bytes(&self) -> Result<[u8; 16], Error> {
        parse_key_hex(&self.opc, "opc")
    }

    /// Parses the initial sequence number.
    pub fn sqn(&self) -> Result<u64, Error> {
        u64::from_str_radix(&self.sequence_number, 16)
            .map_err(|e| Error::Config(format!("invalid sequenceNumber: {e}")))
    }

    /// Produces the SUPI at the given offset within this profile's range.
    pub fn supi_at(&self, offset: u32) -> Result<String, Error> {
        let digits = self
            .start_supi
            .strip_prefix("imsi-")
            .ok_or_else(|| Error::Config(format!("invalid startSupi: {}", self.start_supi)))?;
        let base: u64 = digits
            .parse()
            .map_err(|e| Error::Config(format!("invalid startSupi: {e}")))?;
        Ok(format!("imsi-{:015}", base + u64::from(offset)))
    }
}

fn parse_key_hex(s: &str, what: &str) -> Result<[u8; 16], Error> {
    let bytes = hex::decode(s).map_err(|e| Error::Config(format!("invalid {what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Config(format!("{what} must be 16 octets")))
}

/// One scripted test profile: which gNB, which UE profile, and the ordered
/// procedure sequence every UE runs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Profile name, for reporting
    pub name: String,
    /// gNB the UEs attach through
    pub gnb: String,
    /// UE profile the UEs are drawn from
    #[serde(rename = "ueProfile")]
    pub ue_profile: String,
    /// Ordered procedures to drive
    pub procedures: Vec<ProcedureType>,
    /// Uplink packets per session for the data-transfer procedure
    #[serde(rename = "dataPackets", default = "default_data_packets")]
    pub data_packets: u32,
}

fn default_data_packets() -> u32 {
    5
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-references and key material.
    pub fn validate(&self) -> Result<(), Error> {
        if self.gnbs.is_empty() {
            return Err(Error::Config("no gNB(s) configured".into()));
        }
        if self.amfs.is_empty() {
            return Err(Error::Config("no AMF(s) configured".into()));
        }
        if self.ue_profiles.is_empty() {
            return Err(Error::Config("no UE profile(s) configured".into()));
        }
        for (name, gnb) in &self.gnbs {
            if !self.amfs.contains_key(&gnb.amf) {
                return Err(Error::Config(format!(
                    "gnb {name} references unknown amf {}",
                    gnb.amf
                )));
            }
        }
        for profile in &self.profiles {
            if !self.gnbs.contains_key(&profile.gnb) {
                return Err(Error::Config(format!(
                    "profile {} references unknown gnb {}",
                    profile.name, profile.gnb
                )));
            }
            if !self.ue_profiles.contains_key(&profile.ue_profile) {
                return Err(Error::Config(format!(
                    "profile {} references unknown ue profile {}",
                    profile.name, profile.ue_profile
                )));
            }
        }
        for (model, ue) in &self.ue_profiles {
            ue.key_bytes()
                .map_err(|e| Error::Config(format!("ue profile {model}: {e}")))?;
            ue.opc_bytes()
                .map_err(|e| Error::Config(format!("ue profile {model}: {e}")))?;
            ue.sqn()
                .map_err(|e| Error::Config(format!("ue profile {model}: {e}")))?;
            ue.supi_at(0)?;
        }
        Ok(())
    }

    /// Looks up a UE profile by model name.
    pub fn ue_profile(&self, model: &str) -> Result<&UeProfile, Error> {
        self.ue_profiles
            .get(model)
            .ok_or_else(|| Error::Config(format!("no UE profile named {model}")))
    }

    /// Looks up a gNB by name.
    pub fn gnb(&self, name: &str) -> Result<&GnbConfig, Error> {
        self.gnbs
            .get(name)
            .ok_or_else(|| Error::Config(format!("no gNB named {name}")))
    }

    /// Looks up an AMF by name.
    pub fn amf(&self, name: &str) -> Result<&AmfConfig, Error> {
        self.amfs
            .get(name)
            .ok_or_else(|| Error::Config(format!("no AMF named {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
gnbs:
  gnb1:
    n2BindAddr: "127.0.0.1:0"
    n3BindAddr: "127.0.0.1:0"
    plmn: { mcc: 208, mnc: 93 }
    tac: 1
    nci: 0x10
    amf: amf1
amfs:
  amf1:
    host: "127.0.0.1"
    port: 38412
ueProfiles:
  default:
    startSupi: "imsi-208930000000001"
    numUes: 2
    key: "5122250214c33e723a5dd523fc145fc0"
    opc: "981d464c7c52eb6e5036234984ad0bcf"
    sequenceNumber: "000000000020"
    plmn: { mcc: 208, mnc: 93 }
    dnn: "internet"
    sNssai: { sst: 1, sd: 0x010203 }
profiles:
  - name: register
    gnb: gnb1
    ueProfile: default
    procedures: [registration, pdu-session-establishment]
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.gnbs.len(), 1);
        let ue = config.ue_profile("default").unwrap();
        assert_eq!(ue.num_ues, 2);
        assert_eq!(ue.key_bytes().unwrap().len(), 16);
        assert_eq!(ue.sqn().unwrap(), 0x20);
        assert_eq!(
            config.profiles[0].procedures,
            vec![
                ProcedureType::Registration,
                ProcedureType::PduSessionEstablishment
            ]
        );
    }

    #[test]
    fn test_supi_range() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let ue = config.ue_profile("default").unwrap();
        assert_eq!(ue.supi_at(0).unwrap(), "imsi-208930000000001");
        assert_eq!(ue.supi_at(9).unwrap(), "imsi-208930000000010");
    }

    #[test]
    fn test_validate_rejects_dangling_refs() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.profiles[0].gnb = "nope".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_security_capabilities_encoding() {
        let caps = SecurityCapabilities::default();
        let [ea, ia] = caps.encode();
        assert_eq!(ea, 0b1010_0000); // EA0 + EA2
        assert_eq!(ia, 0b0010_0000); // IA2
    }
}
