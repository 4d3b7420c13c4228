//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::Ipv4Addr;

use sdnc_utils::mac::MacAddr;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_addr: String,
    pub lb: Vec<LbBinding>,
    pub learning: Learning,
    pub known_hosts: Vec<KnownHost>,
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LbBinding {
    pub service_ip: Ipv4Addr,
    pub servers: Vec<Ipv4Addr>,
    pub switch_dpid: u64,
    #[serde(deserialize_with = "deserialize_mac")]
    pub switch_mac: MacAddr,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Learning {
    pub enabled: bool,
    pub transparent: bool,
    pub hold_down_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnownHost {
    pub ip: Ipv4Addr,
    #[serde(deserialize_with = "deserialize_mac")]
    pub mac: MacAddr,
}

fn deserialize_mac<'de, D>(deserializer: D) -> Result<MacAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub level: String,
    pub ansi: bool,
    pub json: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/sdnc-controller.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str)
                .expect("Failed to parse configuration file"),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_addr: "0.0.0.0:6633".to_owned(),
            // Mirrors the compiled-in `(service_ip, servers, dpid)` table
            // the original launcher falls back to when invoked with no
            // arguments.
            lb: vec![LbBinding {
                service_ip: Ipv4Addr::new(10, 0, 1, 1),
                servers: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
                switch_dpid: 1,
                switch_mac: MacAddr::ZERO,
            }],
            learning: Default::default(),
            known_hosts: Vec::new(),
            logging: Default::default(),
        }
    }
}

// ===== impl Learning =====

impl Default for Learning {
    fn default() -> Learning {
        Learning {
            enabled: false,
            transparent: false,
            hold_down_secs: 0,
        }
    }
}
