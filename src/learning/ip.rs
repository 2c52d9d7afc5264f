//! host.ip.address：提取点分十进制 IPv4 地址

use std::net::Ipv4Addr;

use regex::Regex;

use super::Parser;
use crate::objects::Fact;

/// 不作为事实记录的地址
const DENYLIST: [&str; 3] = ["0.0.0.0", "127.0.0.1", "255.255.0.0"];

pub struct IpParser {
    pattern: Regex,
}

impl IpParser {
    pub const TRAIT: &'static str = "host.ip.address";

    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b")
                .expect("valid ipv4 pattern"),
        }
    }

    fn is_valid(raw: &str) -> bool {
        !DENYLIST.contains(&raw) && raw.parse::<Ipv4Addr>().is_ok()
    }
}

impl Default for IpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for IpParser {
    fn trait_name(&self) -> &str {
        Self::TRAIT
    }

    fn parse(&self, blob: &str) -> Vec<Fact> {
        self.pattern
            .find_iter(blob)
            .map(|m| m.as_str())
            .filter(|ip| Self::is_valid(ip))
            .map(|ip| Fact::new(Self::TRAIT, ip))
            .collect()
    }
}
