use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// A validated IPv4 or IPv6 address. Construction is the only validation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ip(IpAddr);

impl Ip {
    pub fn parse(input: &str) -> Result<Self, GuardError> {
        input
            .trim()
            .parse::<IpAddr>()
            .map(Ip)
            .map_err(|_| GuardError::InvalidAddress(input.to_string()))
    }
}

impl From<IpAddr> for Ip {
    fn from(addr: IpAddr) -> Self {
        Ip(addr)
    }
}

impl FromStr for Ip {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ip::parse(s)
    }
}

impl TryFrom<String> for Ip {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ip::parse(&value)
    }
}

impl From<Ip> for String {
    fn from(ip: Ip) -> Self {
        ip.to_string()
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
