use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
#[error("unsupported ticker: {0}")]
pub struct UnknownTicker(pub String);

/// Assets a portfolio can allocate to. The set is fixed: prices are snapshotted
/// per ticker and allocations referencing anything else are rejected up front.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Ticker {
    BTC,
    ETH,
    SOL,
    BNB,
    XRP,
    ADA,
    DOGE,
    AVAX,
    DOT,
    LINK,
    MATIC,
    LTC,
}

impl Ticker {
    pub const ALL: [Ticker; 12] = [
        Ticker::BTC,
        Ticker::ETH,
        Ticker::SOL,
        Ticker::BNB,
        Ticker::XRP,
        Ticker::ADA,
        Ticker::DOGE,
        Ticker::AVAX,
        Ticker::DOT,
        Ticker::LINK,
        Ticker::MATIC,
        Ticker::LTC,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ticker::BTC => "BTC",
            Ticker::ETH => "ETH",
            Ticker::SOL => "SOL",
            Ticker::BNB => "BNB",
            Ticker::XRP => "XRP",
            Ticker::ADA => "ADA",
            Ticker::DOGE => "DOGE",
            Ticker::AVAX => "AVAX",
            Ticker::DOT => "DOT",
            Ticker::LINK => "LINK",
            Ticker::MATIC => "MATIC",
            Ticker::LTC => "LTC",
        }
    }
}

impl FromStr for Ticker {
    type Err = UnknownTicker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(Ticker::BTC),
            "ETH" => Ok(Ticker::ETH),
            "SOL" => Ok(Ticker::SOL),
            "BNB" => Ok(Ticker::BNB),
            "XRP" => Ok(Ticker::XRP),
            "ADA" => Ok(Ticker::ADA),
            "DOGE" => Ok(Ticker::DOGE),
            "AVAX" => Ok(Ticker::AVAX),
            "DOT" => Ok(Ticker::DOT),
            "LINK" => Ok(Ticker::LINK),
            "MATIC" => Ok(Ticker::MATIC),
            "LTC" => Ok(Ticker::LTC),
            other => Err(UnknownTicker(other.to_string())),
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
