//! Core types for the traffic color suite

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Highest zoom level the map application accepts
pub const MAX_ZOOM: u8 = 19;

/// Integer carried by a tile feature's `color` property
pub type ColorCode = i64;

/// Map zoom level, 0..=19
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Zoom(u8);

impl Zoom {
    pub fn new(level: u8) -> Result<Self> {
        Self::try_from(i64::from(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Zoom {
    type Error = Error;

    fn try_from(level: i64) -> Result<Self> {
        if (0..=i64::from(MAX_ZOOM)).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(Error::InvalidZoom(level))
        }
    }
}

impl From<Zoom> for u8 {
    fn from(zoom: Zoom) -> u8 {
        zoom.0
    }
}

impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic center of the map viewport, rendered as `lat/lon`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapCenter {
    pub lat: f64,
    pub lon: f64,
}

impl Default for MapCenter {
    fn default() -> Self {
        // Paris, around the Bastille
        Self { lat: 48.8581, lon: 2.3727 }
    }
}

impl fmt::Display for MapCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lat, self.lon)
    }
}

impl FromStr for MapCenter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidCenter(s.to_string()))?;
        let lat: f64 = lat.trim().parse().map_err(|_| Error::InvalidCenter(s.to_string()))?;
        let lon: f64 = lon.trim().parse().map_err(|_| Error::InvalidCenter(s.to_string()))?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidCenter(s.to_string()));
        }

        Ok(Self { lat, lon })
    }
}

/// Traffic categories rendered by the traffic layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficColor {
    Black,
    Red,
    Orange,
}

impl TrafficColor {
    pub const ALL: [TrafficColor; 3] = [
        TrafficColor::Black,
        TrafficColor::Red,
        TrafficColor::Orange,
    ];

    /// Code stored in the tile's `color` property
    pub fn code(self) -> ColorCode {
        match self {
            TrafficColor::Black => 1,
            TrafficColor::Red => 2,
            TrafficColor::Orange => 3,
        }
    }

    pub fn from_code(code: ColorCode) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or(Error::UnknownColor(code))
    }
}

impl fmt::Display for TrafficColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficColor::Black => write!(f, "BLACK"),
            TrafficColor::Red => write!(f, "RED"),
            TrafficColor::Orange => write!(f, "ORANGE"),
        }
    }
}
