//! Mapbox Vector Tile decoding
//!
//! Decodes the protobuf tile schema (layers, features, key/value tables)
//! and extracts the integer `color` property that the traffic layer uses
//! to classify road segments.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message;
use tracing::trace;

use crate::types::ColorCode;
use crate::Result;

/// Feature property holding the traffic category
pub const COLOR_PROPERTY: &str = "color";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Wire schema, vector_tile.proto 2.1
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Tile {
        #[prost(message, repeated, tag = "3")]
        pub layers: Vec<Layer>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Layer {
        #[prost(uint32, required, tag = "15", default = "1")]
        pub version: u32,
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(message, repeated, tag = "2")]
        pub features: Vec<Feature>,
        #[prost(string, repeated, tag = "3")]
        pub keys: Vec<String>,
        #[prost(message, repeated, tag = "4")]
        pub values: Vec<Value>,
        #[prost(uint32, optional, tag = "5", default = "4096")]
        pub extent: Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(uint64, optional, tag = "1", default = "0")]
        pub id: Option<u64>,
        /// Alternating key/value indices into the layer tables
        #[prost(uint32, repeated, tag = "2")]
        pub tags: Vec<u32>,
        #[prost(enumeration = "GeomType", optional, tag = "3")]
        pub r#type: Option<i32>,
        #[prost(uint32, repeated, tag = "4")]
        pub geometry: Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        #[prost(string, optional, tag = "1")]
        pub string_value: Option<String>,
        #[prost(float, optional, tag = "2")]
        pub float_value: Option<f32>,
        #[prost(double, optional, tag = "3")]
        pub double_value: Option<f64>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: Option<i64>,
        #[prost(uint64, optional, tag = "5")]
        pub uint_value: Option<u64>,
        #[prost(sint64, optional, tag = "6")]
        pub sint_value: Option<i64>,
        #[prost(bool, optional, tag = "7")]
        pub bool_value: Option<bool>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum GeomType {
        Unknown = 0,
        Point = 1,
        Linestring = 2,
        Polygon = 3,
    }
}

/// A typed feature property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl PropertyValue {
    fn from_proto(value: &proto::Value) -> Option<Self> {
        // Integer variants take precedence when an encoder sets several fields.
        if let Some(v) = value.int_value {
            return Some(Self::Int(v));
        }
        if let Some(v) = value.sint_value {
            return Some(Self::Int(v));
        }
        if let Some(v) = value.uint_value {
            return Some(Self::UInt(v));
        }
        if let Some(v) = value.double_value {
            return Some(Self::Float(v));
        }
        if let Some(v) = value.float_value {
            return Some(Self::Float(f64::from(v)));
        }
        if let Some(v) = &value.string_value {
            return Some(Self::String(v.clone()));
        }
        value.bool_value.map(Self::Bool)
    }

    /// Integer view of the value, if it holds a whole number
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => {
                let int = *v as i64;
                (int as f64 == *v).then_some(int)
            }
            _ => None,
        }
    }
}

/// A decoded vector tile
#[derive(Debug, Clone, Default)]
pub struct VectorTile {
    tile: proto::Tile,
}

impl VectorTile {
    pub fn layers(&self) -> &[proto::Layer] {
        &self.tile.layers
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.tile.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn feature_count(&self) -> usize {
        self.tile.layers.iter().map(|l| l.features.len()).sum()
    }

    /// Every integer `color` carried by a feature, across all layers
    pub fn color_codes(&self) -> BTreeSet<ColorCode> {
        let mut colors = BTreeSet::new();

        for layer in &self.tile.layers {
            for feature in &layer.features {
                if let Some(code) = feature_property(layer, feature, COLOR_PROPERTY)
                    .as_ref()
                    .and_then(PropertyValue::as_integer)
                {
                    colors.insert(code);
                }
            }
        }

        colors
    }
}

/// Resolve a feature property through the layer's key and value tables.
///
/// When a key appears more than once the last pair wins, and a pair
/// whose value index is outside the value table clears the property.
/// Pairs whose key index is outside the key table are ignored.
pub fn feature_property(
    layer: &proto::Layer,
    feature: &proto::Feature,
    key: &str,
) -> Option<PropertyValue> {
    let mut found = None;

    for pair in feature.tags.chunks_exact(2) {
        let Some(name) = layer.keys.get(pair[0] as usize) else {
            continue;
        };
        if name != key {
            continue;
        }
        found = layer
            .values
            .get(pair[1] as usize)
            .and_then(PropertyValue::from_proto);
    }

    found
}

/// Decode a tile buffer, inflating it first if it is gzip-compressed
pub fn decode_tile(buf: &[u8]) -> Result<VectorTile> {
    let raw = inflate_if_gzipped(buf)?;
    let tile = proto::Tile::decode(raw.as_ref())?;

    trace!(
        layers = tile.layers.len(),
        bytes = buf.len(),
        "Decoded vector tile"
    );

    Ok(VectorTile { tile })
}

/// Decode a tile buffer and collect its distinct color codes
pub fn decode_colors(buf: &[u8]) -> Result<BTreeSet<ColorCode>> {
    Ok(decode_tile(buf)?.color_codes())
}

fn inflate_if_gzipped(buf: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !buf.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(buf));
    }

    let mut inflated = Vec::with_capacity(buf.len() * 4);
    GzDecoder::new(buf).read_to_end(&mut inflated)?;
    Ok(Cow::Owned(inflated))
}
