// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Serde helpers for HeaderMap (de)serialization.
//!
//! Headers go on the wire as a map from header name to the ordered list of
//! values observed under that name, matching the event stream contract.

use hyper::header::HeaderValue;
use hyper::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub fn serialize_headers<S>(hm: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in hm.keys() {
        let values: Vec<String> = hm
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
            .collect();
        map.insert(name.as_str().to_string(), values);
    }
    map.serialize(serializer)
}

pub fn deserialize_headers<'de, D>(deserializer: D) -> Result<HeaderMap, D::Error>
where
    D: Deserializer<'de>,
{
    let map = BTreeMap::<String, Vec<String>>::deserialize(deserializer)?;
    let mut hm = HeaderMap::new();
    for (k, values) in map {
        let name = k
            .parse::<hyper::header::HeaderName>()
            .map_err(serde::de::Error::custom)?;
        for v in values {
            let val = v.parse::<HeaderValue>().map_err(serde::de::Error::custom)?;
            hm.append(name.clone(), val);
        }
    }
    Ok(hm)
}
