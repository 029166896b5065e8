//! The results document published to the content-addressed store.
//!
//! On the wire `endTime` is an ISO-8601 string and every count is a decimal
//! string, the format browser clients already pin. Reading also accepts
//! plain numbers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TypesError;
use crate::tally::VoteTally;
use crate::time::Timestamp;

/// One candidate's final count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub name: String,
    #[serde(with = "count")]
    pub votes: u64,
}

/// Published election results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDocument {
    /// When the results were captured.
    #[serde(with = "end_time")]
    pub end_time: Timestamp,
    #[serde(with = "count_map")]
    pub results: BTreeMap<String, u64>,
    /// Candidates in ledger order.
    pub candidates: Vec<CandidateResult>,
}

impl ResultsDocument {
    pub fn from_tally(end_time: Timestamp, tally: &VoteTally) -> Self {
        let candidates: Vec<CandidateResult> = tally
            .entries()
            .iter()
            .map(|(name, votes)| CandidateResult {
                name: name.as_str().to_string(),
                votes: *votes,
            })
            .collect();
        let results = candidates
            .iter()
            .map(|c| (c.name.clone(), c.votes))
            .collect();
        Self {
            end_time,
            results,
            candidates,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, TypesError> {
        serde_json::to_value(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, TypesError> {
        serde_json::from_value(value).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    /// `(name, votes)` pairs in ledger order.
    pub fn pairs(&self) -> Vec<(&str, u64)> {
        self.candidates
            .iter()
            .map(|c| (c.name.as_str(), c.votes))
            .collect()
    }
}

/// A count as written (decimal string) or as a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Number(u64),
    Text(String),
}

impl RawCount {
    fn value<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            RawCount::Number(n) => Ok(n),
            RawCount::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| E::custom(format!("invalid count {s:?}: {e}"))),
        }
    }
}

mod count {
    use super::RawCount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(votes: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(votes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        RawCount::deserialize(d)?.value()
    }
}

mod count_map {
    use super::RawCount;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, u64>, s: S) -> Result<S::Ok, S::Error> {
        let mut out = s.serialize_map(Some(map.len()))?;
        for (name, votes) in map {
            out.serialize_entry(name, &votes.to_string())?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, u64>, D::Error> {
        BTreeMap::<String, RawCount>::deserialize(d)?
            .into_iter()
            .map(|(name, raw)| Ok((name, raw.value::<D::Error>()?)))
            .collect()
    }
}

mod end_time {
    use crate::time::Timestamp;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTime {
        Secs(u64),
        Iso(String),
    }

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        match RawTime::deserialize(d)? {
            RawTime::Secs(secs) => Ok(Timestamp::new(secs)),
            RawTime::Iso(raw) => Timestamp::parse_rfc3339(&raw).map_err(serde::de::Error::custom),
        }
    }
}
