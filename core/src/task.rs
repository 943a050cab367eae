//! Task-scoped identifiers, secrets and query descriptions exchanged with the interop API.

use crate::time::{Duration, Time};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use educe::Educe;
use rand::{
    Rng,
    distr::{Alphanumeric, Distribution, StandardUniform},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// Errors that can occur while decoding task-scoped values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid length for {kind}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unknown query type code {0}")]
    UnknownQueryType(u8),
    #[error("unknown fixed size query subtype {0}")]
    UnknownFixedSizeQuerySubtype(u8),
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),
}

/// Identifies a DAP task. Rendered as unpadded URL-safe base64 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId([u8; Self::LEN]);

impl TaskId {
    /// LEN is the length of a task ID in bytes.
    pub const LEN: usize = 32;

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl From<[u8; TaskId::LEN]> for TaskId {
    fn from(task_id: [u8; TaskId::LEN]) -> Self {
        Self(task_id)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl Debug for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({self})")
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        let actual = bytes.len();
        let task_id = bytes.try_into().map_err(|_| Error::InvalidLength {
            kind: "TaskId",
            expected: Self::LEN,
            actual,
        })?;
        Ok(Self(task_id))
    }
}

impl Distribution<TaskId> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TaskId {
        TaskId(rng.random())
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(de::Error::custom)
    }
}

/// A bearer secret shared between two participants of a task. Generated tokens look like
/// `<label>-<20 random alphanumeric characters>`.
#[derive(Clone, Educe, PartialEq, Eq, Serialize, Deserialize)]
#[educe(Debug)]
#[serde(transparent)]
pub struct AuthenticationToken(#[educe(Debug(ignore))] String);

impl AuthenticationToken {
    const RANDOM_SUFFIX_LENGTH: usize = 20;

    /// Generate a fresh token whose value starts with the given label.
    pub fn generate(label: &str) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(Self::RANDOM_SUFFIX_LENGTH)
            .map(char::from)
            .collect();
        Self(format!("{label}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AuthenticationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// The VDAF verification key shared by both aggregators of a task. Serialized as unpadded
/// URL-safe base64.
#[derive(Clone, Educe, PartialEq, Eq)]
#[educe(Debug)]
pub struct VerifyKey(#[educe(Debug(ignore))] Vec<u8>);

impl VerifyKey {
    /// Length in bytes of the verification keys used by every supported scheme.
    pub const LEN: usize = 16;

    pub fn generate() -> Self {
        Self(rand::random::<[u8; Self::LEN]>().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for VerifyKey {
    fn from(key: Vec<u8>) -> Self {
        Self(key)
    }
}

impl Serialize for VerifyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for VerifyKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map(Self)
            .map_err(de::Error::custom)
    }
}

/// The batch mode of a task. Encoded on the wire by its numeric code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QueryType {
    TimeInterval,
    FixedSize,
}

impl QueryType {
    pub const fn code(&self) -> u8 {
        match self {
            QueryType::TimeInterval => 1,
            QueryType::FixedSize => 2,
        }
    }
}

impl From<QueryType> for u8 {
    fn from(query_type: QueryType) -> Self {
        query_type.code()
    }
}

impl TryFrom<u8> for QueryType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(QueryType::TimeInterval),
            2 => Ok(QueryType::FixedSize),
            _ => Err(Error::UnknownQueryType(code)),
        }
    }
}

impl Display for QueryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::TimeInterval => f.write_str("time_interval"),
            QueryType::FixedSize => f.write_str("fixed_size"),
        }
    }
}

/// Selects which batch of a fixed size task to collect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixedSizeQuery {
    /// A previously collected batch, identified by its unpadded base64url batch ID.
    ByBatchId { batch_id: String },
    /// The next batch that is ready for collection.
    CurrentBatch,
}

impl FixedSizeQuery {
    const fn subtype(&self) -> u8 {
        match self {
            FixedSizeQuery::ByBatchId { .. } => 0,
            FixedSizeQuery::CurrentBatch => 1,
        }
    }
}

/// The query portion of a collection request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "QueryObject", try_from = "QueryObject")]
pub enum Query {
    TimeInterval {
        batch_interval_start: Time,
        batch_interval_duration: Duration,
    },
    FixedSize(FixedSizeQuery),
}

impl Query {
    pub fn query_type(&self) -> QueryType {
        match self {
            Query::TimeInterval { .. } => QueryType::TimeInterval,
            Query::FixedSize(_) => QueryType::FixedSize,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct QueryObject {
    #[serde(rename = "type")]
    query_type: QueryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_interval_start: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_interval_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtype: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
}

impl From<Query> for QueryObject {
    fn from(query: Query) -> Self {
        let query_type = query.query_type();
        match query {
            Query::TimeInterval {
                batch_interval_start,
                batch_interval_duration,
            } => QueryObject {
                query_type,
                batch_interval_start: Some(batch_interval_start),
                batch_interval_duration: Some(batch_interval_duration),
                subtype: None,
                batch_id: None,
            },
            Query::FixedSize(fixed_size_query) => {
                let subtype = Some(fixed_size_query.subtype());
                let batch_id = match fixed_size_query {
                    FixedSizeQuery::ByBatchId { batch_id } => Some(batch_id),
                    FixedSizeQuery::CurrentBatch => None,
                };
                QueryObject {
                    query_type,
                    batch_interval_start: None,
                    batch_interval_duration: None,
                    subtype,
                    batch_id,
                }
            }
        }
    }
}

impl TryFrom<QueryObject> for Query {
    type Error = Error;

    fn try_from(object: QueryObject) -> Result<Self, Self::Error> {
        match object.query_type {
            QueryType::TimeInterval => Ok(Query::TimeInterval {
                batch_interval_start: object
                    .batch_interval_start
                    .ok_or(Error::InvalidQuery("missing batch_interval_start"))?,
                batch_interval_duration: object
                    .batch_interval_duration
                    .ok_or(Error::InvalidQuery("missing batch_interval_duration"))?,
            }),
            QueryType::FixedSize => match object.subtype {
                Some(0) => Ok(Query::FixedSize(FixedSizeQuery::ByBatchId {
                    batch_id: object
                        .batch_id
                        .ok_or(Error::InvalidQuery("missing batch_id"))?,
                })),
                Some(1) => Ok(Query::FixedSize(FixedSizeQuery::CurrentBatch)),
                Some(subtype) => Err(Error::UnknownFixedSizeQuerySubtype(subtype)),
                None => Err(Error::InvalidQuery("missing subtype")),
            },
        }
    }
}
