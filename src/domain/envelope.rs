use super::data::Data;
use super::serde_helpers::{finite, timestamp};
use super::tags::{TagKey, Tags};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An envelope as built by a producer. It carries no destination key and no
/// sequence number; those are assigned once, at publish time, by `stamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEnvelope {
    pub name: String,
    #[serde(with = "timestamp")]
    pub time: DateTime<Utc>,
    #[serde(default = "default_envelope_version")]
    pub ver: u32,
    #[serde(default = "default_sample_rate", with = "finite")]
    pub sample_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    pub data: Data,
}

fn default_envelope_version() -> u32 {
    1
}

fn default_sample_rate() -> f64 {
    100.0
}

impl DraftEnvelope {
    pub fn new(data: impl Into<Data>) -> Self {
        let data = data.into();
        Self {
            name: data.envelope_name().to_string(),
            time: Utc::now(),
            ver: default_envelope_version(),
            sample_rate: default_sample_rate(),
            flags: None,
            tags: Tags::new(),
            data,
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_tag(mut self, key: TagKey, value: impl Into<String>) -> Self {
        self.tags.insert(key, value.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Finalizes the envelope for the wire.
    pub fn stamp(self, ikey: impl Into<String>, seq: impl Into<String>) -> StampedEnvelope {
        StampedEnvelope {
            envelope: self,
            ikey: ikey.into(),
            seq: seq.into(),
        }
    }
}

/// An envelope with its destination key and sequence assigned. Only stamped
/// envelopes are serialized for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedEnvelope {
    #[serde(flatten)]
    envelope: DraftEnvelope,
    #[serde(rename = "iKey")]
    ikey: String,
    seq: String,
}

impl StampedEnvelope {
    pub fn envelope(&self) -> &DraftEnvelope {
        &self.envelope
    }

    pub fn ikey(&self) -> &str {
        &self.ikey
    }

    pub fn seq(&self) -> &str {
        &self.seq
    }

    pub fn data(&self) -> &Data {
        &self.envelope.data
    }

    pub fn into_draft(self) -> DraftEnvelope {
        self.envelope
    }
}
