//! Point-in-time health data for one feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::StreamTarget;
use crate::config::defaults::SNAPSHOT_FRESHNESS;

/// Semantic class of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidClass {
    Video,
    Audio,
    Data,
    Other,
}

impl PidClass {
    pub const ALL: [PidClass; 4] = [Self::Video, Self::Audio, Self::Data, Self::Other];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Data => "data",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PidClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleKind {
    DvbSubtitle,
}

/// One elementary stream announced in a PMT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u16,
    /// PID as printed by the analyzer, e.g. `0x0066`
    pub pid_hex: String,
    pub class: PidClass,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub subtitle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_kind: Option<SubtitleKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "HD")]
    Hd,
    #[default]
    #[serde(rename = "SD")]
    Sd,
}

impl ServiceKind {
    /// HD when the service type description mentions HD in any case
    pub fn classify(description: &str) -> Self {
        if description.to_uppercase().contains("HD") {
            Self::Hd
        } else {
            Self::Sd
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hd => "HD",
            Self::Sd => "SD",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service identity from the SDT
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub provider: String,
    /// Transport stream id as printed, e.g. `0x000C`
    pub tsid: String,
    pub kind: ServiceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bitrate {
    pub total_bps: u64,
    pub net_bps: u64,
}

/// Structured result of one parse cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub address: String,
    pub description: String,
    pub captured_at: DateTime<Utc>,
    pub bitrate: Bitrate,
    pub pids: BTreeMap<u16, PidRecord>,
    pub service: ServiceIdentity,
    /// Continuity errors per PID seen in the newest report cycle
    pub cc_errors: BTreeMap<u16, u64>,
    pub online: bool,
}

impl StreamSnapshot {
    /// Build a snapshot captured now, deriving its status immediately
    pub fn new(
        target: &StreamTarget,
        bitrate: Bitrate,
        pids: BTreeMap<u16, PidRecord>,
        service: ServiceIdentity,
        cc_errors: BTreeMap<u16, u64>,
    ) -> Self {
        let mut snapshot = Self {
            address: target.address.clone(),
            description: target.description.clone(),
            captured_at: Utc::now(),
            bitrate,
            pids,
            service,
            cc_errors,
            online: false,
        };
        snapshot.online = snapshot.is_online_at(snapshot.captured_at);
        snapshot
    }

    /// Explicit offline marker for a silent feed
    pub fn offline(target: &StreamTarget, last_seen: DateTime<Utc>) -> Self {
        Self {
            address: target.address.clone(),
            description: target.description.clone(),
            captured_at: last_seen,
            bitrate: Bitrate::default(),
            pids: BTreeMap::new(),
            service: ServiceIdentity::default(),
            cc_errors: BTreeMap::new(),
            online: false,
        }
    }

    /// Re-evaluate health against a given instant
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        let fresh = match (now - self.captured_at).to_std() {
            Ok(age) => age <= SNAPSHOT_FRESHNESS,
            // capture time in the future of `now`
            Err(_) => true,
        };
        self.bitrate.total_bps > 0 && !self.pids.is_empty() && fresh
    }

    pub fn pid_count(&self, class: PidClass) -> usize {
        self.pids.values().filter(|p| p.class == class).count()
    }
}
