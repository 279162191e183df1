#![allow(dead_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two logical work-site states the bridge publishes to RDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalState {
    Empty,
    Filled,
}

impl LogicalState {
    pub fn as_bit(self) -> bool {
        matches!(self, LogicalState::Filled)
    }

    pub fn from_bit(bit: bool) -> Self {
        if bit {
            LogicalState::Filled
        } else {
            LogicalState::Empty
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            LogicalState::Empty => LogicalState::Filled,
            LogicalState::Filled => LogicalState::Empty,
        }
    }
}

impl fmt::Display for LogicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalState::Empty => write!(f, "EMPTY"),
            LogicalState::Filled => write!(f, "FILLED"),
        }
    }
}

/// A single configured work-site: one Modbus discrete input bound to one
/// RDS work-site identifier. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub offset: u16,
    pub default: LogicalState,
}

/// Identifies the PLC endpoint a group of sites share.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.unit_id)
    }
}

/// Sites sharing one (host, port, unit) triple, serviced by one Modbus
/// client. `sites` preserves configuration order; it is never re-sorted.
#[derive(Debug, Clone)]
pub struct Group {
    pub key: GroupKey,
    pub sites: Vec<Site>,
    pub min_offset: u16,
    pub max_offset: u16,
}

impl Group {
    /// Read length for a single `readDiscreteInputs` call covering every
    /// site in the group. Forced to 1 when the group has exactly one site,
    /// regardless of how large its offset is.
    pub fn length(&self) -> u16 {
        if self.sites.len() == 1 {
            1
        } else {
            self.max_offset - self.min_offset + 1
        }
    }

    /// Index of `site`'s bit within a response vector returned for this
    /// group's read. `None` only if `site` does not belong to this group.
    pub fn index_of(&self, site: &Site) -> Option<usize> {
        if site.offset < self.min_offset {
            return None;
        }
        Some((site.offset - self.min_offset) as usize)
    }
}
