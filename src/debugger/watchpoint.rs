use std::fmt;
use std::str::FromStr;

use super::diff::MemoryRegion;
use super::error::SessionError;
use crate::runtime::{Memory, MEMORY_MAX};

/// When a watchpoint should fire.
///
/// Detection compares memory images between steps, so `Write` behaves like `Change`
/// and `Read` never fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchCondition {
    Read,
    Write,
    Change,
}

impl FromStr for WatchCondition {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "change" => Ok(Self::Change),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Change => "change",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watchpoint {
    /// Byte address.
    pub address: u16,
    /// 1, 2 or 4 bytes.
    pub width: u8,
    pub condition: Option<WatchCondition>,
    /// Value at the last comparison, little-endian.
    last_value: Option<u32>,
}

impl Watchpoint {
    pub fn new(address: u16, width: u8) -> Result<Self, SessionError> {
        if !matches!(width, 1 | 2 | 4) {
            return Err(SessionError::InvalidWatchWidth { width });
        }
        if address as usize + width as usize > MEMORY_MAX {
            return Err(SessionError::WatchOutOfBounds { address, width });
        }
        Ok(Self {
            address,
            width,
            condition: None,
            last_value: None,
        })
    }

    pub fn with_condition(mut self, condition: Option<WatchCondition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn last_value(&self) -> Option<u32> {
        self.last_value
    }

    fn can_fire(&self) -> bool {
        self.condition != Some(WatchCondition::Read)
    }
}

impl fmt::Display for Watchpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} ({} byte", self.address, self.width)?;
        if self.width > 1 {
            f.write_str("s")?;
        }
        if let Some(condition) = self.condition {
            write!(f, ", {}", condition)?;
        }
        f.write_str(")")
    }
}

/// A watchpoint whose value changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchHit {
    pub address: u16,
    pub width: u8,
    pub old: u32,
    pub new: u32,
}

impl fmt::Display for WatchHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04x} changed from 0x{:x} to 0x{:x}",
            self.address, self.old, self.new
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Watchpoints(Vec<Watchpoint>);

impl Watchpoints {
    /// Record the current value of every watchpoint, so the next check compares against it.
    pub fn prime(&mut self, memory: &Memory) {
        for watchpoint in &mut self.0 {
            watchpoint.last_value = memory.read(watchpoint.address, watchpoint.width);
        }
    }

    /// Compare watchpoints touched by `regions` against their last value.
    ///
    /// Every touched watchpoint is updated. All that changed are returned, in order.
    pub fn check(&mut self, memory: &Memory, regions: &[MemoryRegion]) -> Vec<WatchHit> {
        let mut hits = Vec::new();
        for watchpoint in &mut self.0 {
            let touched = regions
                .iter()
                .any(|region| region.overlaps(watchpoint.address, watchpoint.width as u32));
            if !touched {
                continue;
            }
            let new = memory.read(watchpoint.address, watchpoint.width);
            let old = std::mem::replace(&mut watchpoint.last_value, new);
            if let (Some(old), Some(new)) = (old, new) {
                if old != new && watchpoint.can_fire() {
                    hits.push(WatchHit {
                        address: watchpoint.address,
                        width: watchpoint.width,
                        old,
                        new,
                    });
                }
            }
        }
        hits
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> {
        self.0.iter()
    }

    pub fn remove(&mut self, address: u16) -> bool {
        let initial_len = self.0.len();
        self.0.retain(|watchpoint| watchpoint.address != address);
        initial_len != self.0.len()
    }

    pub fn push(&mut self, watchpoint: Watchpoint) {
        self.0.push(watchpoint);
    }
}

impl From<Vec<Watchpoint>> for Watchpoints {
    fn from(vec: Vec<Watchpoint>) -> Self {
        Self(vec)
    }
}
