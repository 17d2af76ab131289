//! Globally unique, time-sortable task identifiers

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use ulid::{Generator, Ulid};

lazy_static! {
    static ref GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());
}

/// Identifier minted once per upload task
///
/// Ids minted by one process sort in creation order, even within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn new() -> Self {
        let next = GENERATOR
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok());
        TaskId(next.unwrap_or_else(Ulid::new))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(TaskId)
    }
}
