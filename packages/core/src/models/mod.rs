//! Data Models
//!
//! This module contains the data structures shared by every layer of DbGate:
//!
//! - `Command` - the request envelope consumed by the dispatcher
//! - `CanonicalValue`, `Row`, `ResultSet` - the engine-independent value model
//! - `time` - clock abstraction used to date backup files

mod command;
pub mod time;
mod value;

pub use command::{validate_identifier, Command, Engine, Operation, MAX_IDENTIFIER_LEN};
pub use value::{CanonicalValue, ResultSet, Row, TIMESTAMP_FORMAT};
