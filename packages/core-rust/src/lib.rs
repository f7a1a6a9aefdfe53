//! `queuekv` Core: concurrent insertion-ordered map and the command schema.

pub mod command;
pub mod ordered_map;

pub use command::{Command, CommandError, CommandType, USAGE};
pub use ordered_map::OrderedMap;
