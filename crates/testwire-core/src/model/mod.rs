//! Domain values carried inside commands and responses.

mod handshake;
mod log;
mod name;
mod path;
mod result;
mod settings;
mod statistics;

pub use handshake::Handshake;
pub use log::{LogEntry, LogKind};
pub use name::{TestName, TestParameter};
pub use path::{PathKind, PathNode, TestPath};
pub use result::{TestResult, TestStatus};
pub use settings::SettingsBag;
pub use statistics::{StatisticsEvent, StatisticsKind};
