//! Signal and data processing modules

pub mod kalman;
pub mod parser;
pub mod cache;

pub use kalman::{FilterError, FilterParameters, MotionFilter};
pub use parser::{InboundMessage, MessageParser, ParseError, RackScan, RangingMeasurement};
pub use cache::{RangingCache, RangingSample};
