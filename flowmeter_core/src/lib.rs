#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Mass-flow acquisition pipeline (device-agnostic).
//!
//! Reads mass readings from a line-oriented channel and derives flow from
//! them. All I/O goes through `flowmeter_traits::LineChannel`; time comes from
//! an injected `flowmeter_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Handshake**: `SJ\r\n` probe, `MJ` reply, line classification (`handshake`)
//! - **Processing**: time bookkeeping, instantaneous flow, median-of-5 and
//!   trailing average of 10 (`processor`)
//! - **History**: append-only sample log with summary queries (`history`)
//! - **Session**: connect/start/stop/clear lifecycle over a reader thread
//!   (`session`, `reader`, `builder`)
//! - **Events**: sample, connected and error events fanned out over
//!   crossbeam channels (`events`)
//! - **Export**: six-column CSV projection (`export`)

pub mod atomic;
pub mod builder;
pub mod channel_error;
pub mod config;
pub mod conversions;
pub mod error;
pub mod events;
pub mod export;
pub mod handshake;
pub mod history;
pub mod mocks;
pub mod processor;
pub mod reader;
pub mod sample;
pub mod session;
pub mod util;

pub use builder::SessionBuilder;
pub use config::{ChannelTimeouts, DEFAULT_BAUD_RATE, HandshakeCfg, SessionConfig};
pub use error::{ErrorKind, FlowError};
pub use events::SessionEvent;
pub use export::{read_csv, write_csv, write_csv_file};
pub use handshake::{ConnectionState, HandshakeProtocol, LineKind, classify_line};
pub use history::{SampleHistory, SharedHistory, Summary};
pub use processor::SampleProcessor;
pub use reader::ChannelBox;
pub use sample::Sample;
pub use session::{Connector, SessionController, SessionState};
