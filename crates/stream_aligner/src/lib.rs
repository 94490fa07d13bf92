//! # Stream Aligner
//!
//! Hardware HDR captures up to three exposures per frame on parallel
//! channels. The aligner matches their raw buffers by sequence number,
//! applies the skip-frame window, decides how many readback passes the frame
//! gets and triggers the readback.
//!
//! ```ignore
//! let mut aligner = StreamAligner::new(AlignerConfig::default(), WorkingMode::Hdr2, device);
//! let outcome = aligner.push(buffer);
//! for report in &outcome.reports {
//!     // report.sequence was read back `report.passes` times
//! }
//! ```

mod aligner;
mod buffer;
mod mock;

pub use aligner::{AlignerStats, PushOutcome, StreamAligner};
pub use buffer::ChannelBuffer;
pub use contracts::{AlignerConfig, RawBuffer, ReadbackReport, SyncGroup};
pub use mock::MockReadbackDevice;
