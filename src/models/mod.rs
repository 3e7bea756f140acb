// Domain models shared by the scale, telemetry and aggregator paths

mod event;
mod view;

pub use event::{ChannelEvent, WeightSample, WeightUpdate, WireEvent};
pub use view::{ActiveSource, CaptureMode, CaptureOutcome, CaptureView, Captured, WeightView};
