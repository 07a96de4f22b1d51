//! Timeline playback
//!
//! [`TimelineExecutor`] plays a rendered timeline in real time. Time comes
//! from a [`Clock`], ticks from a [`Ticker`], device calls run on the
//! [`Dispatcher`] workers and progress is reported to a [`PlaybackObserver`].

mod clock;
mod dispatch;
mod executor;
mod observer;
mod ticker;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchStats, Dispatcher};
pub use executor::{ExecutionState, PlaybackState, QueueStats, TimelineExecutor};
pub use observer::{LogObserver, PlaybackEvent, PlaybackObserver, RecordingObserver};
pub use ticker::{ManualTicker, ThreadTicker, TickFn, Ticker};
pub use window::{LookaheadWindow, QueuedCommand};
