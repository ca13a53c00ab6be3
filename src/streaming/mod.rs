//! Audio streaming

mod engine;
mod notify;
mod source;

#[cfg(test)]
mod tests;

pub use engine::StreamEngine;
pub use notify::{EventSignal, NotificationEntry, NotificationSchedule, WakeSignal};
pub use source::{CallbackProducer, Producer, SilenceProducer, SliceProducer};
