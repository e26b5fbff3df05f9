mod engine;
mod settings;

pub use engine::{TimerEngine, TimerPhase, TimerSnapshot};
pub use settings::{TimerMode, TimerSettings};
