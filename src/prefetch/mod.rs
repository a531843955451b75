mod behavior;
mod config;
mod scheduler;

pub use behavior::{BehaviorAction, BehaviorModel, Prediction};
pub use config::PrefetchConfig;
pub use scheduler::{PrefetchRequest, PrefetchScheduler, PrefetchStats};
