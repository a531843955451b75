// ============================================================================
// pkgdeck - resource orchestration core for a package-manager front-end
// ============================================================================

pub mod cache;
pub mod core;
pub mod deck;
pub mod network;
pub mod prefetch;
pub mod queue;
pub mod source;

// Re-export main types for convenience
pub use deck::{DeckBuilder, PackageDeck};
pub use core::{
    DeckError, MutationKind, Package, PackageCategory, PackageDetails, PackageSet,
    PrefetchPriority, Result,
};

// Component APIs for callers wiring their own layouts
pub use cache::{CacheConfig, CacheSnapshot, CacheStore};
pub use network::{
    MonitorConfig, NetworkConditions, NetworkQualityMonitor, NetworkQualitySource, NetworkStatus,
    QualityTier,
};
pub use prefetch::{BehaviorAction, PrefetchConfig, PrefetchRequest, PrefetchStats};
pub use queue::{
    BatchItemResult, BatchOptions, OperationId, OperationQueue, OperationRecord, OperationStatus,
    QueueConfig, QueueHealth, QueueStats,
};
pub use source::{Clock, ManualClock, PackageSource, SystemClock};
