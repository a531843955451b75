pub mod error;
pub mod types;

pub use error::{DeckError, Result, RetryPolicy, retry_with_backoff, with_fallback};
pub use types::{
    MutationKind, Package, PackageCategory, PackageDetails, PackageSet, PrefetchPriority,
};
