pub mod service;

pub use service::{
    CollectionResult, CollectionService, CollectionSettings, FailureKind, Outcome, Sweep,
    SweepScope,
};
