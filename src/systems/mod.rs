pub mod service;
pub mod summary;

pub use service::SystemService;
pub use summary::{HistoryTarget, SummaryBuilder, SystemSummary};
