//! Mock documents: typed definitions, the on-disk store, and resolution.

mod resolver;
mod store;
mod types;

pub use resolver::resolve;
pub use store::{FileMockStore, MockStore, StoredMock, DEFAULT_DOMAIN};
pub use types::{MatchingConfig, MockDataError, MockDefinition, TimelineEntry};
