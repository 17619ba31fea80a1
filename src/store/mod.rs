mod coordinator;
mod schema;

pub use coordinator::TransactionCoordinator;
#[cfg(test)]
pub use schema::LEGACY_SCHEMA;
pub use schema::SCHEMA;
