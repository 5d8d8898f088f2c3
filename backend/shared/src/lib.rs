pub mod models;

pub use models::{TIMESTAMP_FORMAT, TxRecord};
