pub mod db;
pub mod error;
pub mod ledger;
pub mod level;
pub mod message;
pub mod notify;
pub mod outcome;
pub mod rating;
pub mod scorer;

pub use error::{Error, Result};
