//! Database layer
//!
//! MongoDB implementations of the store and reputation collaborators.

pub mod indexes;
pub mod mongo;

pub use mongo::{MongoClient, MongoReputation, MongoStore};
