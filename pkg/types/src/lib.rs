pub mod claim;
pub mod condition;
pub mod config;
pub mod meta;
pub mod namespace;
pub mod pool;
pub mod quantity;
pub mod quota;
pub mod selector;
pub mod validate;

pub use meta::{Object, ObjectMeta, OwnerReference};
pub use quantity::{Quantity, ResourceList};
