//! # Entity 模块
//!
//! 包含所有 Sea-ORM 实体定义

pub mod api_keys;
pub mod users;

pub use api_keys::Entity as ApiKeys;
pub use users::Entity as Users;

#[cfg(test)]
mod tests;
