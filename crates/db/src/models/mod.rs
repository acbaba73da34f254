pub mod catalog;
pub mod entity;
