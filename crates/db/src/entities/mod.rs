//! `SeaORM` entity definitions.

pub mod credentials;
pub mod files;
pub mod fragments;
pub mod thumbnails;
