pub mod download;
pub mod error;
pub mod extension;
pub mod magnet_link;
pub mod message;
pub mod metainfo;
pub mod peer;
pub mod tracker;
