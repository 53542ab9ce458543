pub mod actions;
pub mod checksum;
pub mod fat;
pub mod guid;
pub mod image;
pub mod layout;
pub mod pt;

mod codec;
