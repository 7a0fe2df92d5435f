pub mod enums;
pub mod message;
pub mod profile;
pub mod quiz;

pub use enums::*;
pub use message::*;
pub use profile::*;
pub use quiz::*;
