mod portpicker;
mod socket;
pub mod temp;
pub mod wait;

pub use portpicker::pick_unused_port;
pub use socket::{next_addr, next_addr_for_ip};
