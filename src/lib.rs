pub mod clock;
pub mod depth;
pub mod exchange;
pub mod feed;
pub mod oms;
pub mod signal;
pub mod swing;
