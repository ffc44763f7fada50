pub mod announcement;
pub mod display;
pub mod feed;
pub mod timer;
pub mod ws;
