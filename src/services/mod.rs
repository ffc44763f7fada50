pub mod aggregate;
pub mod board;
pub mod bus;
pub mod display;
pub mod feed;
pub mod metrics;
pub mod store;
pub mod viewer;

#[cfg(test)]
pub mod testing;
