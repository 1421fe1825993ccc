pub mod error;
pub mod events;
pub mod ladder;
pub mod playlist;
pub mod traits;

#[cfg(test)]
pub mod testing;
