#[macro_use]
extern crate tracing;

pub mod sources;

#[cfg(test)]
mod testing;
