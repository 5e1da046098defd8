#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod red_black_map;

pub use red_black_map::RedBlackMap;
