#![allow(non_camel_case_types, non_snake_case)]

pub mod compositor;
pub mod types;

pub use compositor::*;
pub use types::*;
