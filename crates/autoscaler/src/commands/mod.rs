pub mod aggregate;
pub mod recommend;
pub mod simulate;
