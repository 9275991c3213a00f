pub mod evaluate;
pub mod train;
