pub mod health;
pub mod layaway;
