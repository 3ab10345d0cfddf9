pub mod fields;
pub mod inverter;
pub mod models;
pub mod statistics;
