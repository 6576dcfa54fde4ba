pub mod errors;
pub mod ports;
pub mod price_grid;
pub mod ratio_model;
pub mod types;
