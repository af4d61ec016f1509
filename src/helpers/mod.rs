pub mod deconv;
pub mod hinge;
pub mod linalg;
pub mod synthetic_data;
