pub mod core;
pub mod records;
pub mod reports;
pub mod subjects;
