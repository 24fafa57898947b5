pub mod outlier;
pub mod pipeline;
pub mod sqlite_pragma;
