pub mod advice;
pub mod analytics;
pub mod backup_exchange;
pub mod core;
pub mod rankings;
pub mod scores;
pub mod students;
