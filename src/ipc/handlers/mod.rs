pub mod core;
pub mod grades;
pub mod modules;
pub mod registrations;
pub mod students;
