pub mod catalog;
pub mod classrooms;
pub mod core;
pub mod schedule;
pub mod seating;
pub mod setup;
