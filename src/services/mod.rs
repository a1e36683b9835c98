pub mod reservation;
pub mod seat_locks;
pub mod seeder;
