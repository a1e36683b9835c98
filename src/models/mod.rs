pub mod movie;
pub mod show;
pub mod seat;
pub mod booking;

pub use movie::{Movie, NewMovie};
pub use show::{NewShow, SeatGrid, Show};
pub use seat::{Seat, SeatStatus};
pub use booking::{Booking, BookingRequest, BookingStatus, NewBooking, Requester, ReserveCommand};
