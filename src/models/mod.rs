pub mod booking;
pub mod movie;
pub mod seat;
pub mod showtime;
pub mod user;

pub use booking::{Booking, BookingStatus, BookingView, InvalidTransition, Ticket, TicketLine};
pub use movie::{Movie, Screen, Theater};
pub use seat::{Seat, SeatAvailability, SeatStatus, SeatType};
pub use showtime::{Showtime, ShowtimeConflict, ShowtimeDetails};
pub use user::User;
