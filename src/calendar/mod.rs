pub mod ics;
pub mod writer;

pub use ics::{render_calendar, CalendarOptions};
pub use writer::export_batch;
