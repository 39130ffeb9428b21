pub mod buffer;
pub mod handler;
pub mod visitor_id;
