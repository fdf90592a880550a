pub mod draft;
pub mod intent;
pub mod session;
pub mod timestamp;
