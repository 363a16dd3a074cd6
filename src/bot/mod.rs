/// Command, upload, and callback handlers
pub mod handlers;
