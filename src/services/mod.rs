pub mod api;
pub mod setup;
pub mod sse;
pub mod stream;
pub mod wizard;
