pub mod bookmark;
pub mod common;
pub mod completions;
pub mod discard;
pub mod highlight;
pub mod list;
pub mod note;
pub mod retry;
pub mod status;
pub mod sync;
