pub mod event;
pub mod nip04;
pub mod uri;

pub use event::{Event, EventError};
pub use uri::{NwcUri, UriError};
