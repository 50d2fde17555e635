pub mod dispatch;
pub mod message;
pub mod parcel;
pub mod process;
pub mod server;
pub mod transport;

pub use dispatch::{ConnectionId, Dispatcher, NotificationSender, RequestHandler};
pub use message::{Notification, Request, RequestCode, Response};
pub use parcel::{ParcelReader, ParcelWriter};
pub use process::ProcessClient;
pub use server::{AudioServer, ServerParts};
pub use transport::{read_frame, serve_connection, write_frame, Client, MAX_FRAME_BYTES};

/// Interface token every request must carry.
pub const INTERFACE_DESCRIPTOR: &str = "audiod.IAudioProcess";
