//! Request/response plumbing for channel-driven services.

use crossbeam_channel::{bounded, Sender};

const ONESHOT_CHANNEL_SIZE: usize = 1;
pub const DEFAULT_CHANNEL_SIZE: usize = 32;
pub const SIGNAL_CHANNEL_SIZE: usize = 1;

pub struct Request<A, R> {
    pub responder: Sender<R>,
    pub arguments: A,
}

impl<A, R> Request<A, R> {
    /// Send `arguments` to a service loop and block on its response.
    /// `None` when the service has shut down.
    pub fn call(sender: &Sender<Request<A, R>>, arguments: A) -> Option<R> {
        let (responder, response) = bounded(ONESHOT_CHANNEL_SIZE);
        sender
            .send(Request {
                responder,
                arguments,
            })
            .ok()?;
        response.recv().ok()
    }
}
