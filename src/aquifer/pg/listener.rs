//! LISTEN/NOTIFY multiplexing.
//!
//! A `Listener` owns a dedicated session and a channel -> handlers map.
//! `LISTEN <channel>` is issued the first time a channel gains a handler;
//! each delivered notification is dispatched to every handler in its own
//! spawned task with a private clone of (channel, payload, pid).

use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHashMap;
use tracing::{debug, warn};

use crate::aquifer::common::{Error, Result};
use crate::aquifer::pg::conninfo::Conninfo;
use crate::aquifer::pg::session::{Notification, Session};

pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

pub struct Listener {
    session: Session,
    handlers: FnvHashMap<String, Vec<NotificationHandler>>,
}

/// Quotes a channel identifier for LISTEN, preserving case sensitivity.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Listener {
    /// Connects a dedicated session for notification delivery.
    pub async fn connect(
        ci: &Conninfo,
        timeout: Option<Duration>,
        recv_buffer_size: usize,
    ) -> Result<Listener> {
        let mut session = Session::new(recv_buffer_size);
        session.connect(ci, timeout).await?;
        Ok(Listener {
            session,
            handlers: FnvHashMap::default(),
        })
    }

    /// Wraps an already-connected session.
    pub fn new(session: Session) -> Listener {
        Listener {
            session,
            handlers: FnvHashMap::default(),
        }
    }

    /// Registers a handler for a channel, issuing LISTEN the first time the
    /// channel is seen.
    pub async fn add_handler(
        &mut self,
        channel: &str,
        handler: impl Fn(Notification) + Send + Sync + 'static,
    ) -> Result<()> {
        if !self.handlers.contains_key(channel) {
            let qr = self
                .session
                .exec_simple_query(&format!("LISTEN {}", quote_ident(channel)))
                .await;
            if !qr.ok {
                return Err(Error::new(format!(
                    "LISTEN {} failed: {}",
                    channel, qr.error
                )));
            }
            debug!(channel, "listening");
        }
        self.handlers
            .entry(channel.to_string())
            .or_insert_with(Vec::new)
            .push(Arc::new(handler));
        Ok(())
    }

    /// Waits for the socket to become readable, pumps input, and dispatches
    /// every drained notification. Returns the number dispatched.
    pub async fn poll(&mut self) -> Result<usize> {
        // consume anything already buffered before suspending
        let mut dispatched = self.drain_and_dispatch()?;
        if dispatched > 0 {
            return Ok(dispatched);
        }
        self.session.wait_readable_for_listener().await?;
        self.session.pump_input()?;
        dispatched = self.drain_and_dispatch()?;
        Ok(dispatched)
    }

    /// Runs the wake loop until the connection fails.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.poll().await?;
        }
    }

    fn drain_and_dispatch(&mut self) -> Result<usize> {
        self.session.discard_pending()?;
        let mut dispatched = 0;
        while let Some(notification) = self.session.notifications.pop_front() {
            match self.handlers.get(&notification.channel) {
                Some(handlers) => {
                    for handler in handlers {
                        // each handler runs in its own task with its own copy
                        let handler = Arc::clone(handler);
                        let private = notification.clone();
                        tokio::spawn(async move {
                            handler(private);
                        });
                        dispatched += 1;
                    }
                }
                None => {
                    warn!(
                        channel = notification.channel.as_str(),
                        "notification for channel with no handlers"
                    );
                }
            }
        }
        Ok(dispatched)
    }
}
