//! In-process publish/subscribe bus.
//!
//! Every event kind is a marker type implementing [`Topic`], which fixes the
//! payload type handlers receive. Handlers run synchronously on the
//! publisher's task, in subscription order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::WatchError;
use crate::feed::Entry;

use self::sealed::Slot;

mod sealed {
    use std::sync::{Arc, PoisonError, RwLock};

    use crate::error::WatchError;

    pub trait Sealed {}

    pub type Handler<P> = Arc<dyn Fn(&P) -> Result<(), WatchError> + Send + Sync>;

    /// Handler storage for one topic.
    pub struct Slot<P: ?Sized + 'static> {
        handlers: RwLock<Vec<Handler<P>>>,
    }

    impl<P: ?Sized + 'static> Default for Slot<P> {
        fn default() -> Self {
            Self {
                handlers: RwLock::new(Vec::new()),
            }
        }
    }

    impl<P: ?Sized + 'static> Slot<P> {
        pub(in crate::events) fn push(&self, handler: Handler<P>) {
            self.handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handler);
        }

        // Handlers are cloned out so they may publish or subscribe re-entrantly.
        pub(in crate::events) fn snapshot(&self) -> Vec<Handler<P>> {
            self.handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub(in crate::events) fn len(&self) -> usize {
            self.handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }
    }
}

pub trait Topic: sealed::Sealed + 'static {
    type Payload: ?Sized + 'static;
    const NAME: &'static str;
    /// Whether handler failures on this topic are republished as errors.
    const FORWARD_FAILURES: bool = true;

    #[doc(hidden)]
    fn slot(bus: &EventBus) -> &Slot<Self::Payload>;
}

macro_rules! topic {
    ($(#[$meta:meta])* $name:ident, $payload:ty, $field:ident, $label:literal $(, forward = $forward:literal)?) => {
        $(#[$meta])*
        pub enum $name {}

        impl sealed::Sealed for $name {}

        impl Topic for $name {
            type Payload = $payload;
            const NAME: &'static str = $label;
            $(const FORWARD_FAILURES: bool = $forward;)?

            fn slot(bus: &EventBus) -> &Slot<Self::Payload> {
                &bus.$field
            }
        }
    };
}

topic!(
    /// A scan cycle began walking the feed list.
    ScanStarted, (), scan_started, "scan-started"
);
topic!(
    /// A feed has no freshness marker; payload is its URL.
    FeedStale, str, feed_stale, "feed-stale"
);
topic!(
    /// A feed was fetched and all its items processed.
    FeedParsed, str, feed_parsed, "feed-parsed"
);
topic!(EntryDiscovered, Entry, entry_discovered, "entry-discovered");
topic!(ErrorReported, WatchError, error_reported, "error", forward = false);

#[derive(Default)]
pub struct EventBus {
    scan_started: Slot<()>,
    feed_stale: Slot<str>,
    feed_parsed: Slot<str>,
    entry_discovered: Slot<Entry>,
    error_reported: Slot<WatchError>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<T: Topic>(
        &self,
        handler: impl Fn(&T::Payload) -> Result<(), WatchError> + Send + Sync + 'static,
    ) {
        T::slot(self).push(Arc::new(handler));
    }

    pub fn subscriber_count<T: Topic>(&self) -> usize {
        T::slot(self).len()
    }

    /// Calls every handler of `T` with `payload` before returning.
    ///
    /// A handler that returns an error or panics does not stop the others;
    /// its failure is republished on [`ErrorReported`].
    pub fn publish<T: Topic>(&self, payload: &T::Payload) {
        for handler in T::slot(self).snapshot() {
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => WatchError::Handler {
                    topic: T::NAME,
                    message: panic_message(&*panic),
                },
            };
            if T::FORWARD_FAILURES {
                self.publish::<ErrorReported>(&failure);
            } else {
                error!(topic = T::NAME, error = %failure, "event handler failed");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}
