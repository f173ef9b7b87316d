//! Client event hooks.
//!
//! Two events are raised: `on_new_table` when a table is reflected for the
//! first time, and `on_query_error` when a statement fails. Handler errors
//! either propagate as `SqlmateError::EventHandler` or are logged and
//! dropped, depending on the client's `ignore_event_errors` option.

use crate::core::{Result, SqlmateError};
use crate::response::Response;
use crate::schema_cache::TableHandle;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

pub type NewTableHandler = Arc<dyn Fn(&TableHandle) -> HandlerResult + Send + Sync>;
pub type QueryErrorHandler = Arc<dyn Fn(&QueryErrorEvent<'_>) -> HandlerResult + Send + Sync>;

/// Payload of `on_query_error`.
pub struct QueryErrorEvent<'a> {
    pub error: &'a SqlmateError,
    /// The error's cause chain followed by a backtrace of the failure site
    pub trace: String,
    /// The failed statement's response
    pub response: &'a Response,
}

impl<'a> QueryErrorEvent<'a> {
    pub fn new(error: &'a SqlmateError, response: &'a Response) -> Self {
        QueryErrorEvent {
            error,
            trace: format!("{}\n{}", error.chain(), Backtrace::capture()),
            response,
        }
    }
}

/// Registered handlers.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_new_table: Option<NewTableHandler>,
    on_query_error: Option<QueryErrorHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        EventHandlers::default()
    }

    pub fn on_new_table<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TableHandle) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_new_table = Some(Arc::new(handler));
        self
    }

    pub fn on_query_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&QueryErrorEvent<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_query_error = Some(Arc::new(handler));
        self
    }

    pub(crate) fn new_table(&self, handle: &TableHandle, ignore_errors: bool) -> Result<()> {
        match &self.on_new_table {
            Some(handler) => settle("on_new_table", handler(handle), ignore_errors),
            None => Ok(()),
        }
    }

    pub(crate) fn query_error(&self, event: &QueryErrorEvent<'_>, ignore_errors: bool) -> Result<()> {
        match &self.on_query_error {
            Some(handler) => settle("on_query_error", handler(event), ignore_errors),
            None => Ok(()),
        }
    }
}

fn settle(event: &'static str, result: HandlerResult, ignore_errors: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if ignore_errors => {
            warn!(event, error = %e, "ignoring event handler error");
            Ok(())
        }
        Err(e) => Err(SqlmateError::EventHandler {
            event,
            message: e.to_string(),
        }),
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_new_table", &self.on_new_table.is_some())
            .field("on_query_error", &self.on_query_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::schema::Table;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> TableHandle {
        TableHandle::new(
            "main",
            Table {
                name: "t".to_string(),
                columns: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
            },
        )
    }

    #[test]
    fn test_handlers_are_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handlers = EventHandlers::new().on_new_table(move |h| {
            assert_eq!(h.name(), "t");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        handlers.new_table(&handle(), false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        EventHandlers::new().new_table(&handle(), false).unwrap();
    }

    #[test]
    fn test_handler_errors_propagate_or_are_ignored() {
        let handlers = EventHandlers::new().on_query_error(|_| Err("handler broke".into()));
        let error = SqlmateError::Query("bad".into());
        let response = Response::new(None, None, false);
        let event = QueryErrorEvent::new(&error, &response);
        assert!(event.trace.starts_with("Query error: bad"));

        assert!(handlers.query_error(&event, true).is_ok());
        match handlers.query_error(&event, false) {
            Err(SqlmateError::EventHandler { event, message }) => {
                assert_eq!(event, "on_query_error");
                assert_eq!(message, "handler broke");
            }
            other => panic!("Expected EventHandler error, got {:?}", other),
        }
    }
}
