//! Argument normalization for `Server::listen`.
//!
//! `listen` accepts several call shapes: nothing, options, a completion
//! callback, options plus callback, or a positional `port [, host] [, callback]`
//! form. All of them reduce to one canonical `(ListenOptions, ListenCallback)`
//! pair. A missing callback becomes a no-op.

use crate::error::AdapterError;

/// Completion callback for `listen`, invoked once with the bind outcome.
pub type ListenCallback = Box<dyn FnOnce(Result<(), AdapterError>) + Send + 'static>;

/// Bind options. Port and host are carried for transports that expose them;
/// service-name transports ignore both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenOptions {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub backlog: Option<u32>,
}

/// One positional argument of the dynamic call shape.
pub enum ListenArg {
    Options(ListenOptions),
    Port(u16),
    Host(String),
    Callback(ListenCallback),
}

impl std::fmt::Debug for ListenArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenArg::Options(o) => f.debug_tuple("Options").field(o).finish(),
            ListenArg::Port(p) => f.debug_tuple("Port").field(p).finish(),
            ListenArg::Host(h) => f.debug_tuple("Host").field(h).finish(),
            ListenArg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Arguments to `Server::listen` before normalization.
#[derive(Default)]
pub struct ListenArgs {
    options: ListenOptions,
    callback: Option<ListenCallback>,
}

impl std::fmt::Debug for ListenArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenArgs")
            .field("options", &self.options)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ListenArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback-only shape.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Result<(), AdapterError>) + Send + 'static,
    {
        Self::new().on_listening(f)
    }

    /// Options plus callback shape.
    pub fn with<F>(options: ListenOptions, f: F) -> Self
    where
        F: FnOnce(Result<(), AdapterError>) + Send + 'static,
    {
        Self::from(options).on_listening(f)
    }

    pub fn options(mut self, options: ListenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_listening<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Result<(), AdapterError>) + Send + 'static,
    {
        self.callback = Some(Box::new(f));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Build from a positional argument list.
    ///
    /// Accepted shapes: `[]`, `[Options]`, `[Port]`, `[Port, Host]`, each
    /// optionally followed by a trailing `Callback`, or `[Callback]` alone.
    /// Anything else fails immediately with `InvalidArgument`.
    pub fn from_parts(args: Vec<ListenArg>) -> Result<Self, AdapterError> {
        let mut args = args.into_iter().peekable();
        let mut normalized = ListenArgs::new();

        match args.next() {
            None => return Ok(normalized),
            Some(ListenArg::Options(options)) => normalized.options = options,
            Some(ListenArg::Port(port)) => {
                normalized.options.port = Some(port);
                if matches!(args.peek(), Some(ListenArg::Host(_))) {
                    if let Some(ListenArg::Host(host)) = args.next() {
                        normalized.options.host = Some(host);
                    }
                }
            }
            Some(ListenArg::Callback(cb)) => normalized.callback = Some(cb),
            Some(ListenArg::Host(host)) => {
                return Err(AdapterError::InvalidArgument(format!(
                    "host {host:?} given without a port"
                )))
            }
        }

        match args.next() {
            None => {}
            Some(ListenArg::Callback(cb)) if normalized.callback.is_none() => {
                normalized.callback = Some(cb)
            }
            Some(other) => {
                return Err(AdapterError::InvalidArgument(format!(
                    "unexpected listen argument {other:?}"
                )))
            }
        }

        if let Some(extra) = args.next() {
            return Err(AdapterError::InvalidArgument(format!(
                "callback must be the last listen argument, found {extra:?} after it"
            )));
        }
        Ok(normalized)
    }

    /// Reduce to the canonical pair, substituting a no-op callback.
    pub fn normalize(self) -> (ListenOptions, ListenCallback) {
        let callback = self.callback.unwrap_or_else(|| Box::new(|_| {}));
        (self.options, callback)
    }
}

impl From<()> for ListenArgs {
    fn from(_: ()) -> Self {
        ListenArgs::new()
    }
}

impl From<ListenOptions> for ListenArgs {
    fn from(options: ListenOptions) -> Self {
        ListenArgs::new().options(options)
    }
}

impl From<u16> for ListenArgs {
    fn from(port: u16) -> Self {
        ListenArgs::new().options(ListenOptions {
            port: Some(port),
            ..ListenOptions::default()
        })
    }
}
