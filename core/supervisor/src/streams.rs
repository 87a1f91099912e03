//! Stream client construction.
//!
//! Records may point at different stream servers, so clients are created per
//! url through a [`StreamConnector`] and cached for the lifetime of a
//! [`StreamClientCache`].

use std::collections::HashMap;
use std::sync::Arc;

use conductor_protocol::{FileStream, SessionStream, StreamError};
use tracing::debug;

/// Opens a client for one stream url.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn SessionStream>, StreamError>;
}

/// Connects to the local file-backed stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStreamConnector;

impl StreamConnector for FileStreamConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn SessionStream>, StreamError> {
        Ok(Arc::new(FileStream::open(url)?))
    }
}

/// Lazily builds one client per distinct url.
pub struct StreamClientCache<'a> {
    connector: &'a dyn StreamConnector,
    clients: HashMap<String, Arc<dyn SessionStream>>,
}

impl<'a> StreamClientCache<'a> {
    pub fn new(connector: &'a dyn StreamConnector) -> Self {
        Self {
            connector,
            clients: HashMap::new(),
        }
    }

    pub fn client(&mut self, url: &str) -> Result<Arc<dyn SessionStream>, StreamError> {
        if let Some(client) = self.clients.get(url) {
            return Ok(Arc::clone(client));
        }
        debug!(url = %url, "Connecting stream client");
        let client = self.connector.connect(url)?;
        self.clients.insert(url.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
