//! Documents known to a transformation: numbering and the at-most-once load cache.

use crate::model::XdmNode;
use crate::runtime::{Error, ErrorCode};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use url::Url;

/// Turns an absolute URI into a document root. Supplied by the host.
pub trait DocumentLoader<N>: Send + Sync {
    fn load(&self, uri: &str) -> Result<N, Error>;
}

type LoadCell<N> = Arc<OnceLock<Result<N, Error>>>;

pub struct DocumentPool<N> {
    loader: Option<Arc<dyn DocumentLoader<N>>>,
    numbers: RwLock<Vec<N>>,
    by_uri: RwLock<HashMap<String, LoadCell<N>>>,
}

impl<N> core::fmt::Debug for DocumentPool<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DocumentPool")
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl<N: XdmNode> DocumentPool<N> {
    pub fn new(loader: Option<Arc<dyn DocumentLoader<N>>>) -> Self {
        Self { loader, numbers: RwLock::new(Vec::new()), by_uri: RwLock::new(HashMap::new()) }
    }

    /// Stable number of the document rooted at `root`, allocated on first sight.
    pub fn document_number(&self, root: &N) -> usize {
        let known = self
            .numbers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|r| r == root);
        if let Some(n) = known {
            return n;
        }
        let mut numbers = self.numbers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = numbers.iter().position(|r| r == root) {
            return n;
        }
        numbers.push(root.clone());
        let n = numbers.len() - 1;
        tracing::debug!(number = n, "allocated document number");
        n
    }

    /// Absolute form of `href` against `base`. References that cannot be joined are
    /// returned as given.
    pub fn resolve(&self, href: &str, base: Option<&str>) -> String {
        let joined = match base {
            Some(base) => Url::parse(base).and_then(|b| b.join(href)),
            None => Url::parse(href),
        };
        joined.map_or_else(|_| href.to_string(), String::from)
    }

    /// Make an already parsed document available under `uri` without calling the loader.
    ///
    /// The first document seen under a URI wins. Returns `false`, and allocates no
    /// document number, when `uri` was already registered or loaded (or its load failed).
    pub fn register(&self, uri: &str, root: N) -> bool {
        let cell = self.cell(uri);
        if cell.set(Ok(root.clone())).is_err() {
            tracing::debug!(uri = %uri, "document already known, registration ignored");
            return false;
        }
        self.document_number(&root);
        true
    }

    /// Root of the document at `uri`, loading it on first request. Each URI is
    /// loaded at most once; a failure is cached as well.
    pub fn load(&self, uri: &str) -> Result<N, Error> {
        let cell = self.cell(uri);
        let root = cell
            .get_or_init(|| {
                let Some(loader) = &self.loader else {
                    return Err(Error::from_code(
                        ErrorCode::FODC0002,
                        format!("no document loader for {uri}"),
                    ));
                };
                tracing::debug!(uri = %uri, "loading document");
                loader.load(uri)
            })
            .clone()?;
        self.document_number(&root);
        Ok(root)
    }

    pub fn loaded(&self) -> usize {
        self.by_uri
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| matches!(cell.get(), Some(Ok(_))))
            .count()
    }

    fn cell(&self, uri: &str) -> LoadCell<N> {
        if let Some(cell) = self.by_uri.read().unwrap_or_else(PoisonError::into_inner).get(uri) {
            return Arc::clone(cell);
        }
        let mut by_uri = self.by_uri.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(by_uri.entry(uri.to_string()).or_default())
    }
}
