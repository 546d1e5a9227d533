//! Shared helpers for unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tempfile::NamedTempFile;

use crate::db::Store;

/// Serve `router` on an ephemeral local port and return its address.
pub async fn serve_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A store backed by a throwaway database file. Keep the file alive for the
/// duration of the test.
pub fn temp_store() -> (NamedTempFile, Arc<Store>) {
    let tmp = NamedTempFile::new().unwrap();
    let store = Arc::new(Store::new(tmp.path()).unwrap());
    (tmp, store)
}
