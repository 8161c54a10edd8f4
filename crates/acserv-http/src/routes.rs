//! Path based dispatch to the portal handlers

use bytes::Bytes;
use http::Request;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::trace;

use crate::{portal, static_files, ResponseRecorder};

/// Handler selected for a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    LoginPage,
    Auth,
    StaticFile,
}

/// Fixed routes plus the static file fallback.
///
/// Matching is on the logical path only; the method is not checked.
#[derive(Debug, Clone)]
pub struct RouteTable {
    exact: HashMap<&'static str, Route>,
    public_dir: PathBuf,
}

impl RouteTable {
    pub fn new(public_dir: impl Into<PathBuf>) -> Self {
        let mut exact = HashMap::new();
        exact.insert("/index.html", Route::LoginPage);
        exact.insert("/auth", Route::Auth);

        Self {
            exact,
            public_dir: public_dir.into(),
        }
    }

    pub fn route(&self, path: &str) -> Route {
        self.exact.get(path).copied().unwrap_or(Route::StaticFile)
    }

    /// Run the handler for `path`, writing into `recorder`
    pub async fn dispatch(
        &self,
        request: &Request<Bytes>,
        path: &str,
        recorder: &mut ResponseRecorder,
    ) -> Route {
        let route = self.route(path);
        trace!("{} {} -> {:?}", request.method(), path, route);

        match route {
            Route::LoginPage => portal::login_page(recorder),
            Route::Auth => portal::authenticate(request, recorder),
            Route::StaticFile => static_files::serve(&self.public_dir, path, recorder).await,
        }

        route
    }
}
