//! Method+exact-path routing: first registered match wins, a default 404
//! handler serves everything else.

use std::rc::Rc;

use crate::http::Request;

/// A request handler, generic over the arena lifetime of the request it's
/// given — every handler is `Fn`, not `FnOnce`, since the router may
/// dispatch to the same endpoint many times over the server's lifetime.
pub type Handler = dyn for<'a> Fn(&mut Request<'a>) + 'static;

pub struct Endpoint {
    method: String,
    path: String,
    pub(crate) callback: Rc<Handler>,
}

fn not_found(req: &mut Request<'_>) {
    let body = b"not found";
    let _ = req.set_header("Content-Type", "text/plain");
    let _ = req.set_header("Content-Length", &body.len().to_string());
    let _ = req.write_head(404, "Not Found");
    let _ = req.write_body(body);
}

/// Registered endpoints plus the built-in 404 fallback. Cheap to `clone`
/// (an `Rc` bump) so the listen loop can hand a copy to every connection
/// fiber.
#[derive(Clone)]
pub struct Router {
    endpoints: Rc<Vec<Endpoint>>,
    not_found: Rc<Handler>,
}

/// Accumulates endpoints before the router is handed to [`crate::net::listen`].
#[derive(Default)]
pub struct RouterBuilder {
    endpoints: Vec<Endpoint>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        RouterBuilder::default()
    }

    /// Registers `cb` for `method` requests to the exact path `path`.
    /// Registration order is preserved; earlier registrations win ties.
    pub fn register(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        cb: impl for<'a> Fn(&mut Request<'a>) + 'static,
    ) -> Self {
        self.endpoints.push(Endpoint {
            method: method.into(),
            path: path.into(),
            callback: Rc::new(cb),
        });
        self
    }

    /// Registers `cb` for `"GET"` requests to the exact path `path`.
    pub fn get(self, path: impl Into<String>, cb: impl for<'a> Fn(&mut Request<'a>) + 'static) -> Self {
        self.register("GET", path, cb)
    }

    pub fn build(self) -> Router {
        Router {
            endpoints: Rc::new(self.endpoints),
            not_found: Rc::new(not_found),
        }
    }
}

impl Router {
    /// First endpoint whose method (case-insensitive) and path (byte-exact)
    /// match, or the built-in 404 endpoint.
    pub fn dispatch(&self, method: &str, path: &str) -> Rc<Handler> {
        for endpoint in self.endpoints.iter() {
            if endpoint.method.eq_ignore_ascii_case(method) && endpoint.path == path {
                return endpoint.callback.clone();
            }
        }
        self.not_found.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    #[test]
    fn first_registration_wins_on_duplicate_path() {
        let hit_first = StdRc::new(Cell::new(false));
        let hit_second = StdRc::new(Cell::new(false));
        let f1 = hit_first.clone();
        let f2 = hit_second.clone();
        let router = RouterBuilder::new()
            .get("/dup", move |_req| f1.set(true))
            .get("/dup", move |_req| f2.set(true))
            .build();

        let cb = router.dispatch("GET", "/dup");
        // Can't call it without a real Request; just assert it's the first
        // endpoint's Rc by pointer identity.
        assert!(StdRc::ptr_eq(&cb, &router.endpoints[0].callback));
        let _ = hit_second;
    }

    #[test]
    fn unmatched_path_dispatches_not_found() {
        let router = RouterBuilder::new().get("/only", |_req| {}).build();
        let cb = router.dispatch("GET", "/missing");
        assert!(StdRc::ptr_eq(&cb, &router.not_found));
    }

    #[test]
    fn method_match_is_case_insensitive() {
        let router = RouterBuilder::new().get("/x", |_req| {}).build();
        let cb = router.dispatch("get", "/x");
        assert!(StdRc::ptr_eq(&cb, &router.endpoints[0].callback));
    }
}
