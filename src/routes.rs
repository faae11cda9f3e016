use serde::Serialize;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    SignIn,
    List,
    Write,
    View,
    Change,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Self::SignIn | Self::List => "/",
            Self::Write => "/write",
            Self::View => "/view",
            Self::Change => "/change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoute {
    pub route: Route,
    pub path: &'static str,
    pub show_header: bool,
}

/// Maps a location to the page to show. Without a session everything is the
/// sign-in page; unknown paths fall back to the list.
pub fn resolve_route(path: &str, session: Option<&Session>) -> ResolvedRoute {
    let route = if session.is_none() {
        Route::SignIn
    } else {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path.trim_end_matches('/') {
            "/write" => Route::Write,
            "/view" => Route::View,
            "/change" => Route::Change,
            _ => Route::List,
        }
    };
    ResolvedRoute {
        route,
        path: route.path(),
        show_header: !matches!(route, Route::SignIn | Route::Change),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_session_always_signs_in() {
        for path in ["/", "/write", "/view", "/change", "/nope"] {
            assert_eq!(resolve_route(path, None).route, Route::SignIn);
        }
    }

    #[test]
    fn signed_in_routes_by_path() {
        let session = Session::new("A1", json!(2024));
        let at = |path| resolve_route(path, Some(&session));
        assert_eq!(at("/").route, Route::List);
        assert_eq!(at("/write").route, Route::Write);
        assert_eq!(at("/view/").route, Route::View);
        assert_eq!(at("/view?ref=M-01").route, Route::View);
        assert_eq!(at("/elsewhere").path, "/");
        assert!(at("/view").show_header);
        assert!(!at("/change").show_header);
    }
}
