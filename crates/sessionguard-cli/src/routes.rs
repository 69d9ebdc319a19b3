//! Route table used by `sessionguard check-route`.
//!
//! Mirrors the navigation layout of the web front-end so guard decisions can
//! be checked from a terminal.

use sessionguard_core::{Route, RouteTable};

pub fn default_routes() -> RouteTable {
    RouteTable::new()
        .route(Route::public("/"))
        .route(Route::public("/login").hide_when_authenticated())
        .route(Route::public("/register").hide_when_authenticated())
        .route(Route::public("/forgot-password").hide_when_authenticated())
        .route(Route::public("/reset-password").hide_when_authenticated())
        .route(Route::public("/unauthorized"))
        .route(Route::protected("/dashboard"))
        .route(Route::protected("/profile"))
        .route(Route::protected("/sessions"))
        .route(Route::protected("/settings"))
        .route(Route::protected("/admin").with_roles(["admin"]))
        .route(
            Route::protected("/admin/users")
                .with_roles(["admin"])
                .with_permissions(["users:read"]),
        )
        .route(
            Route::protected("/admin/policies")
                .with_roles(["admin"])
                .with_permissions(["policies:write"]),
        )
}
