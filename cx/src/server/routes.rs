//! Route table and request handlers
//!
//! Every handler is a plain function over the shared registries. Handlers run
//! synchronously and only contend on the store lock.

use tracing::{debug, warn};

use super::http::{Method, Request, Response};
use crate::registry::{Registration, Registries, StoreError, is_reserved_key};

/// Prefix every coordination route is mounted under
pub const API_PREFIX: &str = "/api/Data";

pub const SET_CACHE_BY_NAME: &str = "/SetCacheByName";
pub const GET_CACHE_BY_NAME: &str = "/GetCacheByName";
pub const REGISTER_SCENARIO_BY_NAME: &str = "/RegisterScenarioByName";
pub const GET_SCENARIO_EXECUTORS_COUNT_BY_NAME: &str = "/GetScenarioExecutorsCountByName";
pub const READINESS_PROBE: &str = "/ReadinessProbe";
pub const REGISTER_AGENT: &str = "/RegisterAgent";
pub const DOES_CLUSTER_SYNCHRONIZED: &str = "/DoesClusterSynchronized";

/// Query parameter carrying the key or scenario name
const NAME_PARAM: &str = "name";

type Handler = fn(&Registries, &Request) -> Response;

struct Route {
    method: Method,
    path: &'static str,
    handler: Handler,
}

fn routes() -> [Route; 7] {
    [
        Route {
            method: Method::Post,
            path: SET_CACHE_BY_NAME,
            handler: set_value,
        },
        Route {
            method: Method::Get,
            path: GET_CACHE_BY_NAME,
            handler: get_value,
        },
        Route {
            method: Method::Post,
            path: REGISTER_SCENARIO_BY_NAME,
            handler: register_scenario,
        },
        Route {
            method: Method::Get,
            path: GET_SCENARIO_EXECUTORS_COUNT_BY_NAME,
            handler: scenario_executors_count,
        },
        Route {
            method: Method::Get,
            path: READINESS_PROBE,
            handler: readiness_probe,
        },
        Route {
            method: Method::Post,
            path: REGISTER_AGENT,
            handler: register_agent,
        },
        Route {
            method: Method::Get,
            path: DOES_CLUSTER_SYNCHRONIZED,
            handler: cluster_synchronized,
        },
    ]
}

/// Route a request to its handler
pub fn dispatch(registries: &Registries, request: &Request) -> Response {
    debug!(method = %request.method, path = %request.path, "dispatch: called");

    let Some(route_path) = request.path.strip_prefix(API_PREFIX) else {
        return Response::not_found();
    };

    let mut path_matched = false;
    for route in routes() {
        if route.path != route_path {
            continue;
        }
        path_matched = true;
        if route.method == request.method {
            return (route.handler)(registries, request);
        }
    }

    if path_matched {
        warn!(method = %request.method, path = %request.path, "Method not allowed");
        Response::method_not_allowed()
    } else {
        Response::not_found()
    }
}

fn required_name(request: &Request) -> Result<&str, Response> {
    match request.param(NAME_PARAM) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(Response::bad_request("missing 'name' query parameter")),
    }
}

fn set_value(registries: &Registries, request: &Request) -> Response {
    let key = match required_name(request) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    if is_reserved_key(key) {
        warn!(%key, "Refusing to overwrite membership state");
        return Response::conflict(StoreError::ReservedKey(key.to_string()).to_string());
    }
    registries.store.set(key, request.body.clone());
    Response::ok()
}

fn get_value(registries: &Registries, request: &Request) -> Response {
    let key = match required_name(request) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    match registries.store.get(key) {
        Some(value) => Response::text(value),
        None => Response::no_content(),
    }
}

fn register_scenario(registries: &Registries, request: &Request) -> Response {
    let scenario = match required_name(request) {
        Ok(scenario) => scenario,
        Err(resp) => return resp,
    };
    match registries.scenarios.register_interest(scenario) {
        Ok(_) => Response::ok(),
        Err(e @ StoreError::ReservedKey(_)) => {
            warn!(%scenario, error = %e, "Refusing scenario registration");
            Response::conflict(e.to_string())
        }
        Err(e) => {
            warn!(%scenario, error = %e, "Failed to register scenario interest");
            Response::internal_error(e.to_string())
        }
    }
}

fn scenario_executors_count(registries: &Registries, request: &Request) -> Response {
    let scenario = match required_name(request) {
        Ok(scenario) => scenario,
        Err(resp) => return resp,
    };
    match registries.scenarios.get_count(scenario) {
        Ok(Some(count)) => Response::text(count.to_string()),
        Ok(None) => Response::no_content(),
        Err(e) => {
            warn!(%scenario, error = %e, "Failed to read scenario counter");
            Response::internal_error(e.to_string())
        }
    }
}

fn readiness_probe(_registries: &Registries, _request: &Request) -> Response {
    Response::ok()
}

fn register_agent(registries: &Registries, _request: &Request) -> Response {
    match registries.membership.try_register() {
        Ok(Registration::Accepted { .. }) => Response::ok(),
        Ok(Registration::Rejected) => Response::no_content(),
        Err(e) => {
            warn!(error = %e, "Failed to register agent");
            Response::internal_error(e.to_string())
        }
    }
}

fn cluster_synchronized(registries: &Registries, _request: &Request) -> Response {
    if registries.membership.is_closed() {
        Response::ok()
    } else {
        Response::no_content()
    }
}
