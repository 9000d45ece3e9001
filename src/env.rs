use std::{cell::RefCell, ffi::OsStr, str::FromStr};

use crate::debugger::{SessionConfig, DEFAULT_CAPACITY, DEFAULT_STEP_LIMIT, DEFAULT_YIELD_INTERVAL};

#[derive(Clone, Copy)]
struct Env {
    trace_enabled: bool,
    trace_capacity: usize,
    step_limit: u64,
    yield_interval: u64,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        // Recording is on unless explicitly disabled
        trace_enabled: !var_is("TOYASM_TRACE", "0"),
        trace_capacity: var_parse("TOYASM_TRACE_CAPACITY").unwrap_or(DEFAULT_CAPACITY),
        step_limit: var_parse("TOYASM_STEP_LIMIT").unwrap_or(DEFAULT_STEP_LIMIT),
        yield_interval: var_parse("TOYASM_YIELD_INTERVAL").unwrap_or(DEFAULT_YIELD_INTERVAL),
    };
    set_env(value);
}

/// Session configuration from the environment. Output is not echoed.
pub fn session_config() -> SessionConfig {
    with_env(|env| SessionConfig {
        trace: env.trace_enabled,
        trace_capacity: env.trace_capacity.max(1),
        step_limit: env.step_limit,
        yield_interval: env.yield_interval.max(1),
        echo: false,
    })
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| &v == value.as_ref())
}

/// `None` if unset or malformed.
fn var_parse<T: FromStr>(name: impl AsRef<OsStr>) -> Option<T> {
    std::env::var(name.as_ref())
        .ok()
        .and_then(|v| v.trim().parse().ok())
}
