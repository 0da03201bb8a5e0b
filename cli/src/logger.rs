//! Stderr logging, filtered by `RUST_LOG` (or `info`/`debug` from `--verbose`).

use std::str::FromStr;

use logforth::append::Stderr;
use logforth::filter::EnvFilter;

pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter_spec = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    logforth::builder()
        .dispatch(move |d| {
            let filter = EnvFilter::from_str(&filter_spec).unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));
            d.filter(filter).append(Stderr::default())
        })
        .apply();
}
