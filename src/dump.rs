use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// What to do when the initial refresh completes.
///
/// Chosen once at startup from configuration and injected into the session;
/// behavior is never swapped after construction.
pub trait RefreshListener: Send {
    fn refresh_done(&self, entries: &BTreeMap<String, Value>);
}

/// Default strategy: print the synchronized directory to stdout.
pub struct DumpPrinter;

impl RefreshListener for DumpPrinter {
    fn refresh_done(&self, entries: &BTreeMap<String, Value>) {
        println!("--- refresh complete: {} entries ---", entries.len());
        for (dn, attrs) in entries {
            let attr_count = attrs.as_object().map(|m| m.len()).unwrap_or(0);
            println!("{dn}  ({attr_count} attributes)");
        }
    }
}

/// `--no-dump` strategy: note completion in the log, print nothing.
pub struct Quiet;

impl RefreshListener for Quiet {
    fn refresh_done(&self, entries: &BTreeMap<String, Value>) {
        info!(entries = entries.len(), "refresh complete, dump suppressed");
    }
}

/// Pick the listener for this run.
pub fn for_config(suppress_dump: bool) -> Box<dyn RefreshListener> {
    if suppress_dump {
        Box::new(Quiet)
    } else {
        Box::new(DumpPrinter)
    }
}
