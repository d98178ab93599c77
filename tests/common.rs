#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shopscribe::{DescriptionGenerator, GenerationError, GenerationRequest, RetryPolicy, RunOptions};

pub const CATALOG: &str = "\
Handle,Title,Body (HTML),Vendor,Type,Variant SKU
alpha,Alpha Candle,<p>Old alpha</p>,Atelier,Candle,A-1
alpha,,,,,A-2
bravo,Bravo Soap,<p>Old bravo</p>,Atelier,Soap,B-1
charlie,Charlie Oil,<p>Old charlie</p>,Forest,Oil,C-1
";

/// Generator that replays per-handle scripts, then falls back to a fixed
/// success. Records every call.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    always: HashMap<String, GenerationError>,
    calls: Mutex<Vec<String>>,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses for `handle`, consumed in order.
    pub fn script(
        self,
        handle: &str,
        responses: Vec<Result<String, GenerationError>>,
    ) -> Self {
        self.scripts
            .lock()
            .expect("mutex poisoned")
            .insert(handle.to_string(), responses.into());
        self
    }

    /// Every call for `handle` fails with `error`.
    pub fn always_fail(mut self, handle: &str, error: GenerationError) -> Self {
        self.always.insert(handle.to_string(), error);
        self
    }

    /// Set `flag` once `calls` calls have been made.
    pub fn stop_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.stop_after = Some((calls, flag));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mutex poisoned").clone()
    }

    pub fn calls_for(&self, handle: &str) -> usize {
        self.calls().iter().filter(|h| *h == handle).count()
    }
}

pub fn fresh(handle: &str) -> String {
    format!("<p>Fresh copy for {handle}</p>")
}

#[async_trait]
impl DescriptionGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let count = {
            let mut calls = self.calls.lock().expect("mutex poisoned");
            calls.push(request.handle.clone());
            calls.len()
        };
        if let Some((limit, flag)) = &self.stop_after {
            if count >= *limit {
                flag.store(true, Ordering::SeqCst);
            }
        }

        if let Some(error) = self.always.get(&request.handle) {
            return Err(error.clone());
        }
        let scripted = self
            .scripts
            .lock()
            .expect("mutex poisoned")
            .get_mut(&request.handle)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(fresh(&request.handle)))
    }
}

pub fn write_catalog(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("products.csv");
    std::fs::write(&path, content).expect("write catalog");
    path
}

pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).expect("open export");
    reader
        .records()
        .map(|r| r.expect("csv row").iter().map(str::to_string).collect())
        .collect()
}

/// No jitter so waits are exact: 1s, 2s, 4s, 8s...
pub fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .base_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(60))
}

pub fn quiet() -> RunOptions {
    RunOptions {
        inter_record_delay: Duration::ZERO,
        show_progress: false,
        ..RunOptions::default()
    }
}

pub fn server_error() -> GenerationError {
    GenerationError::Server {
        status: 503,
        message: "overloaded".to_string(),
    }
}
