//! Scripted in-memory browser for pipeline and server tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::backend::{BrowserBackend, BrowserSession, Context, FrameHandle, Viewport};
use crate::config::Config;
use crate::target::script;

/// How the fake output frame reports completion after code injection.
#[derive(Clone)]
pub enum Completion {
    /// A stale message for other code, then the real one with these errors.
    Report(Value),
    /// Only a stale message; the real one never comes.
    StaleOnly,
    /// Nothing at all, like a program stuck in an unguarded loop.
    Never,
}

#[derive(Clone)]
pub struct Script {
    pub fail_launch: bool,
    pub missing_selector: Option<&'static str>,
    pub unresolved_frame: bool,
    pub completion: Completion,
    pub logs: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_launch: false,
            missing_selector: None,
            unresolved_frame: false,
            completion: Completion::Report(json!([])),
            logs: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct Counters {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub killed: AtomicUsize,
    pub canvas_samples: AtomicUsize,
    pub loop_protector_disabled: AtomicBool,
    /// `(session index, code)` for every editor injection.
    pub injected: Mutex<Vec<(usize, String)>>,
    pub visited: Mutex<Vec<String>>,
}

impl Counters {
    pub fn releases(&self) -> usize {
        self.closed.load(Ordering::SeqCst) + self.killed.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeBackend {
    script: Script,
    counters: Arc<Counters>,
}

impl FakeBackend {
    pub fn new(script: Script) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let backend = Self {
            script,
            counters: Arc::clone(&counters),
        };
        (backend, counters)
    }
}

struct FakeSession {
    id: usize,
    script: Script,
    counters: Arc<Counters>,
    events: Mutex<Option<UnboundedSender<String>>>,
}

/// A 4x4 red PNG.
pub fn png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Defaults with short waits and a 2-frame animation.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.target.base_url = "https://example.test/new".into();
    config.target.selector_timeout_ms = 50;
    config.target.poll_interval_ms = 5;
    config.run.timeout_seconds = 5;
    config.run.completion_timeout_seconds = 1;
    config.run.animation.fps = 20;
    config.run.animation.duration_ms = 100;
    config
}

fn completion_message(code: &str, errors: &Value) -> String {
    json!({ "results": { "code": code, "errors": errors } }).to_string()
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn launch(&self, _viewport: Viewport) -> anyhow::Result<Box<dyn BrowserSession>> {
        if self.script.fail_launch {
            anyhow::bail!("chrome not found");
        }
        let id = self.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id,
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
            events: Mutex::new(None),
        }))
    }
}

impl FakeSession {
    fn inject(&self, expression: &str) {
        let start = expression.find("setValue(").unwrap() + "setValue(".len();
        let end = expression.rfind("); return true;").unwrap();
        let code: String = serde_json::from_str(&expression[start..end]).unwrap();
        self.counters
            .injected
            .lock()
            .unwrap()
            .push((self.id, code.clone()));

        let events = self.events.lock().unwrap();
        let tx = events.as_ref().expect("listener installed before injection");
        match &self.script.completion {
            Completion::Report(errors) => {
                tx.unbounded_send(completion_message("previous program", &json!([])))
                    .unwrap();
                tx.unbounded_send(completion_message(&code, errors)).unwrap();
            }
            Completion::StaleOnly => {
                tx.unbounded_send(completion_message("previous program", &json!([])))
                    .unwrap();
            }
            Completion::Never => {}
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.counters.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn evaluate(&self, _context: Context, expression: &str) -> anyhow::Result<Value> {
        if expression.ends_with("!== null") {
            let missing = self
                .script
                .missing_selector
                .is_some_and(|selector| expression.contains(selector));
            return Ok(Value::Bool(!missing));
        }
        if expression.contains("setValue(") {
            self.inject(expression);
            return Ok(Value::Bool(true));
        }
        if expression == script::DISABLE_LOOP_PROTECTOR {
            self.counters
                .loop_protector_disabled
                .store(true, Ordering::SeqCst);
            return Ok(Value::Bool(true));
        }
        if expression.contains("toDataURL") {
            self.counters.canvas_samples.fetch_add(1, Ordering::SeqCst);
            let encoded = base64::engine::general_purpose::STANDARD.encode(png());
            return Ok(Value::String(format!("data:image/png;base64,{encoded}")));
        }
        if expression.contains("querySelectorAll") {
            return Ok(json!(self.script.logs));
        }
        Ok(Value::Bool(true))
    }

    async fn content_frame(&self, _selector: &str) -> anyhow::Result<Option<FrameHandle>> {
        Ok((!self.script.unresolved_frame).then_some(FrameHandle(7)))
    }

    async fn screenshot_element(&self, _selector: &str) -> anyhow::Result<Vec<u8>> {
        Ok(png())
    }

    async fn subscribe(&self, _binding: &str) -> anyhow::Result<BoxStream<'static, String>> {
        let (tx, rx) = mpsc::unbounded();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn kill(&mut self) {
        self.counters.killed.fetch_add(1, Ordering::SeqCst);
    }
}
