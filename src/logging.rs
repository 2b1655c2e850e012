use std::{collections::HashMap, sync::Mutex};

use serde_json::{json, Value};
use tokio::{
    sync::oneshot::{self, Receiver, Sender},
    task::JoinHandle,
};
use tracing::{info_span, Span};
use tracing_forest::{processor::from_fn, traits::*, tree::Tree, worker_task};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, Layer, Registry};
use uuid::Uuid;

/// What the forest worker records, whether or not anyone is capturing.
const CAPTURE_FILTER: &str = "presentation_hierarchies=trace";

lazy_static! {
    /// Captures whose root span hasn't closed yet, by the span's uuid.
    static ref PENDING_CAPTURES: Mutex<HashMap<Uuid, Sender<Tree>>> = Mutex::new(HashMap::new());
    static ref FOREST_WORKER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);
}

/// Spans become `{ "name", "nodes" }`; events become an object of their
/// fields, plus `message` when they have one.
pub fn tree_to_json(tree: &Tree) -> Value {
    match tree {
        Tree::Span(span) => json!({
            "name": span.name(),
            "nodes": span.nodes().iter().map(tree_to_json).collect::<Vec<Value>>(),
        }),
        Tree::Event(event) => {
            let message = event
                .message()
                .map(|message| ("message".to_string(), json!(message)));
            let fields = event
                .fields()
                .iter()
                .map(|field| (field.key().to_string(), json!(field.value())));
            Value::Object(message.into_iter().chain(fields).collect())
        }
    }
}

/// The log tree of one piece of async work.
///
/// The work has to run instrumented with `span()`; the tree is delivered by
/// the forest worker once that span and every clone of it are gone.
pub struct SpanCapture {
    span: Span,
    tree: Receiver<Tree>,
}

impl SpanCapture {
    pub fn new(label: &str) -> SpanCapture {
        let id = Uuid::new_v4();
        let span = info_span!(parent: None, "captured", label, uuid = %id);
        let (sender, tree) = oneshot::channel();
        // Nobody will ever close a disabled span's tree; dropping the sender
        // makes `finish` return right away.
        if !span.is_disabled() {
            PENDING_CAPTURES.lock().unwrap().insert(id, sender);
        }
        SpanCapture { span, tree }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// `Value::Null` when logging isn't initialized.
    pub async fn finish(self) -> Value {
        let SpanCapture { span, tree } = self;
        drop(span);
        match tree.await {
            Ok(tree) => tree_to_json(&tree),
            Err(_) => Value::Null,
        }
    }
}

fn console_layer() -> Option<Box<dyn Layer<Registry> + Send + Sync>> {
    // Unset and empty RUST_LOG both mean no console output.
    let directives = std::env::var("RUST_LOG").ok().filter(|s| !s.is_empty())?;
    let filter = EnvFilter::try_new(directives).ok()?;
    Some(
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
            .compact()
            .with_ansi(false)
            .without_time()
            .with_filter(filter)
            .boxed(),
    )
}

/// Install tracing-forest as the global subscriber so `SpanCapture` works;
/// `RUST_LOG` additionally turns on compact console output.
///
/// Needs a tokio runtime.  Later calls do nothing.
pub fn init_logging() {
    let mut worker = FOREST_WORKER.lock().unwrap();
    if worker.is_some() {
        return;
    }

    let handle = tokio::spawn(
        worker_task()
            .set_global(true)
            .map_receiver(|_| {
                from_fn(|tree| {
                    if let Tree::Span(span) = &tree {
                        let sender = PENDING_CAPTURES.lock().unwrap().remove(&span.uuid());
                        if let Some(sender) = sender {
                            let _ = sender.send(tree);
                        }
                    }
                    Ok(())
                })
            })
            .build_with(|forest| {
                let mut layers = vec![forest.boxed()];
                layers.extend(console_layer());
                Registry::default()
                    .with(layers)
                    .with(EnvFilter::new(CAPTURE_FILTER))
            })
            .on(async {
                let _ = tokio::signal::ctrl_c().await;
            }),
    );
    *worker = Some(handle);
}
