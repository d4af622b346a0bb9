// Shared fixtures for the integration tests: small trained classifiers written to
// disk, an in-memory artifact store, and a one-shot HTTP server for download tests.

use genoclass::artifact::{ArtifactError, ArtifactStore};
use genoclass::model::{ClassifierKind, DecisionTree, TrainedClassifier, TreeNode};
use genoclass::pipeline::{DISORDER_MODEL_ID, PredictionService, SUBCLASS_MODEL_ID};
use genoclass::schema::GENETIC_DISORDER_FEATURES;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub fn feature_names() -> Vec<String> {
    GENETIC_DISORDER_FEATURES.iter().map(|s| s.to_string()).collect()
}

/// A linear classifier that ignores its input and always picks `winner`.
pub fn constant_classifier(model_id: &str, classes: &[i64], winner: i64) -> TrainedClassifier {
    let n_features = GENETIC_DISORDER_FEATURES.len();
    let intercepts = classes
        .iter()
        .map(|&c| if c == winner { 1.0 } else { 0.0 })
        .collect::<Array1<f64>>();
    TrainedClassifier {
        model_id: model_id.to_string(),
        feature_names: feature_names(),
        classes: classes.to_vec(),
        predictor: ClassifierKind::Linear {
            coefficients: Array2::zeros((classes.len(), n_features)),
            intercepts,
        },
    }
}

/// A one-tree forest over the disorder classes: patients older than 10 are class 2,
/// everyone else class 0.
pub fn age_split_disorder_forest() -> TrainedClassifier {
    let age = GENETIC_DISORDER_FEATURES
        .iter()
        .position(|&f| f == "Patient Age")
        .unwrap();
    TrainedClassifier {
        model_id: DISORDER_MODEL_ID.to_string(),
        feature_names: feature_names(),
        classes: vec![0, 1, 2],
        predictor: ClassifierKind::Forest {
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: age,
                        threshold: 10.0,
                        left: 1,
                        right: 2,
                    },
                    TreeNode::Leaf {
                        weights: vec![6.0, 1.0, 0.0],
                    },
                    TreeNode::Leaf {
                        weights: vec![0.0, 1.0, 9.0],
                    },
                ],
            }],
        },
    }
}

pub fn disorder_always(code: i64) -> TrainedClassifier {
    constant_classifier(DISORDER_MODEL_ID, &[0, 1, 2], code)
}

pub fn subclass_always(code: i64) -> TrainedClassifier {
    constant_classifier(SUBCLASS_MODEL_ID, &[0, 1, 2, 3, 4, 5, 6, 7, 8], code)
}

/// Serves artifacts straight from local paths and counts how often it is asked.
pub struct FixtureStore {
    paths: HashMap<String, PathBuf>,
    fetches: AtomicUsize,
}

impl FixtureStore {
    pub fn new(paths: HashMap<String, PathBuf>) -> Self {
        Self {
            paths,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for FixtureStore {
    fn fetch(&self, model_id: &str) -> Result<PathBuf, ArtifactError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = self
            .paths
            .get(model_id)
            .ok_or_else(|| ArtifactError::UnknownModel(model_id.to_string()))?;
        if path.is_file() {
            Ok(path.clone())
        } else {
            Err(ArtifactError::MissingLocal(path.clone()))
        }
    }
}

/// Saves both classifiers under `dir` and returns a service wired to them.
pub fn service_with(
    dir: &Path,
    disorder: &TrainedClassifier,
    subclass: &TrainedClassifier,
) -> (PredictionService, Arc<FixtureStore>) {
    let mut paths = HashMap::new();
    for model in [disorder, subclass] {
        let path = dir.join(format!("{}.toml", model.model_id));
        model.save(&path).unwrap();
        paths.insert(model.model_id.clone(), path);
    }
    let store = Arc::new(FixtureStore::new(paths));
    let service = PredictionService::new(store.clone());
    (service, store)
}

/// What the stub server sends back for one connection.
pub enum StubReply {
    Body(Vec<u8>),
    /// Declares `declared` bytes of content but sends only `body`, then hangs up.
    Truncated { declared: usize, body: Vec<u8> },
    Status(u16),
    /// Accepts the request and says nothing for the given duration.
    Stall(Duration),
}

/// A minimal HTTP/1.1 server answering one connection per scripted reply, in order.
pub struct StubServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
}

impl StubServer {
    pub fn start(replies: Vec<StubReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        thread::spawn(move || {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                read_request_head(&mut stream);
                respond(&mut stream, reply);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn read_request_head(stream: &mut TcpStream) {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            return;
        }
        seen.extend_from_slice(&buf[..n]);
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            return;
        }
    }
}

fn respond(stream: &mut TcpStream, reply: StubReply) {
    let result = match reply {
        StubReply::Body(body) => write_response(stream, 200, body.len(), &body),
        StubReply::Truncated { declared, body } => write_response(stream, 200, declared, &body),
        StubReply::Status(code) => write_response(stream, code, 0, &[]),
        StubReply::Stall(pause) => {
            thread::sleep(pause);
            Ok(())
        }
    };
    // The client may already have given up; that is what some tests want.
    let _ = result;
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_length: usize,
    body: &[u8],
) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status} Stub\r\nContent-Length: {content_length}\r\nContent-Type: application/toml\r\nConnection: close\r\n\r\n"
    )?;
    stream.write_all(body)?;
    stream.flush()
}
