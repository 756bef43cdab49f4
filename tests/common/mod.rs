//! Common Test Infrastructure
//!
//! Provides shared utilities for upload tests:
//! - In-memory storage with fault injection
//! - Recording sleeper and progress sink
//! - Source file helpers

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use s3_mp_upload::storage::{CompletedPart, MultipartSession, StorageClient, StorageError};
use s3_mp_upload::upload::{ProgressSink, Sleeper};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Bucket every test storage starts with
pub const TEST_BUCKET: &str = "test-bucket";

struct OpenSession {
    container: String,
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct StorageState {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), Bytes>,
    sessions: HashMap<String, OpenSession>,
    created: Vec<String>,
    aborted: Vec<String>,
    completions: Vec<Vec<CompletedPart>>,
    finish_order: Vec<u32>,
    /// (upload id, part number) for every part transfer that started
    received: Vec<(String, u32)>,
    /// (upload id, part number) for every part transfer that ran to the end
    finished: Vec<(String, u32)>,
    puts: usize,
}

/// In-memory object store
///
/// Faults are keyed on the order sessions were created, so a failing
/// attempt never leaks its failure into the next one.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Sessions (by creation order) whose `fail_part` upload fails
    failing_sessions: usize,
    fail_part: u32,
    failing_creates: AtomicUsize,
    failing_puts: AtomicUsize,
    fail_aborts: bool,
    part_delays: HashMap<u32, Duration>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let storage = Self::default();
        storage.state.lock().buckets.insert(TEST_BUCKET.to_string());
        storage
    }

    /// Fail part `part_number` in the first `sessions` sessions
    pub fn failing_part(mut self, part_number: u32, sessions: usize) -> Self {
        self.fail_part = part_number;
        self.failing_sessions = sessions;
        self
    }

    /// Fail the next `count` session creations
    pub fn failing_creates(self, count: usize) -> Self {
        self.failing_creates.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` direct puts
    pub fn failing_puts(self, count: usize) -> Self {
        self.failing_puts.store(count, Ordering::SeqCst);
        self
    }

    /// Every abort returns an error
    pub fn failing_aborts(mut self) -> Self {
        self.fail_aborts = true;
        self
    }

    /// Hold part `part_number` for `delay` before accepting it
    pub fn part_delay(mut self, part_number: u32, delay: Duration) -> Self {
        self.part_delays.insert(part_number, delay);
        self
    }

    pub fn insert_object(&self, key: &str, body: &[u8]) {
        self.state.lock().objects.insert(
            (TEST_BUCKET.to_string(), key.to_string()),
            Bytes::copy_from_slice(body),
        );
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .get(&(TEST_BUCKET.to_string(), key.to_string()))
            .cloned()
    }

    pub fn created_sessions(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn aborted_sessions(&self) -> Vec<String> {
        self.state.lock().aborted.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Token lists passed to every completion call
    pub fn completions(&self) -> Vec<Vec<CompletedPart>> {
        self.state.lock().completions.clone()
    }

    /// Part numbers in the order their uploads finished
    pub fn finish_order(&self) -> Vec<u32> {
        self.state.lock().finish_order.clone()
    }

    /// Part numbers whose transfer started in session `upload_id`
    pub fn parts_received(&self, upload_id: &str) -> Vec<u32> {
        Self::parts_in(&self.state.lock().received, upload_id)
    }

    /// Part numbers whose transfer ran to the end in session `upload_id`,
    /// whether or not the store accepted them
    pub fn parts_finished(&self, upload_id: &str) -> Vec<u32> {
        Self::parts_in(&self.state.lock().finished, upload_id)
    }

    fn parts_in(records: &[(String, u32)], upload_id: &str) -> Vec<u32> {
        records
            .iter()
            .filter(|(id, _)| id == upload_id)
            .map(|(_, part)| *part)
            .collect()
    }

    pub fn puts(&self) -> usize {
        self.state.lock().puts
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError> {
        Ok(self.state.lock().buckets.contains(container))
    }

    async fn object_exists(&self, container: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .state
            .lock()
            .objects
            .contains_key(&(container.to_string(), key.to_string())))
    }

    async fn create_multipart_session(
        &self,
        container: &str,
        key: &str,
    ) -> Result<MultipartSession, StorageError> {
        if Self::take_fault(&self.failing_creates) {
            return Err(StorageError::service(
                "CreateMultipartUpload",
                "service unavailable",
            ));
        }

        let mut state = self.state.lock();
        let upload_id = format!("upload-{}", state.created.len() + 1);
        state.created.push(upload_id.clone());
        state.sessions.insert(
            upload_id.clone(),
            OpenSession {
                container: container.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );

        Ok(MultipartSession {
            container: container.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        self.state
            .lock()
            .received
            .push((session.upload_id.clone(), part_number));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .part_delays
            .get(&part_number)
            .copied()
            .unwrap_or(Duration::from_millis(2));
        tokio::time::sleep(delay).await;

        let result = {
            let mut state = self.state.lock();
            state
                .finished
                .push((session.upload_id.clone(), part_number));
            let session_index = state
                .created
                .iter()
                .position(|id| *id == session.upload_id)
                .unwrap_or(usize::MAX);

            if part_number == self.fail_part && session_index < self.failing_sessions {
                Err(StorageError::service("UploadPart", "connection reset"))
            } else {
                match state.sessions.get_mut(&session.upload_id) {
                    Some(open) => {
                        let etag = format!("\"{}-part-{}\"", session.upload_id, part_number);
                        open.parts.insert(part_number, (etag.clone(), body));
                        state.finish_order.push(part_number);
                        Ok(CompletedPart { part_number, etag })
                    }
                    None => Err(StorageError::service("UploadPart", "NoSuchUpload")),
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError> {
        let mut state = self.state.lock();
        state.completions.push(parts.clone());

        if !parts.windows(2).all(|w| w[0].part_number < w[1].part_number) {
            return Err(StorageError::service(
                "CompleteMultipartUpload",
                "InvalidPartOrder",
            ));
        }

        let open = state
            .sessions
            .remove(&session.upload_id)
            .ok_or_else(|| StorageError::service("CompleteMultipartUpload", "NoSuchUpload"))?;

        let mut object = BytesMut::new();
        for part in &parts {
            match open.parts.get(&part.part_number) {
                Some((etag, body)) if *etag == part.etag => object.extend_from_slice(body),
                _ => {
                    return Err(StorageError::service(
                        "CompleteMultipartUpload",
                        "InvalidPart",
                    ))
                }
            }
        }

        state
            .objects
            .insert((open.container, open.key), object.freeze());
        Ok(format!("\"{}-complete\"", session.upload_id))
    }

    async fn abort_multipart_session(&self, session: &MultipartSession) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.aborted.push(session.upload_id.clone());
        if self.fail_aborts {
            return Err(StorageError::service("AbortMultipartUpload", "access denied"));
        }
        state.sessions.remove(&session.upload_id);
        Ok(())
    }

    async fn put_object(&self, container: &str, key: &str, body: Bytes) -> Result<String, StorageError> {
        if Self::take_fault(&self.failing_puts) {
            return Err(StorageError::service("PutObject", "slow down"));
        }

        let mut state = self.state.lock();
        state.puts += 1;
        state
            .objects
            .insert((container.to_string(), key.to_string()), body);
        Ok(format!("\"put-{}\"", state.puts))
    }
}

/// Records backoff delays without waiting
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Reset,
    Bytes(u64),
    Finish,
}

/// Records every progress callback
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Bytes reported since the last reset
    pub fn current(&self) -> u64 {
        let events = self.events.lock();
        let start = events
            .iter()
            .rposition(|e| *e == ProgressEvent::Reset)
            .map_or(0, |i| i + 1);
        events[start..]
            .iter()
            .map(|e| match e {
                ProgressEvent::Bytes(n) => *n,
                _ => 0,
            })
            .sum()
    }
}

impl ProgressSink for RecordingProgress {
    fn bytes_completed(&self, bytes: u64) {
        self.events.lock().push(ProgressEvent::Bytes(bytes));
    }

    fn reset(&self) {
        self.events.lock().push(ProgressEvent::Reset);
    }

    fn finish(&self) {
        self.events.lock().push(ProgressEvent::Finish);
    }
}

/// Deterministic source content of `len` bytes
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Write `content` to a file named `name` inside `dir`
pub fn source_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    path
}
