//! Tag lifecycle: detection, reading, writing and removal.
//!
//! The session lives in a single-slot `watch` channel. Every state change
//! goes through `send_if_modified`, so a check ("is the reader idle?") and
//! the transition it guards happen in one step. Observers (main loop,
//! network clients) subscribe to the channel or take snapshots.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::capacity::classify;
use super::fast_path;
use super::frontend::{NfcFrontend, Uid};
use super::ndef::{self, TLV_TERMINATOR};
use super::tag_io::{PRESENCE_RECHECK, TagIo};
use crate::collaborators::SpoolDatabase;
use crate::config::EngineConfig;
use crate::coordinator::{DisplayLock, TaskGate, WatchdogFeed};
use crate::error::{Result, TagError};

const READ_STEPS: u8 = 2;
/// Minimum pause between scan iterations.
const SCAN_YIELD: Duration = Duration::from_millis(10);
/// TLV search window used while a full read is in progress.
const FRAME_WINDOW: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    #[default]
    Idle,
    Reading,
    ReadSuccess,
    ReadError,
    Writing,
    WriteSuccess,
    WriteError,
}

impl ReaderState {
    /// States from which a write request is accepted.
    pub fn accepts_write(self) -> bool {
        matches!(self, ReaderState::Idle | ReaderState::ReadError | ReaderState::ReadSuccess)
    }

    /// Terminal states a tag removal returns to `Idle`.
    pub fn ends_on_removal(self) -> bool {
        matches!(
            self,
            ReaderState::ReadSuccess
                | ReaderState::ReadError
                | ReaderState::WriteSuccess
                | ReaderState::WriteError
        )
    }
}

/// Read-only view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderSnapshot {
    pub state: ReaderState,
    /// Spool on the reader right now; empty when none.
    pub active_spool_id: String,
    /// The current tag already triggered its weight report.
    pub tag_processed: bool,
    pub write_in_progress: bool,
    /// Most recent known spool, kept across removals for location tags.
    pub last_spool_id: String,
    pub uid: Option<String>,
    pub json: Option<String>,
    pub last_error: Option<String>,
    /// Bumped for every admitted tag and every accepted write.
    pub generation: u64,
}

/// Shared access to the session slot.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<ReaderSnapshot>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReaderSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ReaderSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderSnapshot> {
        self.tx.subscribe()
    }

    /// Claim the current tag's single weight report.
    ///
    /// Returns `true` exactly once per successfully read or written tag.
    pub fn mark_processed(&self) -> bool {
        self.tx.send_if_modified(|s| {
            let eligible = matches!(s.state, ReaderState::ReadSuccess | ReaderState::WriteSuccess);
            if !eligible || s.tag_processed {
                return false;
            }
            s.tag_processed = true;
            true
        })
    }
}

/// Outcome of admitting a detected tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Reader went `Idle -> Reading` for this generation.
    Accepted(u64),
    /// Not an NTAG21x; the reader stays `Idle`.
    Rejected,
    /// Reader is not idle; nothing to do.
    Ignored,
}

/// What a successfully decoded tag turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TagContent {
    Spool(String),
    Location(String),
    Brand,
}

impl TagContent {
    fn status(&self) -> &'static str {
        match self {
            TagContent::Spool(_) => "Spool found",
            TagContent::Location(_) => "Location updated",
            TagContent::Brand => "Brand registered",
        }
    }
}

/// Drives the session through reads and writes.
pub struct ReaderStateMachine<F> {
    io: TagIo<F>,
    session: SessionHandle,
    database: Arc<dyn SpoolDatabase>,
    display: DisplayLock,
    config: Arc<EngineConfig>,
}

impl<F> Clone for ReaderStateMachine<F> {
    fn clone(&self) -> Self {
        Self {
            io: self.io.clone(),
            session: self.session.clone(),
            database: Arc::clone(&self.database),
            display: self.display.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<F: NfcFrontend> ReaderStateMachine<F> {
    pub fn new(
        io: TagIo<F>,
        session: SessionHandle,
        database: Arc<dyn SpoolDatabase>,
        display: DisplayLock,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            io,
            session,
            database,
            display,
            config,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn io(&self) -> &TagIo<F> {
        &self.io
    }

    fn admit(&self, uid: &Uid) -> Admission {
        let mut admission = Admission::Ignored;
        self.session.tx.send_if_modified(|s| {
            if s.state != ReaderState::Idle || s.write_in_progress {
                return false;
            }
            if !uid.is_ntag() {
                admission = Admission::Rejected;
                let had_spool = !s.active_spool_id.is_empty();
                s.active_spool_id.clear();
                return had_spool;
            }
            s.state = ReaderState::Reading;
            s.generation += 1;
            s.uid = Some(uid.to_string());
            s.tag_processed = false;
            s.json = None;
            s.last_error = None;
            admission = Admission::Accepted(s.generation);
            true
        });
        admission
    }

    /// Handle a tag found by the presence probe.
    pub async fn on_tag_detected(&self, uid: &Uid) -> Admission {
        let admission = self.admit(uid);
        match admission {
            Admission::Accepted(generation) => self.read_admitted(generation, uid).await,
            Admission::Rejected => {
                warn!(%uid, uid_len = uid.len(), "not an NTAG21x tag");
                let text = TagError::UnsupportedTag { uid_len: uid.len() }.display_text();
                self.display.show_progress(1, 1, "Failure", text).await;
            }
            Admission::Ignored => {}
        }
        admission
    }

    /// Presence probe found nothing. Returns `true` if the session went idle.
    pub fn on_tag_absent(&self) -> bool {
        let mut removed = false;
        self.session.tx.send_if_modified(|s| {
            if s.write_in_progress {
                return false;
            }
            let mut changed = !s.active_spool_id.is_empty();
            s.active_spool_id.clear();
            if s.state.ends_on_removal() {
                s.state = ReaderState::Idle;
                s.tag_processed = false;
                s.json = None;
                s.uid = None;
                removed = true;
                changed = true;
            }
            changed
        });
        if removed {
            info!("tag removed");
        }
        removed
    }

    async fn read_admitted(&self, generation: u64, uid: &Uid) {
        info!(%uid, generation, "tag detected");
        self.display
            .show_progress(0, READ_STEPS, "Reading", "Detecting tag")
            .await;
        sleep(self.config.tag_settle()).await;

        if let Some(spool_id) = fast_path::scan(&self.io, self.config.fast_path_pages).await {
            info!(%spool_id, "known spool via fast path");
            let content = TagContent::Spool(spool_id);
            if self.complete_read(generation, &content, None) {
                self.display
                    .show_progress(READ_STEPS, READ_STEPS, "Reading", content.status())
                    .await;
                let this = self.clone();
                tokio::spawn(async move { this.fill_details(generation).await });
            }
            return;
        }

        self.display
            .show_progress(1, READ_STEPS, "Reading", "Reading tag")
            .await;
        let uid_text = uid.to_string();
        let outcome = match self.full_read().await {
            Ok(json) => self.interpret(&json, &uid_text).await.map(|c| (c, json)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((content, json)) => {
                info!(?content, "tag read");
                if self.complete_read(generation, &content, Some(json)) {
                    self.display
                        .show_progress(READ_STEPS, READ_STEPS, "Reading", content.status())
                        .await;
                }
            }
            Err(e) => {
                warn!(error = %e, "tag read failed");
                if self.fail_read(generation, &e) {
                    self.display.show_progress(1, 1, "Failure", e.display_text()).await;
                }
            }
        }
    }

    fn complete_read(&self, generation: u64, content: &TagContent, json: Option<String>) -> bool {
        self.session.tx.send_if_modified(|s| {
            if s.generation != generation || s.state != ReaderState::Reading {
                return false;
            }
            s.state = ReaderState::ReadSuccess;
            s.json = json;
            match content {
                TagContent::Spool(id) => {
                    s.active_spool_id = id.clone();
                    s.last_spool_id = id.clone();
                }
                TagContent::Location(_) | TagContent::Brand => s.active_spool_id.clear(),
            }
            true
        })
    }

    fn fail_read(&self, generation: u64, error: &TagError) -> bool {
        self.session.tx.send_if_modified(|s| {
            if s.generation != generation || s.state != ReaderState::Reading {
                return false;
            }
            s.state = ReaderState::ReadError;
            s.active_spool_id.clear();
            s.last_error = Some(error.display_text().to_string());
            true
        })
    }

    /// Full read after a fast-path hit, for display and reporting only.
    ///
    /// Lands only if the session still belongs to the same tag and nothing
    /// moved it out of `ReadSuccess` in the meantime.
    async fn fill_details(&self, generation: u64) {
        match self.full_read().await {
            Ok(json) => {
                let landed = self.session.tx.send_if_modified(|s| {
                    if s.generation != generation || s.state != ReaderState::ReadSuccess {
                        return false;
                    }
                    s.json = Some(json);
                    true
                });
                debug!(generation, landed, "fast path detail read finished");
            }
            Err(e) => debug!(generation, error = %e, "fast path detail read failed"),
        }
    }

    /// Classify the tag, read its user area and decode the message.
    async fn full_read(&self) -> Result<String> {
        let layout = classify(&self.io).await;
        if !layout.is_known() {
            return Err(TagError::UnknownTagFamily);
        }

        let mut raw = Vec::with_capacity(layout.user_bytes());
        let mut page_error = None;
        for page in layout.first_user_page..=layout.last_user_page {
            let data = match self.io.read_page(page).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(page, error = %e, "stopping full read");
                    page_error = Some(e);
                    break;
                }
            };
            let frame = ndef::parse_frame(&raw, FRAME_WINDOW).ok();
            if data[0] == TLV_TERMINATOR && frame.is_none_or(|f| raw.len() >= f.message_end()) {
                debug!(page, "end of message marker");
                break;
            }
            raw.extend_from_slice(&data);
            if ndef::parse_frame(&raw, FRAME_WINDOW).is_ok_and(|f| raw.len() >= f.message_end()) {
                break;
            }
        }

        ndef::decode(&raw).map_err(|e| page_error.unwrap_or(e))
    }

    async fn interpret(&self, json: &str, uid: &str) -> Result<TagContent> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| TagError::JsonParseError(e.to_string()))?;

        if let Some(id) = spool_id_of(&value) {
            return Ok(TagContent::Spool(id));
        }

        if let Some(location) = value.get("location").and_then(Value::as_str) {
            let spool = self.session.snapshot().last_spool_id;
            if spool.is_empty() {
                return Err(TagError::NoPriorSpool);
            }
            if !self.database.update_location(&spool, location).await {
                return Err(TagError::Rejected("location update"));
            }
            info!(%spool, location, "spool moved");
            return Ok(TagContent::Location(location.to_string()));
        }

        if value.get("brand").is_some() && value.get("name").is_some() {
            if !self.database.create_brand_record(json, uid).await {
                return Err(TagError::Rejected("brand record"));
            }
            return Ok(TagContent::Brand);
        }

        Err(TagError::MalformedNdef {
            reason: "unrecognised tag content",
        })
    }

    /// Accept a write request and spawn the write task.
    ///
    /// Refused with [`TagError::Busy`] while a read or write is in flight.
    pub async fn request_write(&self, is_spool_tag: bool, json: &str) -> Result<JoinHandle<Result<()>>> {
        let payload = ndef::prioritize_spool_id(json);
        let accepted = self.session.tx.send_if_modified(|s| {
            if s.write_in_progress || !s.state.accepts_write() {
                return false;
            }
            s.state = ReaderState::Writing;
            s.write_in_progress = true;
            s.generation += 1;
            s.last_error = None;
            true
        });
        if !accepted {
            warn!(state = ?self.session.snapshot().state, "write refused, reader busy");
            self.display
                .show_progress(0, 1, "FAILURE", TagError::Busy.display_text())
                .await;
            return Err(TagError::Busy);
        }

        self.display.show_progress(0, 1, "Write Tag", "Place tag now").await;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.run_write(is_spool_tag, payload).await }))
    }

    async fn run_write(&self, is_spool_tag: bool, payload: String) -> Result<()> {
        match self.write_payload(&payload).await {
            Ok(uid) => {
                let spool_id = if is_spool_tag {
                    serde_json::from_str::<Value>(&payload)
                        .ok()
                        .as_ref()
                        .and_then(spool_id_of)
                        .unwrap_or_default()
                } else {
                    String::new()
                };
                info!(%uid, spool_id = %spool_id, "tag written");
                self.session.tx.send_modify(|s| {
                    s.state = ReaderState::WriteSuccess;
                    s.write_in_progress = false;
                    s.tag_processed = false;
                    s.uid = Some(uid.to_string());
                    s.json = Some(payload);
                    if !spool_id.is_empty() {
                        s.last_spool_id = spool_id.clone();
                    }
                    s.active_spool_id = spool_id;
                });
                self.display.show_progress(1, 1, "Write Tag", "Done!").await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "tag write failed");
                self.session.tx.send_modify(|s| {
                    s.state = ReaderState::WriteError;
                    s.write_in_progress = false;
                    s.active_spool_id.clear();
                    s.last_error = Some(e.display_text().to_string());
                });
                self.display.show_progress(1, 1, "FAILURE", e.display_text()).await;
                Err(e)
            }
        }
    }

    async fn write_payload(&self, payload: &str) -> Result<Uid> {
        let uid = self.wait_for_tag().await?;
        if !uid.is_ntag() {
            return Err(TagError::UnsupportedTag { uid_len: uid.len() });
        }
        let layout = classify(&self.io).await;
        if !layout.is_known() {
            return Err(TagError::UnknownTagFamily);
        }
        let tlv = ndef::encode(payload)?;
        self.io.write_message(&layout, &tlv).await?;
        Ok(uid)
    }

    async fn wait_for_tag(&self) -> Result<Uid> {
        for attempt in 1..=self.config.write_wait_attempts {
            match self.io.detect(PRESENCE_RECHECK).await {
                Ok(Some(uid)) => {
                    debug!(attempt, "tag ready for writing");
                    return Ok(uid);
                }
                Ok(None) => {}
                Err(e) => debug!(attempt, error = %e, "presence probe failed"),
            }
        }
        Err(TagError::TagAbsent)
    }

    /// One scan iteration. Returns how long to wait before the next one.
    async fn scan_once(&self, rejected: &mut Option<Uid>) -> Duration {
        let snapshot = self.session.snapshot();
        if snapshot.write_in_progress || snapshot.state == ReaderState::Writing {
            return self.config.write_pause_poll();
        }

        let found = match self.io.detect(PRESENCE_RECHECK).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "presence probe failed");
                None
            }
        };

        match found {
            None => {
                *rejected = None;
                self.on_tag_absent();
            }
            Some(uid) if rejected.as_ref() == Some(&uid) => {}
            Some(uid) => {
                if self.on_tag_detected(&uid).await == Admission::Rejected {
                    *rejected = Some(uid);
                }
            }
        }

        if self.session.snapshot().state == ReaderState::ReadSuccess {
            self.config.read_success_hold()
        } else {
            self.config.scan_interval()
        }
    }

    /// Scan task body. Never returns.
    pub async fn run_scan_loop(self, gate: TaskGate, feed: WatchdogFeed) {
        info!("scan task started");
        let mut rejected = None;
        loop {
            feed.feed();
            let pause = {
                let _permit = gate.enter().await;
                self.scan_once(&mut rejected).await
            };
            feed.feed();
            sleep(pause.max(SCAN_YIELD)).await;
        }
    }
}

/// Known spool id in a tag payload: a non-empty `sm_id` other than `"0"`.
pub fn spool_id_of(value: &Value) -> Option<String> {
    let id = match value.get(ndef::SPOOL_ID_KEY)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty() && id != "0").then_some(id)
}
