use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::directory::Actor;
use crate::error::TicketError;
use crate::shared::schema::{ticket_attachments, tickets};
use crate::shared::utils::format_bytes;
use crate::tickets::audit::{AuditAction, AuditEvent};
use crate::tickets::models::AttachmentRecord;
use crate::tickets::service::lock_ticket;
use crate::tickets::types::UploadedFile;

// Per-file ceiling: 200 MiB.
pub const MAX_FILE_BYTES: i64 = 200 * 1024 * 1024;
// Aggregate ceiling over a ticket's live attachments: 500 MiB.
pub const MAX_TICKET_BYTES: i64 = 500 * 1024 * 1024;

// Everything not listed is rejected.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    // images
    "bmp", "gif", "heic", "jpeg", "jpg", "png", "svg", "tif", "tiff", "webp",
    // documents
    "csv", "doc", "docx", "md", "odp", "ods", "odt", "pdf", "ppt", "pptx", "rtf", "txt", "xls",
    "xlsx",
    // text and config
    "cfg", "conf", "ini", "json", "log", "toml", "xml", "yaml", "yml",
    // archives
    "7z", "bz2", "gz", "rar", "tar", "tgz", "xz", "zip",
    // media
    "avi", "flac", "m4a", "mkv", "mov", "mp3", "mp4", "ogg", "wav", "webm",
    // diagnostic captures and dumps
    "bak", "cap", "dmp", "eml", "har", "msg", "pcap", "pcapng", "sql",
];

static MAGIC_BYTES: &[(&[u8], &str)] = &[
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"\x89PNG\r\n\x1A\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07", "application/vnd.rar"),
    (b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed"),
    (b"\x1F\x8B", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xFD7zXZ\x00", "application/x-xz"),
    (b"\xD0\xCF\x11\xE0", "application/vnd.ms-office"),
    (b"ID3", "audio/mpeg"),
    (b"OggS", "application/ogg"),
    (b"fLaC", "audio/flac"),
    (b"\x1A\x45\xDF\xA3", "video/x-matroska"),
    (b"\xD4\xC3\xB2\xA1", "application/vnd.tcpdump.pcap"),
    (b"\xA1\xB2\xC3\xD4", "application/vnd.tcpdump.pcap"),
    (b"\x0A\x0D\x0D\x0A", "application/x-pcapng"),
];

// ============================================================================
// STORE
// ============================================================================

// Filesystem store rooted at a configurable directory, one subdirectory
// per ticket.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, storage_path: &str) -> PathBuf {
        self.root.join(storage_path)
    }

    fn ticket_dir(&self, ticket_id: Uuid) -> PathBuf {
        self.root.join("tickets").join(ticket_id.to_string())
    }

    // Bytes are fsynced before return; a descriptor row must never point
    // at a file that is not durably on disk.
    pub fn persist(
        &self,
        ticket_id: Uuid,
        stored_name: &str,
        data: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.ticket_dir(ticket_id);
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o750)?;

        let path = dir.join(stored_name);
        let mut file = fs::File::create(&path)?;
        file.write_all(data)?;
        file.sync_all()?;
        restrict_permissions(&path, 0o640)?;
        Ok(path)
    }

    // Best-effort removal of staged files after a failed ingest. The
    // ticket directory goes too once nothing else is left in it.
    pub fn discard(&self, ticket_id: Uuid, paths: &[PathBuf]) {
        for path in paths {
            if let Err(err) = fs::remove_file(path) {
                warn!("could not remove orphaned upload {}: {}", path.display(), err);
            }
        }
        let _ = fs::remove_dir(self.ticket_dir(ticket_id));
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// ============================================================================
// VALIDATION
// ============================================================================

pub(crate) fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub(crate) fn extension_allowed(name: &str) -> bool {
    match extension_of(name) {
        Some(ext) => ALLOWED_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

fn check_file_size(name: &str, size: i64) -> Result<(), TicketError> {
    if size > MAX_FILE_BYTES {
        return Err(TicketError::Quota(format!(
            "{} is {} which exceeds the {} per-file limit",
            name,
            format_bytes(size as u64),
            format_bytes(MAX_FILE_BYTES as u64)
        )));
    }
    Ok(())
}

fn check_ticket_budget(existing_bytes: i64, incoming_bytes: i64) -> Result<(), TicketError> {
    if existing_bytes + incoming_bytes > MAX_TICKET_BYTES {
        return Err(TicketError::Quota(format!(
            "Ticket attachment quota exceeded: {} stored plus {} incoming is over the {} limit",
            format_bytes(existing_bytes as u64),
            format_bytes(incoming_bytes as u64),
            format_bytes(MAX_TICKET_BYTES as u64)
        )));
    }
    Ok(())
}

// Zero-byte entries are skipped here and during ingest; browsers submit
// empty file inputs.
pub(crate) fn validate_batch(
    files: &[UploadedFile],
    existing_bytes: i64,
) -> Result<(), TicketError> {
    let mut incoming: i64 = 0;
    for file in files.iter().filter(|f| !f.data.is_empty()) {
        let size = file.data.len() as i64;
        check_file_size(&file.original_name, size)?;
        if !extension_allowed(&file.original_name) {
            return Err(TicketError::Quota(format!(
                "File type not allowed: {}",
                file.original_name
            )));
        }
        incoming += size;
    }
    check_ticket_budget(existing_bytes, incoming)
}

// ============================================================================
// CONTENT SNIFFING
// ============================================================================

// Content wins over the client-declared type.
pub(crate) fn sniff_mime(data: &[u8], original_name: &str) -> String {
    for (magic, mime) in MAGIC_BYTES {
        if data.starts_with(magic) {
            return (*mime).to_string();
        }
    }

    // RIFF and ISO-BMFF containers carry their subtype at an offset.
    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        return match &data[8..12] {
            b"WEBP" => "image/webp".to_string(),
            b"WAVE" => "audio/x-wav".to_string(),
            b"AVI " => "video/x-msvideo".to_string(),
            _ => "application/octet-stream".to_string(),
        };
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4".to_string();
    }

    if let Ok(text) = std::str::from_utf8(&data[..data.len().min(512)]) {
        let head = text.trim_start().to_lowercase();
        if head.starts_with("<!doctype html") || head.starts_with("<html") {
            return "text/html".to_string();
        }
        if head.starts_with("<?xml") {
            return "text/xml".to_string();
        }
    }

    if let Some(guess) = mime_guess::from_path(original_name).first() {
        return guess.to_string();
    }

    if std::str::from_utf8(data).is_ok() {
        return "text/plain".to_string();
    }

    "application/octet-stream".to_string()
}

// The client-supplied name never reaches the filesystem.
pub(crate) fn generate_stored_name(original_name: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    match extension_of(original_name) {
        Some(ext) => format!("{}_{}.{}", now.format("%Y%m%d%H%M%S"), suffix, ext),
        None => format!("{}_{}", now.format("%Y%m%d%H%M%S"), suffix),
    }
}

// ============================================================================
// INGEST
// ============================================================================

// Writes every upload in the batch before the first descriptor row is
// inserted. A failed write discards what was already staged.
fn stage_batch(
    store: &AttachmentStore,
    ticket_id: Uuid,
    batch: &[(&UploadedFile, String)],
) -> Result<Vec<PathBuf>, TicketError> {
    let mut staged = Vec::new();
    for (file, stored_name) in batch {
        match store.persist(ticket_id, stored_name, &file.data) {
            Ok(path) => staged.push(path),
            Err(err) => {
                store.discard(ticket_id, &staged);
                return Err(err.into());
            }
        }
    }
    Ok(staged)
}

pub(crate) fn ingest_batch(
    conn: &mut PgConnection,
    store: &AttachmentStore,
    ticket_id: Uuid,
    uploaded_by: Uuid,
    files: &[UploadedFile],
    existing_bytes: i64,
    now: DateTime<Utc>,
) -> Result<Vec<AttachmentRecord>, TicketError> {
    validate_batch(files, existing_bytes)?;

    let batch: Vec<(&UploadedFile, String)> = files
        .iter()
        .filter(|file| !file.data.is_empty())
        .map(|file| (file, generate_stored_name(&file.original_name, now)))
        .collect();
    let staged = stage_batch(store, ticket_id, &batch)?;

    // Staged bytes come back off disk unless every descriptor row lands;
    // the rows themselves roll back with the enclosing transaction.
    let guard = scopeguard::guard(staged, |paths| store.discard(ticket_id, &paths));

    let mut records = Vec::new();
    for (file, stored_name) in &batch {
        let mime_type = sniff_mime(&file.data, &file.original_name);
        if let Some(declared) = &file.declared_mime {
            if declared != &mime_type {
                debug!(
                    "{}: declared type {} but content sniffs as {}",
                    file.original_name, declared, mime_type
                );
            }
        }

        let record = AttachmentRecord {
            id: Uuid::new_v4(),
            ticket_id,
            original_name: file.original_name.clone(),
            stored_name: stored_name.clone(),
            storage_path: format!("tickets/{}/{}", ticket_id, stored_name),
            mime_type,
            byte_size: file.data.len() as i64,
            uploaded_by,
            uploaded_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        diesel::insert_into(ticket_attachments::table)
            .values(&record)
            .execute(conn)?;
        records.push(record);
    }

    scopeguard::ScopeGuard::into_inner(guard);
    Ok(records)
}

pub(crate) fn live_bytes(conn: &mut PgConnection, ticket_id: Uuid) -> QueryResult<i64> {
    let sizes: Vec<i64> = ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket_id))
        .filter(ticket_attachments::is_deleted.eq(false))
        .select(ticket_attachments::byte_size)
        .load(conn)?;
    Ok(sizes.into_iter().sum())
}

// Every id must name a live attachment of this ticket; cross-ticket ids
// are rejected. The bytes stay behind for recovery tooling.
pub(crate) fn soft_delete(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<Vec<AttachmentRecord>, TicketError> {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if unique.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<AttachmentRecord> = ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket_id))
        .filter(ticket_attachments::id.eq_any(&unique))
        .filter(ticket_attachments::is_deleted.eq(false))
        .load(conn)?;
    if rows.len() != unique.len() {
        return Err(TicketError::NotFound(
            "One or more attachments were not found on this ticket".to_string(),
        ));
    }

    diesel::update(ticket_attachments::table.filter(ticket_attachments::id.eq_any(&unique)))
        .set((
            ticket_attachments::is_deleted.eq(true),
            ticket_attachments::deleted_at.eq(Some(now)),
        ))
        .execute(conn)?;
    Ok(rows)
}

pub(crate) fn soft_delete_all(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(
        ticket_attachments::table
            .filter(ticket_attachments::ticket_id.eq(ticket_id))
            .filter(ticket_attachments::is_deleted.eq(false)),
    )
    .set((
        ticket_attachments::is_deleted.eq(true),
        ticket_attachments::deleted_at.eq(Some(now)),
    ))
    .execute(conn)
}

// ============================================================================
// OPERATIONS
// ============================================================================

pub(crate) fn add_attachments_tx(
    conn: &mut PgConnection,
    store: &AttachmentStore,
    actor: &Actor,
    ticket_id: Uuid,
    files: &[UploadedFile],
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot modify tickets".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;
    let existing = live_bytes(conn, ticket_id)?;
    let records = ingest_batch(conn, store, ticket_id, actor.staff_id, files, existing, now)?;
    if records.is_empty() {
        return Ok(Vec::new());
    }

    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::updated_at.eq(now))
        .execute(conn)?;

    Ok(records
        .iter()
        .map(|record| {
            AuditEvent::new(
                ticket.id,
                Some(actor.staff_id),
                AuditAction::AttachmentAdded,
                format!(
                    "Attached {} ({}, {})",
                    record.original_name,
                    record.mime_type,
                    format_bytes(record.byte_size as u64)
                ),
            )
        })
        .collect())
}

pub(crate) fn remove_attachment_tx(
    conn: &mut PgConnection,
    actor: &Actor,
    ticket_id: Uuid,
    attachment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>, TicketError> {
    if !actor.role.can_edit_tickets() {
        return Err(TicketError::Permission(
            "Your role cannot modify tickets".to_string(),
        ));
    }

    let ticket = lock_ticket(conn, ticket_id)?;
    let removed = soft_delete(conn, ticket_id, &[attachment_id], now)?;

    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::updated_at.eq(now))
        .execute(conn)?;

    Ok(removed
        .iter()
        .map(|record| {
            AuditEvent::new(
                ticket.id,
                Some(actor.staff_id),
                AuditAction::AttachmentRemoved,
                format!("Removed attachment {}", record.original_name),
            )
        })
        .collect())
}
