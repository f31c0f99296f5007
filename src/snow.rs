//! Ticketing-platform client: tickets, attachment manifests and downloads.

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::config::SnowConfig;
use crate::error::SnowError;
use crate::types::{AttachmentRef, Region, StoredAttachment, Ticket};

const API_KEY_HEADER: &str = "x-api-key";

/// Per-ticket run artifacts written next to the attachments.
pub const TICKET_LOG_FILE: &str = "log.txt";
pub const TICKET_ENTITIES_FILE: &str = "extracted_entities.txt";
const RESERVED_NAMES: [&str; 2] = [TICKET_LOG_FILE, TICKET_ENTITIES_FILE];

/// Filesystem-safe name: NFKD-normalized, every character outside
/// `[A-Za-z0-9_.-]` replaced by `_`, trailing dots and spaces removed.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .nfkd()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_end_matches([' ', '.']).to_string()
}

/// `name`, or `stem_N.ext` with the smallest free `N` when `name` is already
/// present in `dir` or is one of the run artifact names.
fn unique_name(dir: &Path, name: &str) -> String {
    let taken = |candidate: &str| RESERVED_NAMES.contains(&candidate) || dir.join(candidate).exists();
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Keep tickets whose region field is one of `regions`.
pub fn filter_by_region(tickets: Vec<Ticket>, regions: &[Region]) -> Vec<Ticket> {
    tickets
        .into_iter()
        .filter(|t| regions.iter().any(|r| r.field_value() == t.region))
        .collect()
}

pub trait TicketSource {
    /// Tickets created in `[start, end)`, dates as `YYYY-MM-DD`.
    fn fetch_tickets(&self, start: &str, end: &str) -> Result<Vec<Ticket>, SnowError>;
    fn fetch_attachment_manifest(&self, ticket_sys_id: &str)
        -> Result<Vec<AttachmentRef>, SnowError>;
    fn fetch_attachment_bytes(&self, attachment_id: &str) -> Result<Vec<u8>, SnowError>;

    /// Download into `dir` under the sanitized file name, suffixed when
    /// that name is already taken.
    fn download_attachment(
        &self,
        attachment: &AttachmentRef,
        dir: &Path,
    ) -> Result<StoredAttachment, SnowError> {
        let bytes = self.fetch_attachment_bytes(&attachment.id)?;
        let mut name = sanitize_filename(&attachment.file_name);
        if name.is_empty() {
            name = sanitize_filename(&attachment.id);
        }
        let name = unique_name(dir, &name);
        let path = dir.join(&name);
        fs::write(&path, &bytes).map_err(|source| SnowError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(attachment = %name, bytes = bytes.len(), "attachment stored");
        Ok(StoredAttachment { name, path })
    }
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

pub struct SnowClient {
    client: Client,
    base_url: String,
    api_key: String,
    ticket_table: String,
}

impl SnowClient {
    pub fn new(config: &SnowConfig, timeout: Duration) -> Result<Self, SnowError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            ticket_table: config.ticket_table.clone(),
        })
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response, SnowError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SnowError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn get_result<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SnowError> {
        let envelope: ResultEnvelope<T> = self.get(url, query)?.json()?;
        Ok(envelope.result)
    }
}

impl TicketSource for SnowClient {
    fn fetch_tickets(&self, start: &str, end: &str) -> Result<Vec<Ticket>, SnowError> {
        let url = format!("{}/api/now/table/{}", self.base_url, self.ticket_table);
        let query = format!("sys_created_on>={start}^sys_created_on<{end}");
        let tickets: Vec<Ticket> = self.get_result(&url, &[("sysparm_query", query)])?;
        info!(count = tickets.len(), start, end, "tickets fetched");
        Ok(tickets)
    }

    fn fetch_attachment_manifest(
        &self,
        ticket_sys_id: &str,
    ) -> Result<Vec<AttachmentRef>, SnowError> {
        let url = format!("{}/api/now/attachment", self.base_url);
        let query = format!("table_sys_id={ticket_sys_id}");
        self.get_result(&url, &[("sysparm_query", query)])
    }

    fn fetch_attachment_bytes(&self, attachment_id: &str) -> Result<Vec<u8>, SnowError> {
        let url = format!("{}/api/now/attachment/{}/file", self.base_url, attachment_id);
        Ok(self.get(&url, &[])?.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(number: &str, region: &str) -> Ticket {
        serde_json::from_value(serde_json::json!({
            "number": number,
            "sys_id": format!("sys-{number}"),
            "u_region": region,
        }))
        .unwrap()
    }

    #[test]
    fn sanitize_replaces_and_trims() {
        assert_eq!(sanitize_filename("Faktura nr 7 (kopia).pdf"), "Faktura_nr_7__kopia_.pdf");
        assert_eq!(sanitize_filename("a/b\\c:d*e?.txt"), "a_b_c_d_e_.txt");
        assert_eq!(sanitize_filename("report.."), "report");
        assert_eq!(sanitize_filename("report. . "), "report._._");
        assert_eq!(sanitize_filename("ﬁle.png"), "file.png");
        assert_eq!(sanitize_filename("résumé.docx"), "re_sume_.docx");
    }

    #[test]
    fn sanitize_is_idempotent_and_restricted() {
        let inputs = [
            "Счёт-фактура №12.pdf",
            "請求書 2024.xlsx",
            "  spaced name .. ",
            "plain.txt",
            "",
            "...",
            "ünïcödé – dash.csv",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once, "input {input:?}");
            assert!(once
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')));
            assert!(!once.ends_with('.') && !once.ends_with(' '));
        }
    }

    #[test]
    fn region_filter_keeps_matching_tickets() {
        let tickets = vec![
            ticket("CS1", Region::Emea.field_value()),
            ticket("CS2", Region::Apac.field_value()),
            ticket("CS3", "Unassigned"),
            ticket("CS4", Region::Americas.field_value()),
        ];
        let kept = filter_by_region(tickets, &[Region::Emea, Region::Americas]);
        let numbers: Vec<&str> = kept.iter().map(|t| t.number.as_str()).collect();
        assert_eq!(numbers, vec!["CS1", "CS4"]);
    }

    struct StaticSource;

    impl TicketSource for StaticSource {
        fn fetch_tickets(&self, _: &str, _: &str) -> Result<Vec<Ticket>, SnowError> {
            Ok(Vec::new())
        }
        fn fetch_attachment_manifest(&self, _: &str) -> Result<Vec<AttachmentRef>, SnowError> {
            Ok(Vec::new())
        }
        fn fetch_attachment_bytes(&self, id: &str) -> Result<Vec<u8>, SnowError> {
            Ok(format!("payload of {id}").into_bytes())
        }
    }

    #[test]
    fn download_writes_under_sanitized_name() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StaticSource
            .download_attachment(
                &AttachmentRef {
                    id: "att1".into(),
                    file_name: "Ödeme bildirimi.pdf".into(),
                },
                dir.path(),
            )
            .unwrap();
        assert_eq!(stored.name, "O_deme_bildirimi.pdf");
        assert_eq!(fs::read_to_string(&stored.path).unwrap(), "payload of att1");
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let download = |id: &str, file_name: &str| {
            StaticSource
                .download_attachment(
                    &AttachmentRef {
                        id: id.into(),
                        file_name: file_name.into(),
                    },
                    dir.path(),
                )
                .unwrap()
        };
        let first = download("a1", "a b.pdf");
        let second = download("a2", "a_b.pdf");
        let third = download("a3", "a b.pdf");
        assert_eq!(first.name, "a_b.pdf");
        assert_eq!(second.name, "a_b_1.pdf");
        assert_eq!(third.name, "a_b_2.pdf");
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "payload of a1");
        assert_eq!(fs::read_to_string(&second.path).unwrap(), "payload of a2");

        assert_eq!(download("a4", "log.txt").name, "log_1.txt");
        assert_eq!(download("a5", "extracted_entities.txt").name, "extracted_entities_1.txt");
        assert_eq!(download("a6", "README").name, "README");
        assert_eq!(download("a7", "README").name, "README_1");
        assert!(!dir.path().join(TICKET_LOG_FILE).exists());
    }

    #[test]
    fn empty_sanitized_name_falls_back_to_id() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StaticSource
            .download_attachment(
                &AttachmentRef {
                    id: "att2".into(),
                    file_name: "...".into(),
                },
                dir.path(),
            )
            .unwrap();
        assert_eq!(stored.name, "att2");
    }
}
