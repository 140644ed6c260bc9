//! Periodic scan of the store that announces qualifying documents on the
//! messaging channel and records delivery.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;

use crate::domain::document::StoredDocument;
use crate::models::config::{DispatchMode, NotificationConfig};
use crate::providers::{ChannelError, MessageChannel, MessageFormat};
use crate::repository::{DocumentReader, DocumentWriter, RepositoryError};

pub const TRUNCATION_MARKER: &str = "... [truncated]";

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub recipient: String,
    pub threshold: f32,
    pub batch_limit: i64,
    pub max_message_chars: usize,
    pub mode: DispatchMode,
    pub interval: Duration,
    pub lookback: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &NotificationConfig, recipient: String) -> Self {
        Self {
            recipient,
            threshold: config.threshold,
            batch_limit: config.batch_limit,
            max_message_chars: config.max_message_chars,
            mode: config.mode,
            interval: config.interval(),
            lookback: Duration::from_secs(config.lookback_secs),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub qualifying: usize,
    pub sent: usize,
    pub failed: usize,
    pub below_threshold: usize,
    pub already_delivered: usize,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to load documents: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Channel unavailable: all {0} deliveries failed")]
    ChannelUnavailable(usize),
}

/// A notification rendered for rich and plain delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    pub html: String,
    pub plain: String,
}

#[derive(Clone, Copy)]
enum Markup {
    Html,
    Plain,
}

impl Markup {
    fn escape<'a>(self, text: &'a str) -> Cow<'a, str> {
        match self {
            Markup::Html => encode_text(text),
            Markup::Plain => Cow::Borrowed(text),
        }
    }
}

/// Message length as the channel counts it, in UTF-16 code units.
pub fn message_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Render the notification for `document`, quoting `score` as the best match.
/// Both renderings fit in `max_len`; when they would not, the title and the
/// query list are shortened and the link is kept.
pub fn format_message(
    document: &StoredDocument,
    score: f32,
    max_len: usize,
) -> NotificationMessage {
    let mut ranked: Vec<_> = document.matches.iter().collect();
    ranked.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    let mut queries: Vec<(&str, &str)> = Vec::with_capacity(ranked.len());
    for m in ranked {
        if !queries.iter().any(|(text, _)| *text == m.query_text) {
            queries.push((m.query_text.as_str(), m.category.as_str()));
        }
    }

    NotificationMessage {
        html: render(document, score, &queries, Markup::Html, max_len),
        plain: render(document, score, &queries, Markup::Plain, max_len),
    }
}

fn render(
    document: &StoredDocument,
    score: f32,
    queries: &[(&str, &str)],
    markup: Markup,
    max_len: usize,
) -> String {
    let date = if document.published_at.trim().is_empty() {
        "unknown"
    } else {
        document.published_at.as_str()
    };
    let source = markup.escape(&document.source);
    let date = markup.escape(date);

    let (head, details, footer) = match markup {
        Markup::Html => (
            "📰 <b>New Article Match!</b>\n\n<b>Title:</b> ".to_string(),
            format!(
                "\n<b>Source:</b> {source}\n\
                 <b>Date:</b> {date}\n\
                 <b>Match Score:</b> {score:.2}\n\
                 <b>Matched:</b>\n"
            ),
            format!(
                "\n🔗 <a href=\"{}\">Read more</a>",
                encode_double_quoted_attribute(&document.url)
            ),
        ),
        Markup::Plain => (
            "📰 New Article Match!\n\nTitle: ".to_string(),
            format!(
                "\nSource: {source}\n\
                 Date: {date}\n\
                 Match Score: {score:.2}\n\
                 Matched:\n"
            ),
            format!("\nRead more: {}", document.url),
        ),
    };
    let title = markup.escape(&document.title);
    let lines: Vec<String> = queries
        .iter()
        .map(|(text, category)| format!("• {} ({category})\n", markup.escape(text)))
        .collect();

    let full_len = message_len(&head)
        + message_len(&title)
        + message_len(&details)
        + lines.iter().map(|line| message_len(line)).sum::<usize>()
        + message_len(&footer);
    if full_len <= max_len {
        return [head, title.into_owned(), details, lines.concat(), footer].concat();
    }

    let marker_line = format!("{TRUNCATION_MARKER}\n");
    let fixed = message_len(&head)
        + message_len(&details)
        + message_len(&marker_line)
        + message_len(&footer);
    if fixed > max_len {
        // Not even the frame fits; a bare cut is the best left.
        let plain = render(document, score, queries, Markup::Plain, usize::MAX);
        return truncate_message(&plain, max_len);
    }

    let mut budget = max_len - fixed;
    let mut message = head;
    // Escape per character so an entity is never split.
    let mut buf = [0u8; 4];
    for ch in document.title.chars() {
        let piece = markup.escape(ch.encode_utf8(&mut buf));
        let width = message_len(&piece);
        if width > budget {
            break;
        }
        budget -= width;
        message.push_str(&piece);
    }
    message.push_str(&details);
    for line in &lines {
        let width = message_len(line);
        if width > budget {
            break;
        }
        budget -= width;
        message.push_str(line);
    }
    message.push_str(&marker_line);
    message.push_str(&footer);
    message
}

/// Cap `text` at `max_len` UTF-16 code units, marker included.
pub fn truncate_message(text: &str, max_len: usize) -> String {
    if message_len(text) <= max_len {
        return text.to_string();
    }
    let mut budget = max_len.saturating_sub(message_len(TRUNCATION_MARKER));
    let mut truncated = String::new();
    for ch in text.chars() {
        let width = ch.len_utf16();
        if width > budget {
            break;
        }
        budget -= width;
        truncated.push(ch);
    }
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

pub struct Dispatcher<R, C> {
    repo: R,
    channel: C,
    settings: DispatchSettings,
    checkpoint: NaiveDateTime,
}

impl<R, C> Dispatcher<R, C>
where
    R: DocumentReader + DocumentWriter,
    C: MessageChannel,
{
    pub fn new(repo: R, channel: C, settings: DispatchSettings) -> Self {
        let lookback = TimeDelta::from_std(settings.lookback).unwrap_or(TimeDelta::zero());
        Self {
            repo,
            channel,
            checkpoint: Utc::now().naive_utc() - lookback,
            settings,
        }
    }

    /// Start of the window the next `since_checkpoint` scan covers.
    pub fn checkpoint(&self) -> NaiveDateTime {
        self.checkpoint
    }

    /// One pass over the store. Delivery failures are counted, never raised,
    /// unless every attempted delivery failed.
    pub async fn scan(&mut self) -> Result<ScanReport, DispatchError> {
        let scan_started = Utc::now().naive_utc();
        let pending = self
            .repo
            .list_unsent_documents(self.settings.threshold, self.settings.batch_limit)?;
        let documents = match self.settings.mode {
            DispatchMode::Unsent => pending,
            DispatchMode::SinceCheckpoint => {
                let mut documents = self.repo.list_documents_in_timeframe(
                    self.checkpoint,
                    scan_started,
                    self.settings.batch_limit,
                )?;
                // Failed sends and rows committed after an earlier window closed
                // fall outside the current window but are still pending.
                let in_window: HashSet<i32> = documents.iter().map(|d| d.id).collect();
                documents.extend(pending.into_iter().filter(|d| !in_window.contains(&d.id)));
                documents
            }
        };

        let mut report = ScanReport {
            scanned: documents.len(),
            ..Default::default()
        };

        for document in documents {
            if document.delivered {
                report.already_delivered += 1;
                continue;
            }
            let Some(score) = document
                .best_score()
                .filter(|score| *score >= self.settings.threshold)
            else {
                report.below_threshold += 1;
                continue;
            };

            report.qualifying += 1;
            let message =
                format_message(&document, score, self.settings.max_message_chars);
            match self.deliver(&message).await {
                Ok(()) => {
                    report.sent += 1;
                    match self.repo.mark_document_delivered(document.id) {
                        Ok(true) => log::info!("Notified about '{}'", document.title),
                        Ok(false) => {
                            log::warn!("Document {} was already marked delivered", document.id)
                        }
                        Err(error) => log::error!(
                            "Sent '{}' but failed to mark it delivered: {error}",
                            document.title
                        ),
                    }
                }
                Err(error) => {
                    report.failed += 1;
                    log::warn!("Failed to notify about '{}': {error}", document.title);
                }
            }
        }

        self.checkpoint = self.checkpoint.max(scan_started);

        log::info!(
            "Finished notification scan: scanned={}, qualifying={}, sent={}, failed={}, below_threshold={}, already_delivered={}",
            report.scanned,
            report.qualifying,
            report.sent,
            report.failed,
            report.below_threshold,
            report.already_delivered
        );

        if report.failed > 0 && report.sent == 0 {
            return Err(DispatchError::ChannelUnavailable(report.failed));
        }
        Ok(report)
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), ChannelError> {
        let recipient = self.settings.recipient.as_str();

        match self
            .channel
            .send(recipient, &message.html, MessageFormat::Html)
            .await
        {
            Err(ChannelError::Rejected(reason)) => {
                log::warn!("Rich message rejected ({reason}), retrying as plain text");
                self.channel
                    .send(recipient, &message.plain, MessageFormat::Plain)
                    .await
            }
            other => other,
        }
    }

    /// Scan on every tick or wake-up until `shutdown` flips to `true` or its
    /// sender goes away. A scan in progress always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, wake: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Notification dispatcher started: interval={:?}, threshold={}, mode={:?}",
            self.settings.interval,
            self.settings.threshold,
            self.settings.mode
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake.notified() => log::debug!("Dispatcher woken for an immediate scan"),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(error) = self.scan().await {
                log::error!("Notification scan failed: {error}");
            }
        }

        log::info!("Notification dispatcher stopped");
    }
}
