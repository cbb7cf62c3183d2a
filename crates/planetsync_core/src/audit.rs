use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use serde::Serialize;

use crate::classify::{Category, ReconciliationOutcome, RemoteLookup, classify};
use crate::config::{DEFAULT_EDIT_SUMMARY, ToolConfig};
use crate::diff::render_diff;
use crate::error::PlanetError;
use crate::markup::patch_coordinates;
use crate::records::SystemRecord;
use crate::remote::{DEFAULT_MAX_REDIRECTS, DocumentStore, resolve_document};
use crate::report::ReportWriter;

#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Records in flight against the store at once.
    pub concurrency: usize,
    /// Save auto-fixable corrections; otherwise only preview them.
    pub apply: bool,
    pub summary: String,
    pub max_redirects: usize,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            apply: false,
            summary: DEFAULT_EDIT_SUMMARY.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl AuditOptions {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            concurrency: config.audit.concurrency.max(1),
            apply: false,
            summary: config.audit.summary.clone(),
            max_redirects: config.wiki.max_redirects,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    pub written: usize,
    pub fixed: usize,
    pub categories: BTreeMap<Category, usize>,
}

impl AuditSummary {
    pub fn count(&self, category: Category) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    fn record(&mut self, audited: &AuditedRecord) {
        self.written += 1;
        if audited.fixed {
            self.fixed += 1;
        }
        *self.categories.entry(audited.outcome.category).or_default() += 1;
    }
}

#[derive(Debug, Clone)]
pub struct AuditedRecord {
    pub outcome: ReconciliationOutcome,
    pub fixed: bool,
}

/// Classify one record against its article, correcting auto-fixable coordinates
/// when `options.apply` is set. A redirect rewrites the reported remote id.
pub fn audit_record<S: DocumentStore + ?Sized>(
    store: &S,
    record: &SystemRecord,
    options: &AuditOptions,
) -> std::result::Result<AuditedRecord, PlanetError> {
    let unfixed = |outcome: ReconciliationOutcome| AuditedRecord {
        outcome,
        fixed: false,
    };

    let Some(id) = record.sarna_id.as_deref() else {
        return Ok(unfixed(classify(record, "", RemoteLookup::Unlinked)));
    };
    if id.is_empty() {
        return Ok(unfixed(classify(record, id, RemoteLookup::Missing)));
    }

    log::info!("Checking {} : {}...", record.name, id);
    let Some(document) = resolve_document(store, id, options.max_redirects)? else {
        log::warn!("{}: missing article {id}", record.name);
        return Ok(unfixed(classify(record, id, RemoteLookup::Missing)));
    };

    let outcome = classify(record, &document.id, RemoteLookup::Document(&document.body));
    if !outcome.category.is_auto_fixable() {
        if outcome.category == Category::MismatchedCoordinates {
            log::warn!(
                "{}: coordinates differ by {:.3}",
                record.name,
                outcome.distance.unwrap_or(f64::NAN)
            );
        }
        return Ok(unfixed(outcome));
    }

    log::info!("\tFixing {}", outcome.category);
    let source = record.coordinates()?;
    let Some(updated) = patch_coordinates(&document.body, source) else {
        return Ok(unfixed(outcome));
    };
    if !options.apply {
        log::info!("{}", render_diff(&document.id, &document.body, &updated));
        return Ok(unfixed(outcome));
    }
    store
        .save(&document.id, &updated, &options.summary)
        .map_err(|error| PlanetError::remote(format!("failed to save {}", document.id), error))?;
    Ok(AuditedRecord {
        outcome,
        fixed: true,
    })
}

/// Audit `records` with up to `options.concurrency` workers, writing one report
/// row per record in input order. The first batch-level error stops dispatch;
/// rows written before it stay flushed.
pub fn run_audit<S: DocumentStore + ?Sized, W: Write>(
    store: &S,
    records: &[SystemRecord],
    options: &AuditOptions,
    report: &mut ReportWriter<W>,
) -> Result<AuditSummary> {
    let workers = options.concurrency.max(1).min(records.len().max(1));
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let (sender, receiver) = mpsc::channel();

    let (summary, failure) = thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let next = &next;
            let abort = &abort;
            scope.spawn(move || {
                while !abort.load(Ordering::SeqCst) {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(record) = records.get(index) else {
                        break;
                    };
                    let result = audit_record(store, record, options);
                    if result.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    if sender.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(sender);

        let mut summary = AuditSummary::default();
        let mut pending = BTreeMap::new();
        let mut failure: Option<(usize, anyhow::Error)> = None;
        for (index, result) in receiver {
            match result {
                Ok(audited) => {
                    pending.insert(index, audited);
                }
                Err(error) => {
                    abort.store(true, Ordering::SeqCst);
                    log::error!("{}: {error}", records[index].name);
                    // keep the error at the earliest record; a failed write sits at
                    // `summary.written`, so later records never displace it
                    if failure.as_ref().is_none_or(|(failed, _)| index < *failed) {
                        failure = Some((index, error.into()));
                    }
                }
            }
            // a failed index leaves a gap, so nothing after it is written
            while let Some(audited) = pending.remove(&summary.written) {
                if let Err(error) = report.write(&audited.outcome) {
                    abort.store(true, Ordering::SeqCst);
                    failure = Some((summary.written, error));
                    pending.clear();
                    break;
                }
                summary.record(&audited);
            }
        }
        (summary, failure)
    });

    match failure {
        Some((_, error)) => Err(error),
        None => Ok(summary),
    }
}
