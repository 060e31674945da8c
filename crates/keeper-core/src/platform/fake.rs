//! In-memory platform for tests. Records every call.

use super::{DeploymentEntry, Platform, PlatformError, PlatformResult, HEAD};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::Path;

pub(crate) const HEAD_ID: &str = "AKfycbHEAD0000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Push,
    Create(String),
    Update(String, String),
    List,
    Delete(String),
    Versions,
}

#[derive(Debug, Default)]
pub(crate) struct FakePlatform {
    pub listing: RefCell<Vec<DeploymentEntry>>,
    pub calls: RefCell<Vec<Call>>,
    /// Contents of `capture_file` at each push.
    pub pushed_files: RefCell<Vec<String>>,
    pub capture_file: Option<String>,
    pub failing_updates: RefCell<HashSet<String>>,
    pub failing_deletes: RefCell<HashSet<String>>,
    pub fail_push: Cell<bool>,
    pub fail_create: Cell<bool>,
    pub fail_list: Cell<bool>,
    pub quota_on_update: Cell<bool>,
    pub quota_on_create: Cell<bool>,
    pub versions: Cell<u32>,
    next_id: Cell<u32>,
}

impl FakePlatform {
    /// A project whose listing holds only the `HEAD` pseudo-record.
    pub(crate) fn new() -> Self {
        let fake = Self::default();
        fake.listing.borrow_mut().push(DeploymentEntry {
            id: HEAD_ID.to_string(),
            version: HEAD.to_string(),
            description: String::new(),
        });
        fake
    }

    pub(crate) fn with_record(self, id: &str, description: &str) -> Self {
        self.add_record(id, description);
        self
    }

    pub(crate) fn capturing(mut self, file: &str) -> Self {
        self.capture_file = Some(file.to_string());
        self
    }

    pub(crate) fn add_record(&self, id: &str, description: &str) {
        let version = self.listing.borrow().len().to_string();
        self.listing.borrow_mut().push(DeploymentEntry {
            id: id.to_string(),
            version,
            description: description.to_string(),
        });
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.listing.borrow().iter().map(|e| e.id.clone()).collect()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn created_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn failed(what: &str) -> PlatformError {
        PlatformError::CommandFailed {
            command: format!("fake {what}"),
            output: "simulated failure".to_string(),
        }
    }

    fn quota() -> PlatformError {
        PlatformError::QuotaExceeded(
            "Scripts may only have up to 20 versioned deployments at a time.".to_string(),
        )
    }
}

impl Platform for FakePlatform {
    fn push(&self, root: &Path) -> PlatformResult<()> {
        self.record(Call::Push);
        if let Some(file) = &self.capture_file {
            let text = std::fs::read_to_string(root.join(file)).unwrap_or_default();
            self.pushed_files.borrow_mut().push(text);
        }
        if self.fail_push.get() {
            return Err(Self::failed("push"));
        }
        Ok(())
    }

    fn create(&self, description: &str) -> PlatformResult<String> {
        self.record(Call::Create(description.to_string()));
        if self.quota_on_create.get() {
            return Err(Self::quota());
        }
        if self.fail_create.get() {
            return Err(Self::failed("create"));
        }
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = format!("AKfycbCreated{n:020}");
        self.add_record(&id, description);
        Ok(id)
    }

    fn update(&self, id: &str, description: &str) -> PlatformResult<()> {
        self.record(Call::Update(id.to_string(), description.to_string()));
        if self.quota_on_update.get() {
            return Err(Self::quota());
        }
        if self.failing_updates.borrow().contains(id) {
            return Err(Self::failed("update"));
        }
        let mut listing = self.listing.borrow_mut();
        let Some(entry) = listing.iter_mut().find(|e| e.id == id && !e.is_head()) else {
            return Err(PlatformError::CommandFailed {
                command: format!("fake update {id}"),
                output: "Requested entity was not found.".to_string(),
            });
        };
        entry.description = description.to_string();
        Ok(())
    }

    fn list(&self) -> PlatformResult<Vec<DeploymentEntry>> {
        self.record(Call::List);
        if self.fail_list.get() {
            return Err(Self::failed("list"));
        }
        Ok(self.listing.borrow().clone())
    }

    fn delete(&self, id: &str) -> PlatformResult<()> {
        self.record(Call::Delete(id.to_string()));
        if self.failing_deletes.borrow().contains(id) {
            return Err(Self::failed("delete"));
        }
        self.listing.borrow_mut().retain(|e| e.id != id);
        Ok(())
    }

    fn version_count(&self) -> PlatformResult<u32> {
        self.record(Call::Versions);
        Ok(self.versions.get())
    }

    fn console_url(&self) -> Option<String> {
        Some("https://script.google.com/home/projects/fake/edit".to_string())
    }
}
