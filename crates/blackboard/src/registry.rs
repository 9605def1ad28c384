// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interface registry ("BlackBoard").
//!
//! # Architecture
//!
//! ```text
//! BlackBoard (cheap Clone, shared by every component)
//! +-- entries: Mutex<BTreeMap<(type, id), Entry>>
//! |     Entry
//! |     +-- hash: SchemaHash
//! |     +-- writer: Option<(handle, owner)>
//! |     +-- readers: Vec<(handle, owner)>
//! |     +-- storage: Arc<SharedInterface<S>>  (type-erased)
//! +-- notifier: Arc<ChangeNotifier>
//! +-- observers: RwLock<Vec<Arc<dyn RegistryObserver>>>
//! ```
//!
//! Every open and close is a single critical section on `entries`, so
//! `list_all()` never sees an entry that is half registered. Observer
//! callbacks are collected inside the critical section and dispatched after
//! the lock is released; observers may call back into the registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::config::BlackBoardConfig;
use crate::error::{Error, Result};
use crate::interface::{ErasedShared, Interface, OpenMode, Schema, SchemaHash, SharedInterface};
use crate::notifier::ChangeNotifier;
use crate::util::glob_match;

// ============================================================================
// Introspection types
// ============================================================================

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub type_name: String,
    pub id: String,
    pub hash: SchemaHash,
    /// Owner of the writer handle, if one is open.
    pub writer: Option<String>,
    /// Owners of the open reader handles, in open order.
    pub readers: Vec<String>,
    /// Publish counter of the shared record.
    pub serial: u64,
    pub timestamp: Option<SystemTime>,
}

impl InterfaceInfo {
    /// `"Type::id"`.
    pub fn uid(&self) -> String {
        format!("{}::{}", self.type_name, self.id)
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    pub fn num_readers(&self) -> usize {
        self.readers.len()
    }

    fn touches(&self, owner: &str) -> bool {
        self.writer.as_deref() == Some(owner) || self.readers.iter().any(|r| r == owner)
    }
}

/// Callbacks on registry changes. All methods default to no-ops.
///
/// Called after the registry lock has been released, on the thread that
/// opened or closed the handle.
pub trait RegistryObserver: Send + Sync {
    fn interface_created(&self, _type_name: &str, _id: &str) {}
    fn interface_destroyed(&self, _type_name: &str, _id: &str) {}
    fn writer_added(&self, _type_name: &str, _id: &str, _owner: &str) {}
    fn writer_removed(&self, _type_name: &str, _id: &str, _owner: &str) {}
    fn reader_added(&self, _type_name: &str, _id: &str, _owner: &str) {}
    fn reader_removed(&self, _type_name: &str, _id: &str, _owner: &str) {}
}

enum Event {
    Created,
    Destroyed,
    WriterAdded(String),
    WriterRemoved(String),
    ReaderAdded(String),
    ReaderRemoved(String),
}

// ============================================================================
// Registry
// ============================================================================

struct Entry {
    hash: SchemaHash,
    writer: Option<(u64, String)>,
    readers: Vec<(u64, String)>,
    storage: Arc<dyn ErasedShared>,
}

impl Entry {
    fn refcount(&self) -> usize {
        usize::from(self.writer.is_some()) + self.readers.len()
    }

    fn info(&self, type_name: &str, id: &str) -> InterfaceInfo {
        InterfaceInfo {
            type_name: type_name.to_string(),
            id: id.to_string(),
            hash: self.hash,
            writer: self.writer.as_ref().map(|(_, owner)| owner.clone()),
            readers: self.readers.iter().map(|(_, owner)| owner.clone()).collect(),
            serial: self.storage.serial(),
            timestamp: self.storage.timestamp(),
        }
    }
}

type Key = (String, String);

struct RegistryInner {
    config: BlackBoardConfig,
    entries: Mutex<BTreeMap<Key, Entry>>,
    notifier: Arc<ChangeNotifier>,
    next_handle: AtomicU64,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
}

/// Process-wide directory of open interfaces.
///
/// Cloning is cheap; all clones refer to the same registry.
#[derive(Clone)]
pub struct BlackBoard {
    inner: Arc<RegistryInner>,
}

impl BlackBoard {
    pub fn new() -> Self {
        Self::with_config(BlackBoardConfig::default())
    }

    pub fn with_config(config: BlackBoardConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(BTreeMap::new()),
                notifier: Arc::new(ChangeNotifier::new()),
                next_handle: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BlackBoardConfig {
        &self.inner.config
    }

    /// Change notification bumped by every `write()`.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.inner.notifier
    }

    // ========================================================================
    // Open / close
    // ========================================================================

    /// Open a reader handle, creating the instance if needed.
    pub fn open_for_reading<S: Schema>(&self, id: &str, owner: &str) -> Result<Interface<S>> {
        self.open(OpenMode::Read, id, owner)
    }

    /// Open the writer handle, creating the instance if needed.
    ///
    /// # Errors
    ///
    /// [`Error::WriterExists`] if a writer is already open. The request is
    /// never downgraded to a reader.
    pub fn open_for_writing<S: Schema>(&self, id: &str, owner: &str) -> Result<Interface<S>> {
        self.open(OpenMode::Write, id, owner)
    }

    /// Open a handle in `mode`. An empty `owner` selects the configured
    /// default owner.
    ///
    /// # Errors
    ///
    /// - [`Error::WriterExists`] for a second writer
    /// - [`Error::HashMismatch`] if the existing instance has another layout
    /// - [`Error::TypeMismatch`] if the instance was created by another Rust
    ///   type with the same name and layout
    /// - [`Error::ResourceLimitExceeded`] if creating it exceeds `max_interfaces`
    pub fn open<S: Schema>(&self, mode: OpenMode, id: &str, owner: &str) -> Result<Interface<S>> {
        let owner = if owner.is_empty() {
            self.inner.config.default_owner.clone()
        } else {
            owner.to_string()
        };
        let handle_id = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut events = Vec::with_capacity(2);

        let shared = {
            let mut entries = self.inner.entries.lock();
            let key = (S::TYPE_NAME.to_string(), id.to_string());

            let shared = match entries.get(&key) {
                Some(entry) => {
                    if entry.hash != S::hash() {
                        return Err(Error::HashMismatch {
                            type_name: S::TYPE_NAME.to_string(),
                            id: id.to_string(),
                        });
                    }
                    if mode == OpenMode::Write && entry.writer.is_some() {
                        return Err(Error::WriterExists {
                            type_name: S::TYPE_NAME.to_string(),
                            id: id.to_string(),
                        });
                    }
                    Arc::clone(&entry.storage)
                        .into_any()
                        .downcast::<SharedInterface<S>>()
                        .map_err(|_| Error::TypeMismatch {
                            expected: S::TYPE_NAME.to_string(),
                            found: entry.storage.type_name().to_string(),
                        })?
                }
                None => {
                    let max = self.inner.config.max_interfaces;
                    if max > 0 && entries.len() >= max {
                        return Err(Error::ResourceLimitExceeded(format!(
                            "cannot create {}::{}, {} interfaces open",
                            S::TYPE_NAME,
                            id,
                            entries.len()
                        )));
                    }
                    let shared = Arc::new(SharedInterface::<S>::new());
                    entries.insert(
                        key.clone(),
                        Entry {
                            hash: S::hash(),
                            writer: None,
                            readers: Vec::new(),
                            storage: shared.clone(),
                        },
                    );
                    events.push(Event::Created);
                    shared
                }
            };

            // Key is present: found above or inserted in the None arm.
            if let Some(entry) = entries.get_mut(&key) {
                match mode {
                    OpenMode::Write => {
                        entry.writer = Some((handle_id, owner.clone()));
                        entry.storage.attach_writer();
                        events.push(Event::WriterAdded(owner.clone()));
                    }
                    OpenMode::Read => {
                        entry.readers.push((handle_id, owner.clone()));
                        events.push(Event::ReaderAdded(owner.clone()));
                    }
                }
            }
            shared
        };

        log::debug!(
            "[blackboard] {} opened {}::{} as {} (handle {})",
            owner,
            S::TYPE_NAME,
            id,
            mode,
            handle_id
        );
        self.dispatch(S::TYPE_NAME, id, events);

        Ok(Interface::new(
            shared,
            self.clone(),
            handle_id,
            mode,
            owner,
            id.to_string(),
        ))
    }

    /// Open a reader on every existing instance of `S` whose id matches the
    /// shell-style `id_pattern`.
    pub fn open_multiple_for_reading<S: Schema>(
        &self,
        id_pattern: &str,
        owner: &str,
    ) -> Result<Vec<Interface<S>>> {
        let ids: Vec<String> = {
            let entries = self.inner.entries.lock();
            entries
                .keys()
                .filter(|(type_name, id)| type_name == S::TYPE_NAME && glob_match(id_pattern, id))
                .map(|(_, id)| id.clone())
                .collect()
        };
        ids.iter()
            .map(|id| self.open_for_reading::<S>(id, owner))
            .collect()
    }

    /// Drop the bookkeeping of one handle; called by `Interface::close`/drop.
    pub(crate) fn release(&self, type_name: &str, id: &str, handle_id: u64) {
        let mut events = Vec::with_capacity(2);
        {
            let mut entries = self.inner.entries.lock();
            let key = (type_name.to_string(), id.to_string());
            let Some(entry) = entries.get_mut(&key) else {
                log::warn!(
                    "[blackboard] release of unknown interface {}::{}",
                    type_name,
                    id
                );
                return;
            };

            if entry.writer.as_ref().is_some_and(|(h, _)| *h == handle_id) {
                if let Some((_, owner)) = entry.writer.take() {
                    let dropped = entry.storage.detach_writer();
                    if dropped > 0 {
                        log::debug!(
                            "[blackboard] writer of {}::{} closed, dropped {} pending message(s)",
                            type_name,
                            id,
                            dropped
                        );
                    }
                    events.push(Event::WriterRemoved(owner));
                }
            } else if let Some(pos) = entry.readers.iter().position(|(h, _)| *h == handle_id) {
                let (_, owner) = entry.readers.remove(pos);
                events.push(Event::ReaderRemoved(owner));
            }

            if entry.refcount() == 0 {
                entries.remove(&key);
                events.push(Event::Destroyed);
            }
        }
        log::debug!(
            "[blackboard] closed handle {} of {}::{}",
            handle_id,
            type_name,
            id
        );
        self.dispatch(type_name, id, events);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Snapshot of every entry, sorted by type then id.
    pub fn list_all(&self) -> Vec<InterfaceInfo> {
        let entries = self.inner.entries.lock();
        entries
            .iter()
            .map(|((type_name, id), entry)| entry.info(type_name, id))
            .collect()
    }

    /// Entries whose type and id match the shell-style patterns.
    pub fn list(&self, type_pattern: &str, id_pattern: &str) -> Vec<InterfaceInfo> {
        let entries = self.inner.entries.lock();
        entries
            .iter()
            .filter(|((type_name, id), _)| glob_match(type_pattern, type_name) && glob_match(id_pattern, id))
            .map(|((type_name, id), entry)| entry.info(type_name, id))
            .collect()
    }

    /// Snapshot of one entry.
    pub fn info(&self, type_name: &str, id: &str) -> Option<InterfaceInfo> {
        let entries = self.inner.entries.lock();
        entries
            .get(&(type_name.to_string(), id.to_string()))
            .map(|entry| entry.info(type_name, id))
    }

    pub fn exists(&self, type_name: &str, id: &str) -> bool {
        self.inner
            .entries
            .lock()
            .contains_key(&(type_name.to_string(), id.to_string()))
    }

    pub fn num_interfaces(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Graphviz rendering of interfaces and the owners reading or writing them.
    ///
    /// With `for_owner`, only interfaces that owner reads or writes are shown.
    /// Interfaces without a writer are drawn red, writer edges green, reader
    /// edges dashed.
    pub fn graph(&self, for_owner: Option<&str>) -> String {
        let infos: Vec<InterfaceInfo> = self
            .list_all()
            .into_iter()
            .filter(|info| for_owner.map_or(true, |owner| info.touches(owner)))
            .collect();

        let mut owners = BTreeSet::new();
        for info in &infos {
            owners.extend(info.writer.iter().filter(|w| !w.is_empty()).cloned());
            owners.extend(info.readers.iter().cloned());
        }

        let mut dot = String::new();
        // Writing to a String cannot fail.
        let _ = render_dot(&mut dot, &infos, &owners);
        dot
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn register_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.inner.observers.write().push(observer);
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn RegistryObserver>) {
        self.inner
            .observers
            .write()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    fn dispatch(&self, type_name: &str, id: &str, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn RegistryObserver>> = self.inner.observers.read().clone();
        for event in &events {
            for o in &observers {
                match event {
                    Event::Created => o.interface_created(type_name, id),
                    Event::Destroyed => o.interface_destroyed(type_name, id),
                    Event::WriterAdded(owner) => o.writer_added(type_name, id, owner),
                    Event::WriterRemoved(owner) => o.writer_removed(type_name, id, owner),
                    Event::ReaderAdded(owner) => o.reader_added(type_name, id, owner),
                    Event::ReaderRemoved(owner) => o.reader_removed(type_name, id, owner),
                }
            }
        }
    }
}

impl Default for BlackBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlackBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlackBoard")
            .field("interfaces", &self.num_interfaces())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn render_dot(out: &mut String, infos: &[InterfaceInfo], owners: &BTreeSet<String>) -> fmt::Result {
    writeln!(out, "digraph bbmap {{")?;
    writeln!(out, "  graph [fontsize=12,rankdir=LR];")?;
    writeln!(out, "  node [fontsize=12 shape=box width=4 margin=0.05];")?;
    writeln!(out, "  {{ rank=same;")?;
    for info in infos {
        let color = match info.writer.as_deref() {
            None => " [color=red]",
            Some("") => " [color=purple]",
            Some(_) => "",
        };
        writeln!(out, "    \"{}\"{};", info.uid(), color)?;
    }
    writeln!(out, "  }}")?;

    writeln!(out, "  node [fontsize=12 shape=octagon width=3];")?;
    for owner in owners {
        writeln!(out, "  \"{}\";", owner)?;
    }

    for info in infos {
        if !info.readers.is_empty() {
            let readers: Vec<String> = info.readers.iter().map(|r| format!("\"{}\"", r)).collect();
            writeln!(
                out,
                "  \"{}\" -> {{ {} }} [style=dashed arrowhead=dot arrowsize=0.5 dir=both];",
                info.uid(),
                readers.join(" ")
            )?;
        }
        match info.writer.as_deref() {
            Some("") => writeln!(out, "  \"???\" -> \"{}\" [color=purple];", info.uid())?,
            Some(writer) => writeln!(
                out,
                "  \"{}\" -> \"{}\" [color=\"#008800\"];",
                writer,
                info.uid()
            )?,
            None => {}
        }
    }
    writeln!(out, "}}")
}
