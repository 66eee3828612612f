//! Write-back OID cache: draft handles for not-yet-persisted objects, and a
//! weak-reference LRU over objects that have been persisted or cold-loaded.
//!
//! Grounded on `PDSCache`/`_CachedOid`/`_CacheEntry`
//! (`examples/original_source/pdscache.py`): a dict of `oid -> weakref`,
//! flushed depth-first so a parent's payload always embeds its children's
//! *real* OIDs, and a throttled sweep that only walks the dict for dead
//! weakrefs once it has filled up, rather than on every insert.
//!
//! This engine runs single-threaded (one call in flight at a time, see the
//! concurrency notes in [`crate::object_store`]), so the cache uses
//! `Rc`/`Weak` rather than the teacher's `Arc`/`RwLock` — there is no
//! concurrent mutator to synchronize against.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::field::Field;
use crate::object_store::ObjectStore;
use crate::oid::Oid;

/// Default sweep throttle ratio (spec.md §4.3): once the cache has filled
/// at least once, a sweep only runs again if dead-weakref churn since the
/// last sweep exceeds this fraction of the live entry count. Overridable
/// per-[`Cache`] via [`Cache::new`]'s `sweep_threshold` parameter.
const DEFAULT_SWEEP_THRESHOLD: f64 = 0.4;

/// A field value as seen through the cache: primitives pass through
/// unchanged, and every OID-shaped reference — whether to an already
/// persisted object or to another in-flight draft — is a [`Handle`].
#[derive(Clone)]
pub enum CacheField {
    Null,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Ref(Handle),
}

struct Entry {
    type_name: Arc<str>,
    /// `None` until the entry is flushed to the store.
    oid: RefCell<Option<Oid>>,
    /// `None` for a cold-loaded reference whose fields haven't been read
    /// yet (a "shallow" handle) — materialized lazily on first [`Cache::fields`].
    fields: RefCell<Option<Vec<CacheField>>>,
}

/// A handle to an object the cache knows about, draft or persisted.
#[derive(Clone)]
pub struct Handle(Rc<Entry>);

impl Handle {
    /// The distinguished handle for [`Oid::null`] — constructed fresh each
    /// time and never registered in a cache's entry table.
    pub fn null() -> Self {
        Handle(Rc::new(Entry {
            type_name: Arc::from(""),
            oid: RefCell::new(Some(Oid::null())),
            fields: RefCell::new(Some(Vec::new())),
        }))
    }

    pub fn is_null(&self) -> bool {
        self.0.oid.borrow().as_ref().is_some_and(Oid::is_null)
    }

    pub fn type_name(&self) -> Arc<str> {
        self.0.type_name.clone()
    }

    /// The persisted OID, if this handle has been flushed (or was loaded
    /// from an already-persisted OID).
    pub fn oid(&self) -> Option<Oid> {
        self.0.oid.borrow().clone()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.oid() {
            Some(oid) => write!(f, "Handle({oid})"),
            None => write!(f, "Handle(<draft {}>)", self.0.type_name),
        }
    }
}

impl std::fmt::Debug for CacheField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheField::Null => write!(f, "null"),
            CacheField::Bool(b) => write!(f, "{b}"),
            CacheField::Int(i) => write!(f, "{i}"),
            CacheField::Bytes(b) => write!(f, "{b:?}"),
            CacheField::Ref(handle) => write!(f, "{handle:?}"),
        }
    }
}

/// Write-back cache fronting an [`ObjectStore`].
pub struct Cache {
    store: Arc<ObjectStore>,
    capacity: usize,
    /// Every entry the cache currently knows how to find by OID, held
    /// weakly: a live [`Handle`] elsewhere keeps the entry alive, but the
    /// cache itself never forces residency for already-persisted objects.
    by_oid: RefCell<HashMap<Oid, Weak<Entry>>>,
    /// Strong refs bounding how many entries stay resident purely because
    /// the cache recently touched them, oldest at the front.
    mru: RefCell<VecDeque<Rc<Entry>>>,
    /// Drafts created but not yet flushed, tracked so `flush_all` can find
    /// them even if the caller dropped every other handle.
    drafts: RefCell<Vec<Weak<Entry>>>,
    full_events_since_sweep: Cell<u64>,
    has_swept_once: Cell<bool>,
    sweep_threshold: f64,
}

impl Cache {
    pub fn new(store: Arc<ObjectStore>, capacity: usize, sweep_threshold: f64) -> Self {
        Cache {
            store,
            capacity,
            by_oid: RefCell::new(HashMap::new()),
            mru: RefCell::new(VecDeque::new()),
            drafts: RefCell::new(Vec::new()),
            full_events_since_sweep: Cell::new(0),
            has_swept_once: Cell::new(false),
            sweep_threshold,
        }
    }

    /// Create a draft object with no OID yet. Nothing is written to the
    /// store until the draft (or an ancestor referencing it) is flushed.
    pub fn create(&self, type_name: impl Into<Arc<str>>, fields: Vec<CacheField>) -> Handle {
        let entry = Rc::new(Entry {
            type_name: type_name.into(),
            oid: RefCell::new(None),
            fields: RefCell::new(Some(fields)),
        });
        self.drafts.borrow_mut().push(Rc::downgrade(&entry));
        self.touch(entry.clone());
        Handle(entry)
    }

    /// Wrap `oid` in a cache handle. Returns the cached handle if one is
    /// already live; otherwise registers a shallow handle that defers the
    /// actual record read to [`Cache::fields`].
    pub fn read(&self, oid: &Oid) -> Handle {
        if oid.is_null() {
            return Handle::null();
        }
        if let Some(existing) = self
            .by_oid
            .borrow()
            .get(oid)
            .and_then(Weak::upgrade)
        {
            self.touch(existing.clone());
            return Handle(existing);
        }
        let entry = Rc::new(Entry {
            type_name: Arc::from(oid.type_name()),
            oid: RefCell::new(Some(oid.clone())),
            fields: RefCell::new(None),
        });
        self.by_oid.borrow_mut().insert(oid.clone(), Rc::downgrade(&entry));
        self.touch(entry.clone());
        trace!(%oid, "cold-loaded shallow handle");
        Handle(entry)
    }

    /// Materialize (loading from the store on first use) and return the
    /// field list backing `handle`.
    pub fn fields(&self, handle: &Handle) -> Result<Vec<CacheField>> {
        if let Some(fields) = handle.0.fields.borrow().clone() {
            return Ok(fields);
        }
        let oid = handle
            .oid()
            .expect("a handle with no fields yet must have been cold-loaded, so it has an oid");
        let raw = self.store.read(&oid)?;
        let wrapped: Vec<CacheField> = raw.into_iter().map(|f| self.wrap_field(f)).collect();
        *handle.0.fields.borrow_mut() = Some(wrapped.clone());
        Ok(wrapped)
    }

    fn wrap_field(&self, field: Field) -> CacheField {
        match field {
            Field::Null => CacheField::Null,
            Field::Bool(b) => CacheField::Bool(b),
            Field::Int(i) => CacheField::Int(i),
            Field::Bytes(b) => CacheField::Bytes(b),
            Field::Oid(oid) => CacheField::Ref(self.read(&oid)),
        }
    }

    /// Flush `handle` (and, depth-first, any unflushed drafts it
    /// references) to the store, returning its persisted OID. A no-op for
    /// a handle that is already persisted.
    pub fn flush(&self, handle: &Handle) -> Result<Oid> {
        if let Some(oid) = handle.oid() {
            return Ok(oid);
        }
        let fields = handle
            .0
            .fields
            .borrow()
            .clone()
            .expect("an unflushed draft always carries its fields in memory");

        let mut store_fields = Vec::with_capacity(fields.len());
        for field in &fields {
            store_fields.push(self.flush_field(field)?);
        }

        let oid = self.store.create(&handle.0.type_name, &store_fields)?;
        *handle.0.oid.borrow_mut() = Some(oid.clone());
        self.by_oid.borrow_mut().insert(oid.clone(), Rc::downgrade(&handle.0));
        debug!(%oid, "flushed draft");
        Ok(oid)
    }

    fn flush_field(&self, field: &CacheField) -> Result<Field> {
        match field {
            CacheField::Null => Ok(Field::Null),
            CacheField::Bool(b) => Ok(Field::Bool(*b)),
            CacheField::Int(i) => Ok(Field::Int(*i)),
            CacheField::Bytes(b) => Ok(Field::Bytes(b.clone())),
            CacheField::Ref(child) => {
                if child.is_null() {
                    Ok(Field::Oid(Oid::null()))
                } else {
                    Ok(Field::Oid(self.flush(child)?))
                }
            }
        }
    }

    /// Flush every draft the cache still knows about (anything created via
    /// [`Cache::create`] and never flushed), in creation order.
    pub fn flush_all(&self) -> Result<()> {
        let drafts = self.drafts.borrow().clone();
        for weak in &drafts {
            if let Some(entry) = weak.upgrade() {
                if entry.oid.borrow().is_none() {
                    self.flush(&Handle(entry))?;
                }
            }
        }
        self.drafts.borrow_mut().retain(|w| w.strong_count() > 0);
        Ok(())
    }

    fn touch(&self, entry: Rc<Entry>) {
        if entry.oid.borrow().as_ref().is_some_and(Oid::is_null) {
            return; // NullOid is never cached
        }
        let evicted = {
            let mut mru = self.mru.borrow_mut();
            mru.push_back(entry);
            if mru.len() > self.capacity {
                mru.pop_front()
            } else {
                None
            }
        };
        if let Some(evicted) = evicted {
            self.on_full(evicted);
        }
    }

    /// `evicted` is the entry `touch` just pushed out of residency in
    /// `mru`; it may still be alive elsewhere (another `Handle` clone, or a
    /// parent's `CacheField::Ref`). `freeup` sweeps first, and only if that
    /// reclaimed nothing does it flush `evicted` itself — spec.md §4.3's
    /// "sweep garbage; if sweep freed nothing, flush the single LRU entry".
    fn on_full(&self, evicted: Rc<Entry>) {
        let events = self.full_events_since_sweep.get() + 1;
        self.full_events_since_sweep.set(events);
        let live = self.by_oid.borrow().len().max(1) as f64;
        let ratio = events as f64 / live;
        let reclaimed = if !self.has_swept_once.get() || ratio > self.sweep_threshold {
            self.has_swept_once.set(true);
            self.sweep()
        } else {
            0
        };
        if reclaimed == 0 {
            self.flush_evicted(evicted);
        }
    }

    /// Flush the LRU entry evicted by `touch`, if it is still an unflushed
    /// draft. A draft can fail to flush (I/O error); since `touch`/`create`
    /// are infallible by design, such a failure is logged rather than
    /// propagated — the entry simply stays resident via whatever strong
    /// reference kept it alive and will be retried on a later flush.
    fn flush_evicted(&self, entry: Rc<Entry>) {
        if entry.oid.borrow().is_some() {
            return; // already persisted, nothing to free up by flushing
        }
        if let Err(e) = self.flush(&Handle(entry)) {
            warn!(error = %e, "failed to flush LRU entry under cache pressure");
        }
    }

    /// Drop dead weak entries from the by-OID index. Entries with a live
    /// strong reference elsewhere (an outstanding [`Handle`], or residency
    /// in `mru`) survive. Returns how many entries were reclaimed.
    fn sweep(&self) -> usize {
        let before = self.by_oid.borrow().len();
        self.by_oid.borrow_mut().retain(|_, w| w.strong_count() > 0);
        let after = self.by_oid.borrow().len();
        self.full_events_since_sweep.set(0);
        let reclaimed = before - after;
        debug!(reclaimed, remaining = after, "cache sweep");
        reclaimed
    }

    /// Number of entries currently indexed by OID (for diagnostics/tests).
    pub fn len(&self) -> usize {
        self.by_oid.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
