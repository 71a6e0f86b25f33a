//! Component B: the index map — header, header-copy buffer, and a shared record map.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::header::{IndexHeader, HEADER_LAYOUT_SIZE};
use crate::record_map::SharedRecordMap;

/// Where the map's bytes currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residence {
    /// Backed by a memory-mapped index file; mutation requires materializing into owned
    /// memory first (§4.B `move_to_private_memory`).
    Mmap,
    /// Already a private, growable, owned buffer.
    Memory,
}

#[derive(Debug)]
pub struct IndexMapInner {
    pub header: IndexHeader,
    pub hdr_copy_buf: Vec<u8>,
    pub record_map: SharedRecordMap,
    pub residence: Residence,
    /// Back-ref to the [`Index`] currently publishing this map as its "current" snapshot, if
    /// any (§3 data model). `Weak` so the index's strong ownership of its current map never
    /// creates a cycle back through this field.
    pub owning_index: Option<Weak<RefCell<IndexInner>>>,
}

/// A refcounted handle to an index map. Cloning shares the underlying state; mutation always
/// goes through [`IndexMap::move_to_private_memory`] or [`IndexMap::get_atomic_map`] first.
#[derive(Debug, Clone)]
pub struct IndexMap {
    inner: Rc<RefCell<IndexMapInner>>,
}

impl IndexMap {
    pub fn new(header: IndexHeader, record_map: SharedRecordMap, residence: Residence) -> Self {
        let mut hdr_copy_buf = vec![0u8; HEADER_LAYOUT_SIZE];
        header.write_to(&mut hdr_copy_buf);
        let inner = Rc::new(RefCell::new(IndexMapInner {
            header,
            hdr_copy_buf,
            record_map: record_map.clone(),
            residence,
            owning_index: None,
        }));
        record_map.register_observer(Rc::downgrade(&inner));
        Self { inner }
    }

    pub fn downgrade(&self) -> Weak<RefCell<IndexMapInner>> {
        Rc::downgrade(&self.inner)
    }

    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn header(&self) -> IndexHeader {
        self.inner.borrow().header
    }

    pub fn with_header<R>(&self, f: impl FnOnce(&mut IndexHeader) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        let r = f(&mut inner.header);
        let header = inner.header;
        header.write_to(&mut inner.hdr_copy_buf);
        r
    }

    /// Writes `bytes` into `hdr_copy_buf` at `offset` (the raw-byte path used by
    /// `HEADER_UPDATE`, §4.E), then re-derives the typed header from the updated buffer so
    /// both stay in sync.
    pub fn update_raw_header_region(&self, offset: usize, bytes: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        if inner.hdr_copy_buf.len() < offset + bytes.len() {
            inner.hdr_copy_buf.resize(offset + bytes.len(), 0);
        }
        inner.hdr_copy_buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        if inner.hdr_copy_buf.len() >= HEADER_LAYOUT_SIZE {
            inner.header = IndexHeader::read_from(&inner.hdr_copy_buf);
        }
    }

    pub fn record_map(&self) -> SharedRecordMap {
        self.inner.borrow().record_map.clone()
    }

    pub fn residence(&self) -> Residence {
        self.inner.borrow().residence
    }

    pub fn hdr_copy_buf(&self) -> Vec<u8> {
        self.inner.borrow().hdr_copy_buf.clone()
    }

    pub fn ptr_eq(&self, other: &IndexMap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records which [`Index`] currently publishes this map as current, so a later
    /// `replace_map` call starting from this map can find its way back to that index (§4.B).
    pub fn set_owning_index(&self, index: &Index) {
        self.inner.borrow_mut().owning_index = Some(Rc::downgrade(&index.inner));
    }

    pub fn owning_index(&self) -> Option<Index> {
        self.inner.borrow().owning_index.as_ref()?.upgrade().map(|inner| Index { inner })
    }

    /// Whether `other` (an observer handle from [`SharedRecordMap::observers`]) is this same
    /// index map, used by counter fan-out (§4.C) to skip the map it's already updating
    /// directly.
    pub fn shares_inner(&self, other: &Rc<RefCell<IndexMapInner>>) -> bool {
        Rc::ptr_eq(&self.inner, other)
    }

    /// §4.B `move_to_private_memory`: if shared (refcount > 1), clones the map (but not the
    /// record map) and returns the private clone; if mmap-resident, also materializes the
    /// record map into owned memory. Otherwise returns `self` unchanged.
    pub fn move_to_private_memory(&self) -> IndexMap {
        let needs_clone = self.refcount() > 1;
        let needs_materialize = self.residence() == Residence::Mmap;

        if !needs_clone && !needs_materialize {
            return self.clone();
        }

        let inner = self.inner.borrow();
        let header = inner.header;
        let record_map = if needs_materialize {
            // Materializing from mmap means taking ownership of a private, growable copy;
            // here the record map is already an owned `Vec`-backed structure, so forking it
            // accomplishes the same thing as a mmap->memory materialization would.
            inner.record_map.fork()
        } else {
            inner.record_map.clone()
        };
        drop(inner);

        IndexMap::new(header, record_map, Residence::Memory)
    }

    /// §4.B `get_atomic_map`: `move_to_private_memory`, then also forks the record map so no
    /// other map shares it, even if this map wasn't itself shared.
    pub fn get_atomic_map(&self) -> IndexMap {
        let private = self.move_to_private_memory();
        if private.record_map().strong_count() > 1 {
            let header = private.header();
            let forked = private.record_map().fork();
            return IndexMap::new(header, forked, Residence::Memory);
        }
        private
    }
}

#[derive(Debug)]
pub struct IndexInner {
    current: IndexMap,
}

/// The published "current map" pointer an embedder reads to get the live state of an index
/// (§3 data model). Only `FILE`/`HEAD` syncs ever rebind it; `VIEW` syncs mutate a private map
/// that no `Index` ever points at (§5).
#[derive(Debug, Clone)]
pub struct Index {
    inner: Rc<RefCell<IndexInner>>,
}

impl Index {
    pub fn new(initial: IndexMap) -> Self {
        let index = Self {
            inner: Rc::new(RefCell::new(IndexInner { current: initial.clone() })),
        };
        initial.set_owning_index(&index);
        index
    }

    pub fn current(&self) -> IndexMap {
        self.inner.borrow().current.clone()
    }

    /// Rebinds the published pointer to `new_map`, and records `new_map` as this index's own
    /// current map so a later `replace_map` call starting from it can find its way back here.
    pub fn publish(&self, new_map: IndexMap) {
        new_map.set_owning_index(self);
        self.inner.borrow_mut().current = new_map;
    }
}

/// §4.B `replace_map`: the third copy-on-write primitive alongside `move_to_private_memory`
/// and `get_atomic_map`. Swaps `old_map`'s owning index's published "current" pointer over to
/// `new_map`, but only for `FILE`/`HEAD` syncs — a `VIEW` sync's private map is never published
/// (§5) — then notifies the modseq sub-applier that the map it was tracking has been replaced
/// (§4.F `map_replaced`). The caller finalizes the retiring map's log offset (§4.G step 8)
/// before calling this, since `old_map`'s header is not touched here.
pub fn replace_map(
    old_map: &IndexMap,
    new_map: &IndexMap,
    sync_type: crate::sync::SyncType,
    modseq: &mut crate::modseq::ModseqSub,
) {
    if matches!(sync_type, crate::sync::SyncType::File | crate::sync::SyncType::Head) {
        if let Some(index) = old_map.owning_index() {
            index.publish(new_map.clone());
        }
    }
    modseq.map_replaced();
}
