// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! In-memory MTP storage
//!
//! [`MemFs`] is a fixed table of `N` object slots, each holding up to `S`
//! bytes of content. It presents a single storage with folders
//! (associations) and files, and is suitable for demonstrations and tests.
//!
//! Object handles are the slot index plus one.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]

#[cfg(not(any(feature = "log", feature = "defmt")))]
compile_error!("Either log or defmt feature must be enabled");
#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("log and defmt features are mutually exclusive");

#[cfg(feature = "defmt")]
#[allow(unused)]
use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use chrono::NaiveDateTime;
use heapless::{String, Vec};

use mtp::{
    access_capability, association, filesystem_type, format, protection,
    storage_type, ObjectHandle, ObjectInfo, ObjectLocation, ResponseCode,
    Storage, StorageId, StorageInfo, StorageResult,
};

/// The single storage provided
pub const STORAGE_ID: StorageId = StorageId(0x0001_0001);

/// Maximum object name length, in bytes
pub const NAME_LEN: usize = 64;

/// Contents of the preset `readme.txt`
pub const README: &[u8] = b"MTP in-memory storage\n";

#[derive(Debug)]
struct Object<const S: usize> {
    name: String<NAME_LEN>,
    /// [`ObjectHandle::NONE`] at the root
    parent: ObjectHandle,
    format: u16,
    protection: u16,
    /// Size declared at creation
    size: u32,
    data: Vec<u8, S>,
    created: Option<NaiveDateTime>,
    modified: Option<NaiveDateTime>,
}

impl<const S: usize> Object<S> {
    fn is_association(&self) -> bool {
        self.format == format::ASSOCIATION
    }

    fn size(&self) -> u32 {
        if self.is_association() {
            0
        } else {
            self.size.max(self.data.len() as u32)
        }
    }
}

/// An in-memory object store
#[derive(Debug)]
pub struct MemFs<const N: usize, const S: usize> {
    objects: [Option<Object<S>>; N],
    /// Next slot to examine for child enumeration
    cursor: usize,
    session: Option<u32>,
}

impl<const N: usize, const S: usize> Default for MemFs<N, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const S: usize> MemFs<N, S> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            objects: core::array::from_fn(|_| None),
            cursor: 0,
            session: None,
        }
    }

    /// Creates a store holding a read-only `readme.txt`, as handle 1.
    pub fn with_readme() -> Self {
        let mut fs = Self::new();
        let r = fs.add_object(
            ObjectHandle::NONE,
            "readme.txt",
            format::TEXT,
            protection::READ_ONLY,
            README,
        );
        debug_assert!(r.is_ok(), "readme doesn't fit");
        fs
    }

    /// Adds an object with content.
    ///
    /// `parent` is [`ObjectHandle::NONE`] for the root.
    pub fn add_object(
        &mut self,
        parent: ObjectHandle,
        name: &str,
        format: u16,
        protection: u16,
        content: &[u8],
    ) -> StorageResult<ObjectHandle> {
        self.check_parent(parent)?;
        let data =
            Vec::from_slice(content).map_err(|_| ResponseCode::STORE_FULL)?;
        self.insert(Object {
            name: truncate(name),
            parent,
            format,
            protection,
            size: content.len() as u32,
            data,
            created: None,
            modified: None,
        })
    }

    /// Returns an object's content
    pub fn content(&self, handle: ObjectHandle) -> Option<&[u8]> {
        self.get(handle).ok().map(|o| o.data.as_slice())
    }

    /// Finds a root-level object by name
    pub fn lookup(&self, name: &str) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .position(|o| {
                o.as_ref().is_some_and(|o| {
                    o.parent == ObjectHandle::NONE && o.name == name
                })
            })
            .map(handle)
    }

    /// Number of objects present
    pub fn len(&self) -> usize {
        self.objects.iter().flatten().count()
    }

    /// Returns `true` if no objects are present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open session ID
    pub fn session(&self) -> Option<u32> {
        self.session
    }

    fn slot(handle: ObjectHandle) -> StorageResult<usize> {
        let i = (handle.0 as usize).wrapping_sub(1);
        if i < N {
            Ok(i)
        } else {
            Err(ResponseCode::INVALID_OBJECT_HANDLE)
        }
    }

    fn get(&self, handle: ObjectHandle) -> StorageResult<&Object<S>> {
        self.objects[Self::slot(handle)?]
            .as_ref()
            .ok_or(ResponseCode::INVALID_OBJECT_HANDLE)
    }

    fn get_mut(
        &mut self,
        handle: ObjectHandle,
    ) -> StorageResult<&mut Object<S>> {
        self.objects[Self::slot(handle)?]
            .as_mut()
            .ok_or(ResponseCode::INVALID_OBJECT_HANDLE)
    }

    fn check_storage(storage: StorageId, wildcard: bool) -> StorageResult<()> {
        let ok = storage == STORAGE_ID
            || (wildcard && (storage == StorageId::ALL || storage.0 == 0));
        if ok {
            Ok(())
        } else {
            Err(ResponseCode::INVALID_STORAGE_ID)
        }
    }

    /// Checks that `parent` is the root or a folder.
    fn check_parent(&self, parent: ObjectHandle) -> StorageResult<()> {
        if parent == ObjectHandle::NONE {
            return Ok(());
        }
        match self.get(parent) {
            Ok(p) if p.is_association() => Ok(()),
            _ => Err(ResponseCode::INVALID_PARENT_OBJECT),
        }
    }

    fn insert(&mut self, obj: Object<S>) -> StorageResult<ObjectHandle> {
        let i = self
            .objects
            .iter()
            .position(|o| o.is_none())
            .ok_or(ResponseCode::STORE_FULL)?;
        debug!("memfs: create {} as {}", obj.name.as_str(), i + 1);
        self.objects[i] = Some(obj);
        Ok(handle(i))
    }

    /// Removes objects whose parent no longer exists.
    fn remove_orphans(&mut self) {
        loop {
            let orphan = (0..N).find(|&i| match &self.objects[i] {
                Some(o) if o.parent != ObjectHandle::NONE => {
                    self.get(o.parent).is_err()
                }
                _ => false,
            });
            let Some(i) = orphan else {
                break;
            };
            self.objects[i] = None;
        }
    }
}

fn handle(index: usize) -> ObjectHandle {
    ObjectHandle(index as u32 + 1)
}

fn truncate(name: &str) -> String<NAME_LEN> {
    let mut s = String::new();
    for c in name.chars() {
        if s.push(c).is_err() {
            break;
        }
    }
    s
}

impl<const N: usize, const S: usize> Storage for MemFs<N, S> {
    fn open_session(&mut self, session_id: u32) -> StorageResult<()> {
        self.session = Some(session_id);
        Ok(())
    }

    fn close_session(&mut self) -> StorageResult<()> {
        self.session = None;
        self.cursor = 0;
        Ok(())
    }

    fn storage_ids(&mut self, ids: &mut [StorageId]) -> StorageResult<usize> {
        match ids.first_mut() {
            Some(id) => {
                *id = STORAGE_ID;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn storage_info(
        &mut self,
        storage: StorageId,
    ) -> StorageResult<StorageInfo<'_>> {
        Self::check_storage(storage, false)?;
        let free = self.objects.iter().filter(|o| o.is_none()).count();
        Ok(StorageInfo {
            storage_type: storage_type::FIXED_RAM,
            filesystem_type: filesystem_type::GENERIC_HIERARCHICAL,
            access_capability: access_capability::READ_WRITE,
            max_capacity: (N * S) as u64,
            free_space: (free * S) as u64,
            free_objects: free as u32,
            description: "memfs",
            volume_id: "",
        })
    }

    fn next_child(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
    ) -> StorageResult<Option<ObjectHandle>> {
        Self::check_storage(storage, true)?;

        // ROOT selects root-level objects, NONE selects all objects
        let want = match parent {
            ObjectHandle::ROOT => Some(ObjectHandle::NONE),
            ObjectHandle::NONE => None,
            p => {
                self.check_parent(p)?;
                Some(p)
            }
        };

        while self.cursor < N {
            let i = self.cursor;
            self.cursor += 1;
            if let Some(o) = &self.objects[i] {
                if want.map_or(true, |p| p == o.parent) {
                    return Ok(Some(handle(i)));
                }
            }
        }
        Ok(None)
    }

    fn children_done(&mut self) {
        self.cursor = 0;
    }

    fn object_info(
        &mut self,
        handle: ObjectHandle,
    ) -> StorageResult<ObjectInfo<'_>> {
        let o = self.get(handle)?;
        let association_type = if o.is_association() {
            association::GENERIC_FOLDER
        } else {
            association::UNDEFINED
        };
        Ok(ObjectInfo {
            storage: STORAGE_ID,
            format: o.format,
            protection: o.protection,
            size: o.size(),
            image_width: 0,
            image_height: 0,
            image_depth: 0,
            parent: o.parent,
            association_type,
            association_desc: 0,
            sequence_number: 0,
            filename: &o.name,
            created: o.created,
            modified: o.modified,
            keywords: "",
        })
    }

    fn create_object(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        info: &ObjectInfo<'_>,
    ) -> StorageResult<ObjectLocation> {
        Self::check_storage(storage, true)?;
        let parent = if parent == ObjectHandle::ROOT {
            ObjectHandle::NONE
        } else {
            parent
        };
        self.check_parent(parent)?;

        if !info.is_association() && info.size as usize > S {
            return Err(ResponseCode::OBJECT_TOO_LARGE);
        }

        let h = self.insert(Object {
            name: truncate(info.filename),
            parent,
            format: info.format,
            protection: info.protection,
            size: info.size,
            data: Vec::new(),
            created: info.created,
            modified: info.modified,
        })?;

        Ok(ObjectLocation {
            storage: STORAGE_ID,
            parent: if parent == ObjectHandle::NONE {
                ObjectHandle::ROOT
            } else {
                parent
            },
            handle: h,
        })
    }

    fn read_object(
        &mut self,
        handle: ObjectHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> StorageResult<usize> {
        let o = self.get(handle)?;
        let data = o.data.as_slice();
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_object(
        &mut self,
        handle: ObjectHandle,
        offset: u64,
        data: &[u8],
    ) -> StorageResult<()> {
        let o = self.get_mut(handle)?;
        if o.protection == protection::READ_ONLY {
            return Err(ResponseCode::OBJECT_WRITE_PROTECTED);
        }
        if o.is_association() {
            return Err(ResponseCode::INVALID_OBJECT_HANDLE);
        }

        let start = usize::try_from(offset)
            .map_err(|_| ResponseCode::STORE_FULL)?;
        let end = start
            .checked_add(data.len())
            .filter(|&e| e <= S)
            .ok_or(ResponseCode::STORE_FULL)?;
        if end > o.data.len() {
            o.data
                .resize(end, 0)
                .map_err(|_| ResponseCode::STORE_FULL)?;
        }
        o.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn delete_object(&mut self, handle: ObjectHandle) -> StorageResult<()> {
        if handle == ObjectHandle::ROOT {
            // all objects
            for o in self.objects.iter_mut() {
                if o.as_ref().is_some_and(|o| o.protection == protection::NONE)
                {
                    *o = None;
                }
            }
        } else {
            let i = Self::slot(handle)?;
            let o = self.get(handle)?;
            if o.protection != protection::NONE {
                return Err(ResponseCode::OBJECT_WRITE_PROTECTED);
            }
            debug!("memfs: delete {}", handle.0);
            self.objects[i] = None;
        }
        self.remove_orphans();
        Ok(())
    }

    fn format_store(&mut self, storage: StorageId) -> StorageResult<()> {
        Self::check_storage(storage, false)?;
        debug!("memfs: format");
        self.objects.iter_mut().for_each(|o| *o = None);
        self.cursor = 0;
        Ok(())
    }

    fn cancel(&mut self) {
        self.cursor = 0;
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.session = None;
    }
}
