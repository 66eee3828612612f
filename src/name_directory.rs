//! Persistent character trie mapping names to OIDs.
//!
//! Grounded on `Ptrie`/`OidFS` (`examples/original_source/ptrie.py`,
//! `oidfs.py`): each node is one character wide (`prefix`, `value`,
//! `final`, `first_child`, `next_sibling`), siblings at a given depth are
//! kept sorted by character, and the whole tree is itself a set of OIDs
//! managed by a dedicated [`ObjectStore`] — it benefits from the same
//! structural sharing and GC as user data. The trie root is persisted to a
//! small `root-oid` file so it survives process restarts.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::object_store::{open_store, ObjectStore};
use crate::oid::Oid;

const NODE_TYPE: &str = "trie_node";
const ROOT_FILE: &str = "root-oid";

#[derive(Debug, Clone)]
struct Node {
    prefix: Vec<u8>,
    value: Oid,
    is_final: bool,
    first_child: Oid,
    next_sibling: Oid,
}

impl Node {
    fn empty() -> Self {
        Node {
            prefix: Vec::new(),
            value: Oid::null(),
            is_final: false,
            first_child: Oid::null(),
            next_sibling: Oid::null(),
        }
    }

    fn to_fields(&self) -> Vec<Field> {
        vec![
            Field::Bytes(self.prefix.clone()),
            Field::Oid(self.value.clone()),
            Field::Bool(self.is_final),
            Field::Oid(self.first_child.clone()),
            Field::Oid(self.next_sibling.clone()),
        ]
    }

    fn from_fields(fields: &[Field]) -> Result<Node> {
        let [prefix, value, is_final, first_child, next_sibling] = fields else {
            return Err(Error::Corrupt(format!(
                "trie node record has {} fields, expected 5",
                fields.len()
            )));
        };
        Ok(Node {
            prefix: prefix
                .as_bytes()
                .ok_or_else(|| Error::Corrupt("trie node prefix field is not Bytes".into()))?
                .to_vec(),
            value: value
                .as_oid()
                .ok_or_else(|| Error::Corrupt("trie node value field is not an Oid".into()))?
                .clone(),
            is_final: is_final
                .as_bool()
                .ok_or_else(|| Error::Corrupt("trie node final field is not Bool".into()))?,
            first_child: first_child
                .as_oid()
                .ok_or_else(|| Error::Corrupt("trie node first_child field is not an Oid".into()))?
                .clone(),
            next_sibling: next_sibling
                .as_oid()
                .ok_or_else(|| Error::Corrupt("trie node next_sibling field is not an Oid".into()))?
                .clone(),
        })
    }
}

/// A persistent, structurally-shared character trie.
pub struct NameDirectory {
    store: Arc<ObjectStore>,
    root_file: PathBuf,
    root: Mutex<Oid>,
}

impl NameDirectory {
    /// Open (or initialize) a trie whose nodes live in `store` and whose
    /// root pointer is persisted at `dir/root-oid`.
    pub fn open(store: Arc<ObjectStore>, dir: impl AsRef<Path>) -> Result<Self> {
        let root_file = dir.as_ref().join(ROOT_FILE);
        let root = if root_file.exists() {
            read_root_file(&root_file)?
        } else {
            Oid::null()
        };
        Ok(NameDirectory {
            store,
            root_file,
            root: Mutex::new(root),
        })
    }

    pub fn root(&self) -> Oid {
        self.root.lock().clone()
    }

    fn write_node(&self, node: &Node) -> Result<Oid> {
        self.store.create(NODE_TYPE, &node.to_fields())
    }

    fn read_node(&self, oid: &Oid) -> Result<Node> {
        if oid.is_null() {
            return Ok(Node::empty());
        }
        Node::from_fields(&self.store.read(oid)?)
    }

    fn persist_root(&self, new_root: Oid) -> Result<()> {
        write_root_file(&self.root_file, &new_root)?;
        *self.root.lock() = new_root;
        Ok(())
    }

    /// Insert `key -> value`, overwriting any existing value at `key`.
    pub fn insert(&self, key: &[u8], value: Oid) -> Result<()> {
        assert!(!key.is_empty(), "trie keys must be non-empty");
        let root = self.read_node(&self.root())?;
        let new_first_child = self.insert_into_chain(&root.first_child, key, &value)?;
        let new_root = self.write_node(&Node {
            prefix: Vec::new(),
            value: Oid::null(),
            is_final: false,
            first_child: new_first_child,
            next_sibling: Oid::null(),
        })?;
        self.persist_root(new_root)
    }

    fn insert_into_chain(&self, sibling: &Oid, key: &[u8], value: &Oid) -> Result<Oid> {
        if sibling.is_null() {
            return self.build_chain(key, value, Oid::null());
        }
        let node = self.read_node(sibling)?;
        let c = key[0];
        match node.prefix[0].cmp(&c) {
            std::cmp::Ordering::Greater => self.build_chain(key, value, sibling.clone()),
            std::cmp::Ordering::Less => {
                let new_next = self.insert_into_chain(&node.next_sibling, key, value)?;
                self.write_node(&Node {
                    next_sibling: new_next,
                    ..node
                })
            }
            std::cmp::Ordering::Equal => {
                let rest = &key[1..];
                if rest.is_empty() {
                    self.write_node(&Node {
                        value: value.clone(),
                        is_final: true,
                        ..node
                    })
                } else {
                    let new_first_child = self.insert_into_chain(&node.first_child, rest, value)?;
                    self.write_node(&Node {
                        first_child: new_first_child,
                        ..node
                    })
                }
            }
        }
    }

    /// Build a brand-new node chain for `key`, terminating the new branch
    /// with `next_sibling` (the unmodified remainder of whatever chain it
    /// is being spliced into).
    fn build_chain(&self, key: &[u8], value: &Oid, next_sibling: Oid) -> Result<Oid> {
        let c = key[0];
        let rest = &key[1..];
        if rest.is_empty() {
            self.write_node(&Node {
                prefix: vec![c],
                value: value.clone(),
                is_final: true,
                first_child: Oid::null(),
                next_sibling,
            })
        } else {
            let child = self.build_chain(rest, value, Oid::null())?;
            self.write_node(&Node {
                prefix: vec![c],
                value: Oid::null(),
                is_final: false,
                first_child: child,
                next_sibling,
            })
        }
    }

    /// Look up `key`. Returns [`Oid::null`] if absent or present only as a
    /// non-terminal prefix.
    pub fn find(&self, key: &[u8]) -> Result<Oid> {
        if key.is_empty() {
            return Ok(Oid::null());
        }
        let root = self.read_node(&self.root())?;
        self.find_in_chain(&root.first_child, key)
    }

    fn find_in_chain(&self, sibling: &Oid, key: &[u8]) -> Result<Oid> {
        if sibling.is_null() {
            return Ok(Oid::null());
        }
        let node = self.read_node(sibling)?;
        let c = key[0];
        match node.prefix[0].cmp(&c) {
            std::cmp::Ordering::Greater => Ok(Oid::null()),
            std::cmp::Ordering::Less => self.find_in_chain(&node.next_sibling, key),
            std::cmp::Ordering::Equal => {
                let rest = &key[1..];
                if rest.is_empty() {
                    Ok(if node.is_final { node.value } else { Oid::null() })
                } else {
                    self.find_in_chain(&node.first_child, rest)
                }
            }
        }
    }

    /// Delete `key`. A node with surviving children just loses its
    /// terminal status; a childless node is unlinked from its sibling
    /// chain, and the walk back up the path prunes any now-childless,
    /// non-terminal ancestors ("hanging branches").
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        let root = self.read_node(&self.root())?;
        let new_first_child = self.delete_from_chain(&root.first_child, key)?;
        let new_root = self.write_node(&Node {
            first_child: new_first_child,
            ..root
        })?;
        self.persist_root(new_root)
    }

    fn delete_from_chain(&self, sibling: &Oid, key: &[u8]) -> Result<Oid> {
        if sibling.is_null() {
            return Ok(Oid::null());
        }
        let node = self.read_node(sibling)?;
        let c = key[0];
        match node.prefix[0].cmp(&c) {
            std::cmp::Ordering::Greater => Ok(sibling.clone()),
            std::cmp::Ordering::Less => {
                let new_next = self.delete_from_chain(&node.next_sibling, key)?;
                if new_next == node.next_sibling {
                    return Ok(sibling.clone());
                }
                self.write_node(&Node {
                    next_sibling: new_next,
                    ..node
                })
            }
            std::cmp::Ordering::Equal => {
                let rest = &key[1..];
                if rest.is_empty() {
                    if node.first_child.is_null() {
                        Ok(node.next_sibling.clone())
                    } else {
                        self.write_node(&Node {
                            value: Oid::null(),
                            is_final: false,
                            ..node
                        })
                    }
                } else {
                    let new_first_child = self.delete_from_chain(&node.first_child, rest)?;
                    if new_first_child.is_null() && !node.is_final {
                        Ok(node.next_sibling.clone())
                    } else {
                        self.write_node(&Node {
                            first_child: new_first_child,
                            ..node
                        })
                    }
                }
            }
        }
    }

    /// Every `(name, value)` pair in the trie, visited recursively:
    /// child before sibling. Because sibling chains are sorted, this
    /// yields names in lexicographic order.
    pub fn depth_first(&self) -> Result<Vec<(Vec<u8>, Oid)>> {
        let mut out = Vec::new();
        let root = self.read_node(&self.root())?;
        self.dfs_chain(&root.first_child, &[], &mut out)?;
        Ok(out)
    }

    fn dfs_chain(&self, sibling: &Oid, prefix: &[u8], out: &mut Vec<(Vec<u8>, Oid)>) -> Result<()> {
        if sibling.is_null() {
            return Ok(());
        }
        let node = self.read_node(sibling)?;
        let mut full = prefix.to_vec();
        full.push(node.prefix[0]);
        if node.is_final {
            out.push((full.clone(), node.value.clone()));
        }
        self.dfs_chain(&node.first_child, &full, out)?;
        self.dfs_chain(&node.next_sibling, prefix, out)?;
        Ok(())
    }

    /// Level-order enumeration: every node at depth *d* is visited before
    /// any node at depth *d+1*. Grounded on `_bfs`
    /// (`examples/original_source/ptrie.py`): a queue of whole sibling
    /// chains rather than individual nodes — each item dequeued is a chain
    /// head, walked in full (so same-depth siblings are always emitted
    /// together), queueing each node's own child chain as a single item for
    /// the next level. This generally disagrees with
    /// [`NameDirectory::depth_first`]'s lexicographic order whenever two
    /// keys differ in length: e.g. among "apple" (depth 5), "banana"
    /// (depth 6), and "apricot" (depth 7), depth-first visits them
    /// alphabetically, but breadth-first visits "apple", then "banana",
    /// then "apricot" — grouped by depth, not by key.
    pub fn breadth_first(&self) -> Result<Vec<(Vec<u8>, Oid)>> {
        let mut out = Vec::new();
        let root = self.read_node(&self.root())?;
        let mut queue: VecDeque<(Oid, Vec<u8>)> = VecDeque::new();
        if !root.first_child.is_null() {
            queue.push_back((root.first_child.clone(), Vec::new()));
        }
        while let Some((chain_head, prefix)) = queue.pop_front() {
            let mut cur = chain_head;
            while !cur.is_null() {
                let node = self.read_node(&cur)?;
                let mut full = prefix.clone();
                full.push(node.prefix[0]);
                if node.is_final {
                    out.push((full.clone(), node.value.clone()));
                }
                if !node.first_child.is_null() {
                    queue.push_back((node.first_child.clone(), full));
                }
                cur = node.next_sibling.clone();
            }
        }
        Ok(out)
    }

    /// Collect garbage across every store this trie's values point into,
    /// then collect the trie's own store. `extra_roots` are preserved
    /// alongside the trie root wherever they happen to live.
    pub fn collect(&self, extra_roots: &[Oid]) -> Result<()> {
        let pairs = self.depth_first()?;

        let mut by_store: HashMap<String, Vec<Oid>> = HashMap::new();
        let foreign = |oid: &Oid| !oid.is_null() && oid.pool_id() != self.store.pool_id();
        for (_, value) in &pairs {
            if foreign(value) {
                by_store.entry(value.pool_id().to_string()).or_default().push(value.clone());
            }
        }
        for extra in extra_roots {
            if foreign(extra) {
                by_store.entry(extra.pool_id().to_string()).or_default().push(extra.clone());
            }
        }

        let mut remap: HashMap<Oid, Oid> = HashMap::new();
        for (pool_id, roots) in &by_store {
            let store = open_store(pool_id)?;
            let new_roots = store.copy_collect(roots)?;
            for (old, new) in roots.iter().zip(new_roots) {
                remap.insert(old.clone(), new);
            }
            info!(%pool_id, collected = roots.len(), "collected named store reachable from directory");
        }

        self.persist_root(Oid::null())?;
        for (key, value) in &pairs {
            let new_value = remap.get(value).cloned().unwrap_or_else(|| value.clone());
            self.insert(key, new_value)?;
        }

        let mut own_roots = vec![self.root()];
        own_roots.extend(
            extra_roots
                .iter()
                .filter(|r| !r.is_null() && r.pool_id() == self.store.pool_id())
                .cloned(),
        );
        let new_own_roots = self.store.copy_collect(&own_roots)?;
        self.persist_root(new_own_roots[0].clone())?;
        debug!(names = pairs.len(), "directory collection finished");
        Ok(())
    }
}

fn read_root_file(path: &Path) -> Result<Oid> {
    let bytes = fs::read(path)?;
    let mut cursor = Cursor::new(bytes);
    let seq = cursor.read_u64::<LittleEndian>()?;
    let size = cursor.read_u32::<LittleEndian>()? as u64;
    let pool_id = read_len_prefixed(&mut cursor)?;
    let type_name = read_len_prefixed(&mut cursor)?;
    if seq == 0 {
        Ok(Oid::null())
    } else {
        Ok(Oid::new(seq, size, pool_id, type_name))
    }
}

fn write_root_file(path: &Path, oid: &Oid) -> Result<()> {
    let mut buf = Vec::new();
    buf.write_u64::<LittleEndian>(oid.seq())?;
    buf.write_u32::<LittleEndian>(oid.size() as u32)?;
    write_len_prefixed(&mut buf, oid.pool_id())?;
    write_len_prefixed(&mut buf, oid.type_name())?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_len_prefixed(r: &mut impl Read) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::Corrupt(format!("non-utf8 string in root-oid file: {e}")))
}

fn write_len_prefixed(w: &mut impl Write, s: &str) -> Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}
