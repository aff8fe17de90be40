//! Hierarchical File
//!
//! One file per job. The tree of groups, datasets, and links lives in memory
//! while the job runs; writer modules hold dataset handles that append
//! directly into it. `flush` persists the whole tree atomically as a JSON
//! snapshot (write to a temporary path, then rename), and `open_rw` restores
//! a snapshot so datasets can be reopened for append.
//!
//! ## Handles
//!
//! `Group`, `Chunked1D<T>`, and `Chunked2D<T>` are cheap clones of an `Arc`
//! into the tree. They stay valid for the lifetime of the file; dropping
//! them releases nothing, so `close` never has to wait on a handle. The
//! orchestrator serializes all mutation per job, which is what makes the
//! plain `RwLock` per node sufficient.
//!
//! ## Close semantics
//!
//! `close` flushes and marks the file closed; a second `close` is a no-op,
//! which is what makes job `stop()` idempotent. Appending or flushing after
//! close fails with `Closed`.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::dtype::{DatasetValues, Element};
use crate::error::{Error, Result};

type NodeRef = Arc<RwLock<NodeData>>;

/// Sentinel meaning "variable-length string", matching the template
/// convention of `string_size: 0`.
pub const VARIABLE_STRING: usize = 0;

/// Hard cap on fixed string width.
pub const MAX_STRING_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug)]
struct NodeData {
    name: String,
    attributes: Map<String, Value>,
    payload: NodePayload,
}

#[derive(Debug)]
enum NodePayload {
    Group { children: Vec<NodeRef> },
    Dataset(DatasetData),
    Link { target: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetData {
    values: DatasetValues,
    layout: Layout,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    string_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Layout {
    Chunked1d { chunk: usize },
    Chunked2d { cols: usize, chunk: usize },
    Fixed { dims: Vec<usize> },
}

fn read_node(node: &NodeRef) -> RwLockReadGuard<'_, NodeData> {
    node.read().expect("file node lock poisoned")
}

fn write_node(node: &NodeRef) -> RwLockWriteGuard<'_, NodeData> {
    node.write().expect("file node lock poisoned")
}

fn new_group_node(name: &str) -> NodeRef {
    Arc::new(RwLock::new(NodeData {
        name: name.to_string(),
        attributes: Map::new(),
        payload: NodePayload::Group {
            children: Vec::new(),
        },
    }))
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// A hierarchical data file, one per job.
pub struct NexusFile {
    path: PathBuf,
    root: NodeRef,
    closed: bool,
}

impl NexusFile {
    /// Create a new file, refusing to overwrite an existing one.
    pub fn create_exclusive(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::FileExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        let file = Self {
            path,
            root: new_group_node("/"),
            closed: false,
        };
        file.flush()?;
        Ok(file)
    }

    /// Open an existing file for append.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path)?;
        let snapshot: Value =
            serde_json::from_str(&text).map_err(|e| Error::Corrupt(e.to_string()))?;
        let root = node_from_snapshot(&snapshot)?;
        Ok(Self {
            path,
            root,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root group.
    pub fn root(&self) -> Group {
        Group {
            path: "/".to_string(),
            node: self.root.clone(),
        }
    }

    /// Persist the tree atomically: write a temporary sibling, then rename.
    pub fn flush(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let snapshot = node_to_snapshot(&self.root);
        let text = serde_json::to_string(&snapshot).map_err(|e| Error::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Flush and mark closed. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Look up a group by absolute path, following a link node at the final
    /// component.
    pub fn lookup_group(&self, path: &str) -> Result<Group> {
        let (node, resolved) = self.lookup_node(path, 0)?;
        let result = match &read_node(&node).payload {
            NodePayload::Group { .. } => Ok(Group {
                path: resolved,
                node: node.clone(),
            }),
            _ => Err(Error::NotAGroup(path.to_string())),
        };
        result
    }

    /// Read back the values of a dataset (finalization checks and tests).
    pub fn dataset_values(&self, path: &str) -> Result<DatasetValues> {
        let (node, _) = self.lookup_node(path, 0)?;
        let result = match &read_node(&node).payload {
            NodePayload::Dataset(d) => Ok(d.values.clone()),
            _ => Err(Error::NotADataset(path.to_string())),
        };
        result
    }

    /// Number of rows in a dataset.
    pub fn dataset_rows(&self, path: &str) -> Result<usize> {
        let (node, _) = self.lookup_node(path, 0)?;
        let result = match &read_node(&node).payload {
            NodePayload::Dataset(d) => Ok(match &d.layout {
                Layout::Chunked2d { cols, .. } if *cols > 0 => d.values.len() / cols,
                _ => d.values.len(),
            }),
            _ => Err(Error::NotADataset(path.to_string())),
        };
        result
    }

    /// Whether any node exists at the path.
    pub fn node_exists(&self, path: &str) -> bool {
        self.lookup_node(path, 0).is_ok()
    }

    fn lookup_node(&self, path: &str, depth: usize) -> Result<(NodeRef, String)> {
        if depth > 8 {
            return Err(Error::NodeNotFound(format!("{path} (link loop)")));
        }
        let mut current = self.root.clone();
        let mut resolved = "/".to_string();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let child = {
                let guard = read_node(&current);
                match &guard.payload {
                    NodePayload::Group { children } => children
                        .iter()
                        .find(|c| read_node(c).name == part)
                        .cloned()
                        .ok_or_else(|| Error::NodeNotFound(path.to_string()))?,
                    _ => return Err(Error::NotAGroup(resolved.clone())),
                }
            };
            resolved = join_path(&resolved, part);
            current = child;
        }
        // Follow a link at the final component.
        let target = match &read_node(&current).payload {
            NodePayload::Link { target } => Some(target.clone()),
            _ => None,
        };
        if let Some(target) = target {
            return self.lookup_node(&target, depth + 1);
        }
        Ok((current, resolved))
    }
}

/// Handle to a group node.
#[derive(Clone)]
pub struct Group {
    path: String,
    node: NodeRef,
}

impl Group {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> String {
        read_node(&self.node).name.clone()
    }

    fn child(&self, name: &str) -> Option<NodeRef> {
        match &read_node(&self.node).payload {
            NodePayload::Group { children } => children
                .iter()
                .find(|c| read_node(c).name == name)
                .cloned(),
            _ => None,
        }
    }

    fn insert_child(&self, name: &str, payload: NodePayload) -> Result<NodeRef> {
        let mut guard = write_node(&self.node);
        let children = match &mut guard.payload {
            NodePayload::Group { children } => children,
            _ => return Err(Error::NotAGroup(self.path.clone())),
        };
        if children.iter().any(|c| read_node(c).name == name) {
            return Err(Error::NodeExists(join_path(&self.path, name)));
        }
        let node = Arc::new(RwLock::new(NodeData {
            name: name.to_string(),
            attributes: Map::new(),
            payload,
        }));
        children.push(node.clone());
        Ok(node)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    pub fn child_names(&self) -> Vec<String> {
        match &read_node(&self.node).payload {
            NodePayload::Group { children } => {
                children.iter().map(|c| read_node(c).name.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Create a child group.
    pub fn create_group(&self, name: &str) -> Result<Group> {
        let node = self.insert_child(
            name,
            NodePayload::Group {
                children: Vec::new(),
            },
        )?;
        Ok(Group {
            path: join_path(&self.path, name),
            node,
        })
    }

    /// Open an existing child group.
    pub fn open_group(&self, name: &str) -> Result<Group> {
        let node = self
            .child(name)
            .ok_or_else(|| Error::NodeNotFound(join_path(&self.path, name)))?;
        let result = match &read_node(&node).payload {
            NodePayload::Group { .. } => Ok(Group {
                path: join_path(&self.path, name),
                node: node.clone(),
            }),
            _ => Err(Error::NotAGroup(join_path(&self.path, name))),
        };
        result
    }

    // -----------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------

    /// Write an attribute on this group (or overwrite an existing one).
    pub fn write_attribute(&self, name: &str, value: Value) {
        write_node(&self.node)
            .attributes
            .insert(name.to_string(), value);
    }

    pub fn write_attribute_string(&self, name: &str, value: &str) {
        self.write_attribute(name, Value::String(value.to_string()));
    }

    /// Write a typed scalar attribute.
    pub fn write_attribute_scalar<T: Into<Value>>(&self, name: &str, value: T) {
        self.write_attribute(name, value.into());
    }

    /// Write a typed array attribute.
    pub fn write_attribute_array<T: Into<Value> + Clone>(&self, name: &str, values: &[T]) {
        self.write_attribute(
            name,
            Value::Array(values.iter().cloned().map(Into::into).collect()),
        );
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        read_node(&self.node).attributes.get(name).cloned()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        read_node(&self.node).attributes.keys().cloned().collect()
    }

    // -----------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------

    /// Create an append-only 1-D dataset with the element type `T`.
    pub fn create_chunked_1d<T: Element>(&self, name: &str, chunk: usize) -> Result<Chunked1D<T>> {
        let node = self.insert_child(
            name,
            NodePayload::Dataset(DatasetData {
                values: DatasetValues::empty(T::DTYPE),
                layout: Layout::Chunked1d {
                    chunk: chunk.max(1),
                },
                string_size: None,
            }),
        )?;
        Ok(Chunked1D {
            path: join_path(&self.path, name),
            node,
            _marker: PhantomData,
        })
    }

    /// Open an existing 1-D dataset for append, verifying the element type.
    pub fn open_chunked_1d<T: Element>(&self, name: &str) -> Result<Chunked1D<T>> {
        let path = join_path(&self.path, name);
        let node = self
            .child(name)
            .ok_or_else(|| Error::NodeNotFound(path.clone()))?;
        {
            let guard = read_node(&node);
            let data = match &guard.payload {
                NodePayload::Dataset(d) => d,
                _ => return Err(Error::NotADataset(path)),
            };
            if data.values.dtype() != T::DTYPE {
                return Err(Error::DTypeMismatch {
                    path,
                    expected: T::DTYPE.name(),
                    found: data.values.dtype().name(),
                });
            }
        }
        Ok(Chunked1D {
            path: join_path(&self.path, name),
            node,
            _marker: PhantomData,
        })
    }

    /// Create an append-only 2-D dataset with fixed row width `cols`.
    pub fn create_chunked_2d<T: Element>(
        &self,
        name: &str,
        cols: usize,
        chunk: usize,
    ) -> Result<Chunked2D<T>> {
        let node = self.insert_child(
            name,
            NodePayload::Dataset(DatasetData {
                values: DatasetValues::empty(T::DTYPE),
                layout: Layout::Chunked2d {
                    cols: cols.max(1),
                    chunk: chunk.max(1),
                },
                string_size: None,
            }),
        )?;
        Ok(Chunked2D {
            path: join_path(&self.path, name),
            node,
            cols: cols.max(1),
            _marker: PhantomData,
        })
    }

    /// Open an existing 2-D dataset for append.
    pub fn open_chunked_2d<T: Element>(&self, name: &str) -> Result<Chunked2D<T>> {
        let path = join_path(&self.path, name);
        let node = self
            .child(name)
            .ok_or_else(|| Error::NodeNotFound(path.clone()))?;
        let cols = {
            let guard = read_node(&node);
            let data = match &guard.payload {
                NodePayload::Dataset(d) => d,
                _ => return Err(Error::NotADataset(path)),
            };
            if data.values.dtype() != T::DTYPE {
                return Err(Error::DTypeMismatch {
                    path,
                    expected: T::DTYPE.name(),
                    found: data.values.dtype().name(),
                });
            }
            match data.layout {
                Layout::Chunked2d { cols, .. } => cols,
                _ => return Err(Error::NotADataset(join_path(&self.path, name))),
            }
        };
        Ok(Chunked2D {
            path: join_path(&self.path, name),
            node,
            cols,
            _marker: PhantomData,
        })
    }

    /// Create a dataset with a bounded shape and its full contents, as
    /// declared by a template node.
    pub fn create_fixed_dataset(
        &self,
        name: &str,
        mut values: DatasetValues,
        dims: Vec<usize>,
        string_size: Option<usize>,
    ) -> Result<()> {
        let string_size = match string_size {
            Some(n) if n != VARIABLE_STRING => {
                if n > MAX_STRING_SIZE {
                    warn!(
                        dataset = %join_path(&self.path, name),
                        requested = n,
                        "fixed string size above cap, clamping"
                    );
                }
                Some(n.min(MAX_STRING_SIZE))
            }
            _ => None,
        };
        if let (Some(width), DatasetValues::String(strings)) = (string_size, &mut values) {
            for s in strings.iter_mut() {
                if s.len() > width {
                    let mut cut = width;
                    while !s.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    s.truncate(cut);
                }
            }
        }
        self.insert_child(
            name,
            NodePayload::Dataset(DatasetData {
                values,
                layout: Layout::Fixed { dims },
                string_size,
            }),
        )?;
        Ok(())
    }

    /// Write an attribute on a child dataset.
    pub fn write_dataset_attribute(&self, dataset: &str, name: &str, value: Value) -> Result<()> {
        let node = self
            .child(dataset)
            .ok_or_else(|| Error::NodeNotFound(join_path(&self.path, dataset)))?;
        write_node(&node).attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Create a link node pointing at an absolute target path.
    pub fn create_link(&self, name: &str, target: &str) -> Result<()> {
        self.insert_child(
            name,
            NodePayload::Link {
                target: target.to_string(),
            },
        )?;
        Ok(())
    }
}

/// Append handle to a 1-D chunked dataset.
pub struct Chunked1D<T: Element> {
    path: String,
    node: NodeRef,
    _marker: PhantomData<T>,
}

impl<T: Element> Chunked1D<T> {
    /// Append elements; returns the row index of the first appended element.
    pub fn append(&self, items: &[T]) -> Result<u64> {
        let mut guard = write_node(&self.node);
        let data = match &mut guard.payload {
            NodePayload::Dataset(d) => d,
            _ => return Err(Error::NotADataset(self.path.clone())),
        };
        let ix0 = data.values.len() as u64;
        if !T::extend_into(&mut data.values, items) {
            return Err(Error::DTypeMismatch {
                path: self.path.clone(),
                expected: T::DTYPE.name(),
                found: data.values.dtype().name(),
            });
        }
        Ok(ix0)
    }

    pub fn len(&self) -> usize {
        match &read_node(&self.node).payload {
            NodePayload::Dataset(d) => d.values.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Append handle to a 2-D chunked dataset with fixed row width.
pub struct Chunked2D<T: Element> {
    path: String,
    node: NodeRef,
    cols: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> Chunked2D<T> {
    /// Append one row; returns the row index.
    pub fn append_row(&self, row: &[T]) -> Result<u64> {
        if row.len() != self.cols {
            return Err(Error::ShapeMismatch {
                path: self.path.clone(),
                expected: self.cols,
                got: row.len(),
            });
        }
        let mut guard = write_node(&self.node);
        let data = match &mut guard.payload {
            NodePayload::Dataset(d) => d,
            _ => return Err(Error::NotADataset(self.path.clone())),
        };
        let ix0 = (data.values.len() / self.cols) as u64;
        if !T::extend_into(&mut data.values, row) {
            return Err(Error::DTypeMismatch {
                path: self.path.clone(),
                expected: T::DTYPE.name(),
                found: data.values.dtype().name(),
            });
        }
        Ok(ix0)
    }

    pub fn rows(&self) -> usize {
        match &read_node(&self.node).payload {
            NodePayload::Dataset(d) => d.values.len() / self.cols,
            _ => 0,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }
}

// ---------------------------------------------------------------------
// Snapshot serialization
// ---------------------------------------------------------------------

fn node_to_snapshot(node: &NodeRef) -> Value {
    let guard = read_node(node);
    let mut object = Map::new();
    object.insert("name".to_string(), Value::String(guard.name.clone()));
    if !guard.attributes.is_empty() {
        object.insert(
            "attributes".to_string(),
            Value::Object(guard.attributes.clone()),
        );
    }
    match &guard.payload {
        NodePayload::Group { children } => {
            object.insert("type".to_string(), Value::String("group".to_string()));
            object.insert(
                "children".to_string(),
                Value::Array(children.iter().map(node_to_snapshot).collect()),
            );
        }
        NodePayload::Dataset(data) => {
            object.insert("type".to_string(), Value::String("dataset".to_string()));
            object.insert(
                "dataset".to_string(),
                serde_json::to_value(data).unwrap_or(Value::Null),
            );
        }
        NodePayload::Link { target } => {
            object.insert("type".to_string(), Value::String("link".to_string()));
            object.insert("target".to_string(), Value::String(target.clone()));
        }
    }
    Value::Object(object)
}

fn node_from_snapshot(value: &Value) -> Result<NodeRef> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::Corrupt("node is not an object".to_string()))?;
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Corrupt("node without a name".to_string()))?
        .to_string();
    let attributes = object
        .get("attributes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let kind = object.get("type").and_then(Value::as_str).unwrap_or("");
    let payload = match kind {
        "group" => {
            let mut children = Vec::new();
            if let Some(entries) = object.get("children").and_then(Value::as_array) {
                for entry in entries {
                    children.push(node_from_snapshot(entry)?);
                }
            }
            NodePayload::Group { children }
        }
        "dataset" => {
            let data: DatasetData = serde_json::from_value(
                object
                    .get("dataset")
                    .cloned()
                    .ok_or_else(|| Error::Corrupt(format!("dataset node {name} without data")))?,
            )
            .map_err(|e| Error::Corrupt(e.to_string()))?;
            NodePayload::Dataset(data)
        }
        "link" => NodePayload::Link {
            target: object
                .get("target")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        other => {
            return Err(Error::Corrupt(format!(
                "unknown node type {other:?} at {name}"
            )));
        }
    };
    Ok(Arc::new(RwLock::new(NodeData {
        name,
        attributes,
        payload,
    })))
}
